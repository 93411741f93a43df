//! Reconstruct read pairs from SAM/BAM streams in which mates may appear in
//! any order.
//!
//! ```no_run
//! use pairsam::{AlignmentReader, DemuxOptions, Demultiplexer, Input};
//!
//! # fn main() -> anyhow::Result<()> {
//! let reader = AlignmentReader::open(&Input::from("reads.bam"), None)?;
//! let mut demux = Demultiplexer::new(reader, DemuxOptions::default());
//! while let Some(pair) = demux.next_pair()? {
//!     println!("{}\t{}\t{}", pair.id, pair.forward.len(), pair.reverse.len());
//! }
//! eprint!("{}", demux.finish()?);
//! # Ok(())
//! # }
//! ```

pub mod demux;
pub mod error;
pub mod io;
pub mod orphan;
pub mod pool;
pub mod qc;
pub mod record;
pub mod seqid;
pub mod utils;

pub use demux::{DemuxOptions, Demultiplexer, Mate, ReadPair, ReadPairBuf};
pub use error::{ConfigError, DemuxError};
pub use io::{AlignmentFormat, AlignmentReader, Input};
pub use orphan::{OrphanReason, OrphanReporter, OrphanSink};
pub use qc::DemuxStats;
pub use record::{Base, RejectReason, Strand, MAX_LEN};
pub use seqid::{MalformedIdentifier, SequenceIdentifier, MAX_TAG_LEN};
