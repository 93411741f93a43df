//! Reporting of records that never became part of a pair.
//!
//! An orphan is either written to a FASTQ side file (the "orphan sink") or,
//! when no sink is configured, logged as a single line. Never both.

use std::fmt::{self, Display};
use std::io;
use std::path::{Path, PathBuf};

use bstr::BStr;
use log::warn;
use noodles::fastq;
use noodles::sam::alignment::RecordBuf;

use crate::error::ConfigError;
use crate::io::{create_new_file, Compression, OutputWriter};
use crate::record::{flag_names, RejectReason};
use crate::utils::QualityEncoding;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrphanReason {
    /// The record failed validation and never entered the pool.
    Rejected(RejectReason),
    /// The pair was complete but its name could not be parsed.
    MalformedIdentifier,
    /// The stream ended before the mate arrived.
    UnmatchedAtEndOfStream,
}

impl Display for OrphanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrphanReason::Rejected(reason) => write!(f, "RecordRejected:{}", reason),
            OrphanReason::MalformedIdentifier => f.write_str("MalformedIdentifier"),
            OrphanReason::UnmatchedAtEndOfStream => f.write_str("UnmatchedAtEndOfStream"),
        }
    }
}

/// FASTQ file receiving orphaned records.
pub struct OrphanSink {
    path: PathBuf,
    writer: fastq::io::Writer<OutputWriter>,
}

impl OrphanSink {
    /// Create the sink file. The file must not exist yet; the check and the
    /// creation are a single atomic open. Files ending in `.gz` or `.zst` are
    /// compressed.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let compression = Compression::try_from(&path).ok();
        let inner = create_new_file(&path, compression, None, 1)?;
        Ok(Self { path, writer: fastq::io::Writer::new(inner) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&mut self, record: &RecordBuf, encoding: QualityEncoding) -> io::Result<()> {
        let name: &[u8] = record.name().map_or(&b"*"[..], |x| x.as_ref());
        let seq: &[u8] = record.sequence().as_ref();
        let quals: &[u8] = record.quality_scores().as_ref();
        let quals = if quals.len() == seq.len() {
            encoding.encode_all(quals)
        } else {
            vec![encoding.encode(0); seq.len()]
        };
        let fq = fastq::Record::new(
            fastq::record::Definition::new(name, flag_names(record.flags())),
            seq.to_vec(),
            quals,
        );
        self.writer.write_record(&fq)
    }

    fn finish(&mut self) -> io::Result<()> {
        self.writer.get_mut().try_finish()
    }
}

impl fmt::Debug for OrphanSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrphanSink").field("path", &self.path).finish()
    }
}

/// Routes every orphan to exactly one destination: the sink if there is one,
/// otherwise the log (when enabled).
#[derive(Debug, Default)]
pub struct OrphanReporter {
    sink: Option<OrphanSink>,
    encoding: QualityEncoding,
    log_orphans: bool,
    logged: u64,
}

impl OrphanReporter {
    pub fn new(sink: Option<OrphanSink>) -> Self {
        Self { sink, ..Self::default() }
    }

    pub fn with_quality_encoding(mut self, encoding: QualityEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_log_orphans(mut self, log_orphans: bool) -> Self {
        self.log_orphans = log_orphans;
        self
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    /// Number of orphans that went to the log instead of a sink.
    pub fn logged(&self) -> u64 {
        self.logged
    }

    pub fn report(&mut self, record: &RecordBuf, reason: OrphanReason) -> io::Result<()> {
        if let Some(sink) = self.sink.as_mut() {
            sink.write(record, self.encoding)
        } else {
            if self.log_orphans {
                let name = record.name().unwrap_or(BStr::new("*"));
                warn!("{}\t{}", reason, name);
                self.logged += 1;
            }
            Ok(())
        }
    }

    /// Complete the sink file, including any compression trailer.
    pub fn finish(&mut self) -> io::Result<()> {
        self.sink.as_mut().map_or(Ok(()), OrphanSink::finish)
    }
}
