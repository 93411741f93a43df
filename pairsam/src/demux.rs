//! The paired-record demultiplexer.
//!
//! Records are pulled one at a time from an alignment stream. Each record that
//! passes validation waits in a [`PendingPool`] under its query name until its
//! mate arrives; the two are then normalized into the demultiplexer's own
//! buffers and handed out as a [`ReadPair`]. Everything that cannot be paired
//! goes to the [`OrphanReporter`].

use std::io;

use bstr::{BString, ByteSlice};
use log::{debug, info, warn};
use noodles::sam::alignment::RecordBuf;

use crate::error::{ConfigError, DemuxError, Result};
use crate::orphan::{OrphanReason, OrphanReporter};
use crate::pool::{MatchResult, PendingPool};
use crate::qc::DemuxStats;
use crate::record::{fill, validate, Base, Strand, MAX_LEN};
use crate::seqid::{SequenceIdentifier, MAX_TAG_LEN};
use crate::utils::complement;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemuxOptions {
    tag: String,
    max_len: usize,
    quality_offset: u8,
}

impl Default for DemuxOptions {
    fn default() -> Self {
        Self { tag: String::new(), max_len: MAX_LEN, quality_offset: 0 }
    }
}

impl DemuxOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Barcode tag copied into every emitted identifier.
    pub fn with_tag<S: Into<String>>(mut self, tag: S) -> std::result::Result<Self, ConfigError> {
        let tag = tag.into();
        if tag.len() > MAX_TAG_LEN {
            return Err(ConfigError::TagTooLong { len: tag.len(), tag, max: MAX_TAG_LEN });
        }
        self.tag = tag;
        Ok(self)
    }

    /// Longest sequence accepted, at most [`MAX_LEN`].
    pub fn with_max_len(mut self, max_len: usize) -> std::result::Result<Self, ConfigError> {
        if max_len == 0 || max_len > MAX_LEN {
            return Err(ConfigError::InvalidMaxLength { value: max_len, max: MAX_LEN });
        }
        self.max_len = max_len;
        Ok(self)
    }

    /// Offset subtracted from stored quality values. Zero for well-formed
    /// SAM/BAM input, whose qualities are already zero-based.
    pub fn with_quality_offset(mut self, offset: u8) -> Self {
        self.quality_offset = offset;
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn quality_offset(&self) -> u8 {
        self.quality_offset
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Reading,
    Done,
    Failed,
}

/// Pairs up mates from a stream of alignment records.
///
/// A demultiplexer owns its source, its pool and its output buffers. Pairs are
/// lent out by [`Demultiplexer::next_pair`] and stay valid until the next call.
#[derive(Debug)]
pub struct Demultiplexer<I> {
    source: I,
    options: DemuxOptions,
    pool: PendingPool,
    orphans: OrphanReporter,
    state: State,
    id: SequenceIdentifier,
    forward: Vec<Base>,
    reverse: Vec<Base>,
    forward_strand: Strand,
    reverse_strand: Strand,
    stats: DemuxStats,
}

impl<I> Demultiplexer<I>
where
    I: Iterator<Item = io::Result<RecordBuf>>,
{
    pub fn new(source: I, options: DemuxOptions) -> Self {
        let max_len = options.max_len;
        Self {
            source,
            options,
            pool: PendingPool::new(),
            orphans: OrphanReporter::default(),
            state: State::Reading,
            id: SequenceIdentifier::default(),
            forward: Vec::with_capacity(max_len),
            reverse: Vec::with_capacity(max_len),
            forward_strand: Strand::Forward,
            reverse_strand: Strand::Forward,
            stats: DemuxStats::default(),
        }
    }

    pub fn with_orphan_reporter(mut self, orphans: OrphanReporter) -> Self {
        self.orphans = orphans;
        self
    }

    /// Pull records until a pair is complete.
    ///
    /// Returns `Ok(None)` once the stream has ended; at that point every
    /// record still pending has been reported as unmatched. Once the stream
    /// has ended or failed, further calls return `Ok(None)` without doing
    /// anything.
    pub fn next_pair(&mut self) -> Result<Option<ReadPair<'_>>> {
        if self.state != State::Reading {
            return Ok(None);
        }

        loop {
            let record = match self.source.next() {
                Some(Ok(record)) => record,
                Some(Err(e)) => {
                    self.state = State::Failed;
                    debug!("Stream failed after {} records, {} pending", self.stats.records, self.pool.len());
                    return Err(DemuxError::Transport(e));
                }
                None => {
                    self.end_of_stream().inspect_err(|_| self.state = State::Failed)?;
                    return Ok(None);
                }
            };
            self.stats.records += 1;

            match self.accept(record) {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => {
                    self.state = State::Failed;
                    return Err(e);
                }
            }
        }

        Ok(Some(self.current_pair()))
    }

    /// Validate a record and offer it to the pool. Returns `true` when it
    /// completed a pair, which is then held in the output buffers.
    fn accept(&mut self, record: RecordBuf) -> Result<bool> {
        let key = match validate(&record, self.options.max_len) {
            Ok(name) => BString::from(name.to_vec()),
            Err(reason) => {
                report(&mut self.orphans, &mut self.stats, &record, OrphanReason::Rejected(reason))?;
                return Ok(false);
            }
        };

        let (mate, record) = match self.pool.try_match(key, record) {
            MatchResult::Inserted => return Ok(false),
            MatchResult::Matched { mate, record } => (mate, record),
        };

        let Some(mut id) = parse_identifier(&record) else {
            report(&mut self.orphans, &mut self.stats, &mate, OrphanReason::MalformedIdentifier)?;
            report(&mut self.orphans, &mut self.stats, &record, OrphanReason::MalformedIdentifier)?;
            return Ok(false);
        };
        id.set_tag(&self.options.tag);
        self.id = id;

        let (forward, reverse) = if record.flags().is_first_segment() {
            (&record, &mate)
        } else {
            (&mate, &record)
        };
        fill(forward, &mut self.forward, self.options.quality_offset);
        fill(reverse, &mut self.reverse, self.options.quality_offset);
        self.forward_strand = Strand::of(forward);
        self.reverse_strand = Strand::of(reverse);
        self.stats.pairs += 1;
        Ok(true)
    }

    fn end_of_stream(&mut self) -> Result<()> {
        self.state = State::Done;
        for (_, record) in self.pool.drain() {
            report(&mut self.orphans, &mut self.stats, &record, OrphanReason::UnmatchedAtEndOfStream)?;
        }
        info!(
            "Read {} records: {} pairs, {} orphans ({:.2}% paired)",
            self.stats.records,
            self.stats.pairs,
            self.stats.total_orphans(),
            self.stats.frac_paired() * 100.0
        );
        Ok(())
    }

    fn current_pair(&self) -> ReadPair<'_> {
        ReadPair {
            id: &self.id,
            forward: Mate { bases: &self.forward, strand: self.forward_strand },
            reverse: Mate { bases: &self.reverse, strand: self.reverse_strand },
        }
    }

    /// Close the demultiplexer, returning its final counters. The orphan sink
    /// is completed here; an error writing it is returned.
    ///
    /// Records still pending because the stream was not read to the end are
    /// counted as abandoned; they are not reported as orphans.
    pub fn finish(mut self) -> Result<DemuxStats> {
        if !self.pool.is_empty() {
            self.stats.abandoned = self.pool.len() as u64;
            warn!("Closed with {} records still waiting for their mate", self.pool.len());
        }
        self.orphans.finish().map_err(DemuxError::OrphanSink)?;
        Ok(self.stats)
    }

    /// Turn the demultiplexer into an iterator of owned pairs.
    pub fn pairs(self) -> PairBufs<I> {
        PairBufs { inner: self }
    }

    pub fn stats(&self) -> &DemuxStats {
        &self.stats
    }

    pub fn options(&self) -> &DemuxOptions {
        &self.options
    }

    /// Number of records waiting for their mate.
    pub fn pending(&self) -> usize {
        self.pool.len()
    }

    pub fn is_done(&self) -> bool {
        self.state != State::Reading
    }
}

fn report(
    orphans: &mut OrphanReporter,
    stats: &mut DemuxStats,
    record: &RecordBuf,
    reason: OrphanReason,
) -> Result<()> {
    stats.add_orphan(reason);
    orphans.report(record, reason).map_err(DemuxError::OrphanSink)
}

fn parse_identifier(record: &RecordBuf) -> Option<SequenceIdentifier> {
    let name = record.name()?;
    let Ok(name) = name.to_str() else {
        debug!("Read name is not valid UTF-8: {}", name);
        return None;
    };
    SequenceIdentifier::parse_sam(name)
        .inspect_err(|e| debug!("Cannot parse read name '{}': {}", name, e))
        .ok()
}

/// One mate of a pair, 5' to 3' on the sense strand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mate<'a> {
    pub bases: &'a [Base],
    /// Strand the mate was stored on.
    pub strand: Strand,
}

impl Mate<'_> {
    pub fn len(&self) -> usize {
        self.bases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    pub fn sequence(&self) -> Vec<u8> {
        self.bases.iter().map(|b| b.nt).collect()
    }

    /// Zero-based Phred qualities, in the same order as [`Mate::sequence`].
    pub fn qualities(&self) -> Vec<u8> {
        self.bases.iter().map(|b| b.qual).collect()
    }

    /// Base calls as the sequencer produced them. A reverse-strand mate was
    /// reversed during normalization, so only the complement is left to undo.
    pub fn read_sequence(&self) -> Vec<u8> {
        match self.strand {
            Strand::Forward => self.sequence(),
            Strand::Reverse => self.bases.iter().map(|b| complement(b.nt)).collect(),
        }
    }

    pub fn to_buf(&self) -> MateBuf {
        MateBuf { bases: self.bases.to_vec(), strand: self.strand }
    }
}

/// A completed pair, borrowed from the demultiplexer's buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPair<'a> {
    pub id: &'a SequenceIdentifier,
    pub forward: Mate<'a>,
    pub reverse: Mate<'a>,
}

impl ReadPair<'_> {
    pub fn to_buf(&self) -> ReadPairBuf {
        ReadPairBuf { id: self.id.clone(), forward: self.forward.to_buf(), reverse: self.reverse.to_buf() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MateBuf {
    pub bases: Vec<Base>,
    pub strand: Strand,
}

impl MateBuf {
    pub fn as_mate(&self) -> Mate<'_> {
        Mate { bases: &self.bases, strand: self.strand }
    }
}

/// An owned copy of a [`ReadPair`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadPairBuf {
    pub id: SequenceIdentifier,
    pub forward: MateBuf,
    pub reverse: MateBuf,
}

impl ReadPairBuf {
    pub fn as_pair(&self) -> ReadPair<'_> {
        ReadPair { id: &self.id, forward: self.forward.as_mate(), reverse: self.reverse.as_mate() }
    }
}

/// Iterator over owned pairs, see [`Demultiplexer::pairs`].
#[derive(Debug)]
pub struct PairBufs<I> {
    inner: Demultiplexer<I>,
}

impl<I> PairBufs<I> {
    pub fn into_inner(self) -> Demultiplexer<I> {
        self.inner
    }
}

impl<I> Iterator for PairBufs<I>
where
    I: Iterator<Item = io::Result<RecordBuf>>,
{
    type Item = Result<ReadPairBuf>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next_pair().map(|pair| pair.map(|p| p.to_buf())).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::AlignmentReader;
    use crate::orphan::OrphanSink;
    use crate::record::RejectReason;
    use noodles::sam::alignment::record::Flags;
    use noodles::sam::alignment::record_buf::{QualityScores, Sequence};

    const R1: Flags = Flags::SEGMENTED.union(Flags::FIRST_SEGMENT);
    const R2: Flags = Flags::SEGMENTED.union(Flags::LAST_SEGMENT);

    fn record(name: &str, flags: Flags, seq: &[u8]) -> RecordBuf {
        RecordBuf::builder()
            .set_name(BString::from(name))
            .set_flags(flags)
            .set_sequence(Sequence::from(seq.to_vec()))
            .set_quality_scores(QualityScores::from(vec![30; seq.len()]))
            .build()
    }

    fn demux(records: Vec<RecordBuf>) -> Demultiplexer<std::vec::IntoIter<io::Result<RecordBuf>>> {
        let source: Vec<io::Result<RecordBuf>> = records.into_iter().map(Ok).collect();
        Demultiplexer::new(source.into_iter(), DemuxOptions::default())
    }

    #[test]
    fn test_options() {
        let options = DemuxOptions::new().with_tag("ACGTAC").unwrap().with_max_len(150).unwrap();
        assert_eq!(options.tag(), "ACGTAC");
        assert_eq!(options.max_len(), 150);
        assert_eq!(options.quality_offset(), 0);

        assert!(DemuxOptions::new().with_tag("A".repeat(MAX_TAG_LEN)).is_ok());
        assert!(matches!(
            DemuxOptions::new().with_tag("A".repeat(MAX_TAG_LEN + 1)),
            Err(ConfigError::TagTooLong { len: 50, .. })
        ));
        assert!(DemuxOptions::new().with_max_len(0).is_err());
        assert!(DemuxOptions::new().with_max_len(MAX_LEN + 1).is_err());
    }

    #[test]
    fn test_pair_order_independent() {
        for records in [
            vec![record("M:1:2:3:4", R1, b"AAAA"), record("M:1:2:3:4", R2, b"CCCC")],
            vec![record("M:1:2:3:4", R2, b"CCCC"), record("M:1:2:3:4", R1, b"AAAA")],
        ] {
            let mut demux = demux(records);
            let pair = demux.next_pair().unwrap().unwrap();
            assert_eq!(pair.forward.sequence(), b"AAAA".to_vec());
            assert_eq!(pair.reverse.sequence(), b"CCCC".to_vec());
            assert_eq!(pair.id.lane, 1);
            assert_eq!(pair.id.y, 4);
            assert!(demux.next_pair().unwrap().is_none());
            assert_eq!(demux.stats().pairs, 1);
        }
    }

    #[test]
    fn test_reverse_strand_mate() {
        let mut demux = demux(vec![
            record("M:1:2:3:4", R1, b"GGGG"),
            record("M:1:2:3:4", R2 | Flags::REVERSE_COMPLEMENTED, b"ACGT"),
        ]);
        let pair = demux.next_pair().unwrap().unwrap();
        assert_eq!(pair.reverse.strand, Strand::Reverse);
        assert_eq!(pair.reverse.sequence(), b"TGCA".to_vec());
        assert_eq!(pair.reverse.read_sequence(), b"ACGT".to_vec());
        assert_eq!(pair.forward.read_sequence(), b"GGGG".to_vec());
    }

    #[test]
    fn test_tag_and_quality_offset() {
        let options = DemuxOptions::new().with_tag("TTAGGC").unwrap().with_quality_offset(10);
        let source = vec![
            Ok(record("M:1:2:3:4", R1, b"AC")),
            Ok(record("M:1:2:3:4", R2, b"GT")),
        ];
        let mut demux = Demultiplexer::new(source.into_iter(), options);
        let pair = demux.next_pair().unwrap().unwrap();
        assert_eq!(pair.id.to_string(), "M:1:2:3:4#TTAGGC");
        assert_eq!(pair.forward.qualities(), vec![20, 20]);
    }

    #[test]
    fn test_rejections_and_unmatched() {
        let mut demux = demux(vec![
            record("M:1:2:3:1", R1, b""),
            record("M:1:2:3:2", R1, &[b'A'; MAX_LEN + 1]),
            record("M:1:2:3:3", Flags::empty(), b"ACGT"),
            record("M:1:2:3:4", R1, b"ACGT"),
            record("M:1:2:3:5", R2, b"ACGT"),
        ]);
        assert!(demux.next_pair().unwrap().is_none());
        assert_eq!(demux.pending(), 0);
        assert!(demux.is_done());

        let stats = demux.finish().unwrap();
        assert_eq!(stats.records, 5);
        assert_eq!(stats.pairs, 0);
        assert_eq!(stats.rejected[&RejectReason::EmptySequence], 1);
        assert_eq!(stats.rejected[&RejectReason::SequenceTooLong], 1);
        assert_eq!(stats.rejected[&RejectReason::Unpaired], 1);
        assert_eq!(stats.unmatched, 2);
        assert_eq!(stats.abandoned, 0);
    }

    #[test]
    fn test_malformed_identifier_drops_both() {
        let mut demux = demux(vec![
            record("M:1:2:3:x", R1, b"ACGT"),
            record("M:1:2:3:x", R2, b"ACGT"),
            record("M:1:2:3:4", R1, b"ACGT"),
            record("M:1:2:3:4", R2, b"ACGT"),
        ]);
        let pair = demux.next_pair().unwrap().unwrap();
        assert_eq!(pair.id.y, 4);
        assert!(demux.next_pair().unwrap().is_none());
        assert_eq!(demux.stats().malformed_id, 2);
        assert_eq!(demux.stats().pairs, 1);
    }

    #[test]
    fn test_transport_error_is_terminal() {
        let source = vec![
            Ok(record("M:1:2:3:4", R1, b"ACGT")),
            Err(io::Error::new(io::ErrorKind::InvalidData, "truncated")),
            Ok(record("M:1:2:3:4", R2, b"ACGT")),
        ];
        let mut demux = Demultiplexer::new(source.into_iter(), DemuxOptions::default());
        assert!(matches!(demux.next_pair(), Err(DemuxError::Transport(_))));
        assert!(demux.next_pair().unwrap().is_none());
        assert!(demux.is_done());

        // the pool is not drained on failure
        let stats = demux.finish().unwrap();
        assert_eq!(stats.unmatched, 0);
        assert_eq!(stats.abandoned, 1);
    }

    #[test]
    fn test_early_finish_abandons_pending() {
        let mut demux = demux(vec![
            record("M:1:2:3:1", R1, b"ACGT"),
            record("M:1:2:3:4", R1, b"ACGT"),
            record("M:1:2:3:4", R2, b"ACGT"),
            record("M:1:2:3:9", R2, b"ACGT"),
        ]);
        assert!(demux.next_pair().unwrap().is_some());
        assert_eq!(demux.pending(), 1);
        let stats = demux.finish().unwrap();
        assert_eq!(stats.abandoned, 1);
        assert_eq!(stats.unmatched, 0);
    }

    #[test]
    fn test_pairs_iterator() {
        let demux = demux(vec![
            record("M:1:2:3:1", R1, b"AAAA"),
            record("M:1:2:3:2", R2, b"CCCC"),
            record("M:1:2:3:1", R2, b"GGGG"),
            record("M:1:2:3:2", R1, b"TTTT"),
        ]);
        let mut pairs = demux.pairs();
        let bufs: Vec<ReadPairBuf> = pairs.by_ref().collect::<Result<_>>().unwrap();
        assert_eq!(bufs.len(), 2);
        assert_eq!(bufs[0].id.y, 1);
        assert_eq!(bufs[1].as_pair().forward.sequence(), b"TTTT".to_vec());
        assert_eq!(pairs.into_inner().finish().unwrap().pairs, 2);
    }

    #[test]
    fn test_sink_receives_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orphans.fq");
        let demux = demux(vec![record("M:1:2:3:3", Flags::empty(), b"ACGT")])
            .with_orphan_reporter(OrphanReporter::new(Some(OrphanSink::create(&path).unwrap())));
        assert_eq!(demux.pairs().count(), 0);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "@M:1:2:3:3\nACGT\n+\n????\n");
    }

    #[test]
    fn test_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Demultiplexer<AlignmentReader>>();
    }
}
