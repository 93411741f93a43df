use std::fmt::{self, Display};

use bstr::BStr;
use itertools::Itertools;
use noodles::sam::alignment::record::Flags;
use noodles::sam::alignment::RecordBuf;

/// Longest read that will be paired. Longer reads are rejected.
pub const MAX_LEN: usize = 1000;

/// Quality given to bases of a record stored without qualities.
pub const MISSING_QUALITY: u8 = 0;

/// One base call and its zero-based Phred quality.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Base {
    pub nt: u8,
    pub qual: u8,
}

impl Base {
    pub fn new(nt: u8, qual: u8) -> Self {
        Self { nt, qual }
    }
}

/// Strand a mate was stored on in the alignment file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Strand {
    #[default]
    Forward,
    Reverse,
}

impl Strand {
    pub fn of(record: &RecordBuf) -> Self {
        if record.flags().is_reverse_complemented() {
            Strand::Reverse
        } else {
            Strand::Forward
        }
    }
}

/// Why a record was refused before it could enter the pending pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RejectReason {
    EmptySequence,
    SequenceTooLong,
    Unpaired,
    MissingName,
    QualityLengthMismatch,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::EmptySequence => "EMPTY",
            RejectReason::SequenceTooLong => "LONG",
            RejectReason::Unpaired => "UNPAIRED",
            RejectReason::MissingName => "NONAME",
            RejectReason::QualityLengthMismatch => "BADQUAL",
        }
    }
}

impl Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Check that a record can take part in a pair, returning its pairing key.
pub fn validate(record: &RecordBuf, max_len: usize) -> Result<&BStr, RejectReason> {
    let len = record.sequence().len();
    if len == 0 {
        return Err(RejectReason::EmptySequence);
    }
    if len > max_len {
        return Err(RejectReason::SequenceTooLong);
    }
    if !record.flags().is_segmented() {
        return Err(RejectReason::Unpaired);
    }
    let name = record.name().ok_or(RejectReason::MissingName)?;
    // absent qualities (`*`) are allowed; see `fill`
    let quals: &[u8] = record.quality_scores().as_ref();
    if !quals.is_empty() && quals.len() != len {
        return Err(RejectReason::QualityLengthMismatch);
    }
    Ok(name)
}

/// Copy a record's base calls and qualities into `buf` in sense-strand order.
///
/// A record stored on the reverse strand has its positions reversed; bases are
/// not complemented. A record without qualities gets [`MISSING_QUALITY`] for
/// every base. `buf` keeps its capacity between calls, so once it has been
/// reserved to the maximum read length no further allocation happens.
pub fn fill(record: &RecordBuf, buf: &mut Vec<Base>, quality_offset: u8) {
    let seq: &[u8] = record.sequence().as_ref();
    let quals: &[u8] = record.quality_scores().as_ref();
    let len = seq.len();
    let reverse = record.flags().is_reverse_complemented();

    buf.clear();
    buf.resize(len, Base::default());
    for (i, &nt) in seq.iter().enumerate() {
        let pos = if reverse { len - 1 - i } else { i };
        let qual = quals.get(i).map_or(MISSING_QUALITY, |q| q.saturating_sub(quality_offset));
        buf[pos] = Base::new(nt, qual);
    }
}

const FLAG_NAMES: [(Flags, &str); 12] = [
    (Flags::SEGMENTED, "PAIRED"),
    (Flags::PROPERLY_SEGMENTED, "PROPER_PAIR"),
    (Flags::UNMAPPED, "UNMAPPED"),
    (Flags::MATE_UNMAPPED, "MATE_UNMAPPED"),
    (Flags::REVERSE_COMPLEMENTED, "REVERSE"),
    (Flags::MATE_REVERSE_COMPLEMENTED, "MATE_REVERSE"),
    (Flags::FIRST_SEGMENT, "READ1"),
    (Flags::LAST_SEGMENT, "READ2"),
    (Flags::SECONDARY, "SECONDARY"),
    (Flags::QC_FAIL, "QC_FAIL"),
    (Flags::DUPLICATE, "DUPLICATE"),
    (Flags::SUPPLEMENTARY, "SUPPLEMENTARY"),
];

/// Space separated names of the set flags, e.g. `PAIRED REVERSE READ1`.
pub fn flag_names(flags: Flags) -> String {
    FLAG_NAMES
        .iter()
        .filter(|(flag, _)| flags.contains(*flag))
        .map(|(_, name)| *name)
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use bstr::BString;
    use noodles::sam::alignment::record_buf::{QualityScores, Sequence};

    fn record(flags: Flags, seq: &[u8], quals: &[u8]) -> RecordBuf {
        RecordBuf::builder()
            .set_name(BString::from("M1:1:2:3:4"))
            .set_flags(flags)
            .set_sequence(Sequence::from(seq.to_vec()))
            .set_quality_scores(QualityScores::from(quals.to_vec()))
            .build()
    }

    fn nts(buf: &[Base]) -> Vec<u8> {
        buf.iter().map(|b| b.nt).collect()
    }

    #[test]
    fn test_fill_forward() {
        let rec = record(Flags::SEGMENTED | Flags::FIRST_SEGMENT, b"ACGT", &[10, 20, 30, 40]);
        let mut buf = Vec::with_capacity(MAX_LEN);
        fill(&rec, &mut buf, 0);
        assert_eq!(nts(&buf), b"ACGT".to_vec());
        assert_eq!(buf[3], Base::new(b'T', 40));
    }

    #[test]
    fn test_fill_reverse() {
        let rec = record(
            Flags::SEGMENTED | Flags::LAST_SEGMENT | Flags::REVERSE_COMPLEMENTED,
            b"ACGT",
            &[10, 20, 30, 40],
        );
        let mut buf = Vec::with_capacity(MAX_LEN);
        fill(&rec, &mut buf, 0);
        assert_eq!(nts(&buf), b"TGCA".to_vec());
        assert_eq!(buf.iter().map(|b| b.qual).collect::<Vec<_>>(), vec![40, 30, 20, 10]);
    }

    #[test]
    fn test_fill_without_qualities() {
        let rec = record(Flags::SEGMENTED | Flags::REVERSE_COMPLEMENTED, b"ACG", &[]);
        let mut buf = Vec::with_capacity(MAX_LEN);
        fill(&rec, &mut buf, 33);
        assert_eq!(nts(&buf), b"GCA".to_vec());
        assert!(buf.iter().all(|b| b.qual == MISSING_QUALITY));
    }

    #[test]
    fn test_fill_reuses_buffer() {
        let mut buf = Vec::with_capacity(MAX_LEN);
        let ptr = buf.as_ptr();
        fill(&record(Flags::SEGMENTED, b"ACGTACGT", &[30; 8]), &mut buf, 0);
        fill(&record(Flags::SEGMENTED, b"GG", &[35, 2]), &mut buf, 33);
        assert_eq!(buf, vec![Base::new(b'G', 2), Base::new(b'G', 0)]);
        assert_eq!(buf.as_ptr(), ptr);
    }

    #[test]
    fn test_validate() {
        let paired = Flags::SEGMENTED | Flags::FIRST_SEGMENT;
        assert_eq!(validate(&record(paired, b"ACGT", &[30; 4]), MAX_LEN), Ok(BStr::new("M1:1:2:3:4")));
        assert_eq!(validate(&record(paired, b"", &[]), MAX_LEN), Err(RejectReason::EmptySequence));
        assert_eq!(
            validate(&record(paired, b"ACGTA", &[30; 5]), 4),
            Err(RejectReason::SequenceTooLong)
        );
        assert_eq!(
            validate(&record(Flags::FIRST_SEGMENT, b"ACGT", &[30; 4]), MAX_LEN),
            Err(RejectReason::Unpaired)
        );
        assert_eq!(
            validate(&record(paired, b"ACGT", &[30; 3]), MAX_LEN),
            Err(RejectReason::QualityLengthMismatch)
        );
        assert_eq!(validate(&record(paired, b"ACGT", &[]), MAX_LEN), Ok(BStr::new("M1:1:2:3:4")));

        let nameless = RecordBuf::builder()
            .set_flags(paired)
            .set_sequence(Sequence::from(b"ACGT".to_vec()))
            .set_quality_scores(QualityScores::from(vec![30; 4]))
            .build();
        assert_eq!(validate(&nameless, MAX_LEN), Err(RejectReason::MissingName));
    }

    #[test]
    fn test_flag_names() {
        assert_eq!(
            flag_names(Flags::SEGMENTED | Flags::REVERSE_COMPLEMENTED | Flags::FIRST_SEGMENT),
            "PAIRED REVERSE READ1"
        );
        assert_eq!(flag_names(Flags::empty()), "");
    }
}
