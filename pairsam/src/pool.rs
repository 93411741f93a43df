use bstr::{BStr, BString};
use indexmap::map::Entry;
use indexmap::IndexMap;
use noodles::sam::alignment::RecordBuf;

/// Outcome of offering a record to the [`PendingPool`].
#[derive(Debug)]
pub enum MatchResult {
    /// No mate was waiting; the record is now held by the pool.
    Inserted,
    /// The mate was waiting and has been removed from the pool.
    Matched { mate: RecordBuf, record: RecordBuf },
}

/// Records whose mate has not been seen yet, keyed by query name.
///
/// The pool holds at most one record per key. It is not bounded: a stream in
/// which mates are far apart simply keeps more records pending.
#[derive(Debug, Default)]
pub struct PendingPool {
    records: IndexMap<BString, RecordBuf>,
}

impl PendingPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_match(&mut self, key: BString, record: RecordBuf) -> MatchResult {
        match self.records.entry(key) {
            Entry::Occupied(entry) => MatchResult::Matched { mate: entry.swap_remove(), record },
            Entry::Vacant(entry) => {
                entry.insert(record);
                MatchResult::Inserted
            }
        }
    }

    /// Remove every pending record. The order is deterministic for a given
    /// stream.
    pub fn drain(&mut self) -> impl Iterator<Item = (BString, RecordBuf)> + '_ {
        self.records.drain(..)
    }

    pub fn contains(&self, key: &BStr) -> bool {
        self.records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noodles::sam::alignment::record::Flags;

    fn record(name: &str, flags: Flags) -> RecordBuf {
        RecordBuf::builder().set_name(BString::from(name)).set_flags(flags).build()
    }

    #[test]
    fn test_insert_then_match() {
        let mut pool = PendingPool::new();
        let r1 = record("a", Flags::SEGMENTED | Flags::FIRST_SEGMENT);
        let r2 = record("a", Flags::SEGMENTED | Flags::LAST_SEGMENT);

        assert!(matches!(pool.try_match("a".into(), r1), MatchResult::Inserted));
        assert_eq!(pool.len(), 1);
        assert!(pool.contains("a".into()));

        match pool.try_match("a".into(), r2) {
            MatchResult::Matched { mate, record } => {
                assert!(mate.flags().is_first_segment());
                assert!(record.flags().is_last_segment());
            }
            MatchResult::Inserted => panic!("expected a match"),
        }
        assert!(pool.is_empty());
        assert!(!pool.contains("a".into()));
    }

    #[test]
    fn test_third_record_starts_new_entry() {
        let mut pool = PendingPool::new();
        for _ in 0..2 {
            pool.try_match("x".into(), record("x", Flags::SEGMENTED));
        }
        assert!(pool.is_empty());
        assert!(matches!(
            pool.try_match("x".into(), record("x", Flags::SEGMENTED)),
            MatchResult::Inserted
        ));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_drain() {
        let mut pool = PendingPool::new();
        for name in ["a", "b", "c"] {
            pool.try_match(name.into(), record(name, Flags::SEGMENTED));
        }
        let keys: Vec<BString> = pool.drain().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![BString::from("a"), BString::from("b"), BString::from("c")]);
        assert!(pool.is_empty());
        assert_eq!(pool.drain().count(), 0);
    }
}
