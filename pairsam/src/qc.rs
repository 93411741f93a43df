use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::ops::{Deref, DerefMut};

use crate::orphan::OrphanReason;
use crate::record::RejectReason;

#[derive(Debug, Default, Clone)]
pub struct Metrics(HashMap<String, f64>);

impl From<HashMap<String, f64>> for Metrics {
    fn from(map: HashMap<String, f64>) -> Self {
        Metrics(map)
    }
}

impl From<Metrics> for HashMap<String, f64> {
    fn from(val: Metrics) -> Self {
        val.0
    }
}

impl Deref for Metrics {
    type Target = HashMap<String, f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Metrics {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Display for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.0.keys().collect();
        keys.sort();
        for key in keys {
            writeln!(f, "{}\t{}", key, self.0[key])?;
        }
        Ok(())
    }
}

/// Counters for one demultiplexer run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DemuxStats {
    pub records: u64,       // Records pulled from the source
    pub pairs: u64,         // Pairs handed to the caller
    pub rejected: BTreeMap<RejectReason, u64>,
    pub malformed_id: u64,  // Records dropped because the pair's name could not be parsed
    pub unmatched: u64,     // Records still pending at a clean end of stream
    pub abandoned: u64,     // Records still pending when the stream was closed early
}

impl DemuxStats {
    pub(crate) fn add_orphan(&mut self, reason: OrphanReason) {
        match reason {
            OrphanReason::Rejected(reason) => {
                *self.rejected.entry(reason).or_insert(0) += 1;
            }
            OrphanReason::MalformedIdentifier => self.malformed_id += 1,
            OrphanReason::UnmatchedAtEndOfStream => self.unmatched += 1,
        }
    }

    pub fn total_rejected(&self) -> u64 {
        self.rejected.values().sum()
    }

    /// Records that did not end up in a pair.
    pub fn total_orphans(&self) -> u64 {
        self.total_rejected() + self.malformed_id + self.unmatched + self.abandoned
    }

    /// Fraction of records that were paired.
    pub fn frac_paired(&self) -> f64 {
        if self.records == 0 {
            0.0
        } else {
            (2 * self.pairs) as f64 / self.records as f64
        }
    }

    pub fn report(&self, metric: &mut Metrics) {
        metric.insert("records".to_string(), self.records as f64);
        metric.insert("pairs".to_string(), self.pairs as f64);
        metric.insert("frac_paired".to_string(), self.frac_paired());
        metric.insert("malformed_id".to_string(), self.malformed_id as f64);
        metric.insert("unmatched".to_string(), self.unmatched as f64);
        metric.insert("abandoned".to_string(), self.abandoned as f64);
        for (reason, count) in &self.rejected {
            metric.insert(format!("rejected_{}", reason.code().to_lowercase()), *count as f64);
        }
    }

    pub fn to_metrics(&self) -> Metrics {
        let mut metrics = Metrics::default();
        self.report(&mut metrics);
        metrics
    }
}

impl Display for DemuxStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "STAT\tREADS\t{}", self.records)?;
        writeln!(f, "STAT\tPAIRS\t{}", self.pairs)?;
        for (reason, count) in &self.rejected {
            writeln!(f, "STAT\t{}\t{}", reason.code(), count)?;
        }
        writeln!(f, "STAT\tBADID\t{}", self.malformed_id)?;
        writeln!(f, "STAT\tUNMATCHED\t{}", self.unmatched)?;
        if self.abandoned > 0 {
            writeln!(f, "STAT\tABANDONED\t{}", self.abandoned)?;
        }
        Ok(())
    }
}
