//! Deterministic folds over decoded records
//!
//! Aggregates are recomputed from the full record set every run. Records are
//! sorted by chain position before folding so first/last fields do not depend
//! on the order items were listed or resolved in.

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::BTreeMap;

/// A record that can be folded into per-group totals
pub trait Observation {
    /// Group key, usually a lowercase address
    fn group(&self) -> String;
    /// Contribution to the group sum. `None` marks an unresolved record.
    fn amount(&self) -> Option<f64>;
    fn timestamp(&self) -> i64;
    /// (block, transaction index, log index)
    fn position(&self) -> (u64, u64, u64);
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupTotals<R> {
    pub sum: f64,
    /// Resolved records only
    pub count: usize,
    pub first_ts: Option<i64>,
    pub last_ts: Option<i64>,
    /// Records whose amount could not be resolved
    pub unresolved: usize,
    /// Resolved records in chain order
    pub records: Vec<R>,
}

impl<R> Default for GroupTotals<R> {
    fn default() -> Self {
        Self {
            sum: 0.0,
            count: 0,
            first_ts: None,
            last_ts: None,
            unresolved: 0,
            records: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Folded<R> {
    pub groups: BTreeMap<String, GroupTotals<R>>,
    /// Unresolved records across all groups
    pub errors: usize,
}

/// Fold records into per-group totals in chain order
pub fn fold_groups<R: Observation + Clone>(records: &[R]) -> Folded<R> {
    let mut ordered: Vec<&R> = records.iter().collect();
    ordered.sort_by_key(|r| r.position());

    let mut groups: BTreeMap<String, GroupTotals<R>> = BTreeMap::new();
    let mut errors = 0;

    for record in ordered {
        let totals = groups.entry(record.group()).or_default();
        match record.amount() {
            Some(amount) => {
                let ts = record.timestamp();
                totals.sum += amount;
                totals.count += 1;
                totals.first_ts.get_or_insert(ts);
                totals.last_ts = Some(ts);
                totals.records.push(record.clone());
            }
            None => {
                totals.unresolved += 1;
                errors += 1;
            }
        }
    }

    Folded { groups, errors }
}

/// Records matching and not matching a classification
#[derive(Debug)]
pub struct Split<'a, R> {
    pub matching: Vec<&'a R>,
    pub rest: Vec<&'a R>,
}

pub fn split_by<'a, R>(records: &'a [R], predicate: impl Fn(&R) -> bool) -> Split<'a, R> {
    let (matching, rest) = records.iter().partition(|r| predicate(r));
    Split { matching, rest }
}

/// Ordered, half-open buckets `[lower_i, lower_{i+1})`; the last is unbounded above
#[derive(Debug, Clone, Copy)]
pub struct Distribution {
    buckets: &'static [(&'static str, f64)],
}

/// Lock duration buckets in days. The first key is `<1 month` (no space);
/// older dashboard builds keyed it as `< 1 month`.
pub const LOCK_DURATION: Distribution = Distribution {
    buckets: &[
        ("<1 month", 0.0),
        ("1-3 months", 30.0),
        ("3-6 months", 90.0),
        ("6-12 months", 180.0),
        ("1-2 years", 365.0),
    ],
};

impl Distribution {
    /// Index of the bucket holding `value`. Values below the first bound land in the first bucket.
    pub fn bucket_of(&self, value: f64) -> usize {
        self.buckets
            .iter()
            .rposition(|(_, lower)| value >= *lower)
            .unwrap_or(0)
    }

    pub fn count(&self, values: impl IntoIterator<Item = f64>) -> BucketCounts {
        let mut counts: Vec<(&'static str, usize)> =
            self.buckets.iter().map(|(label, _)| (*label, 0)).collect();
        for value in values {
            counts[self.bucket_of(value)].1 += 1;
        }
        BucketCounts(counts)
    }
}

/// Bucket counts that serialize as a JSON object in bucket order
#[derive(Debug, Clone, PartialEq)]
pub struct BucketCounts(pub Vec<(&'static str, usize)>);

impl BucketCounts {
    pub fn get(&self, label: &str) -> Option<usize> {
        self.0.iter().find(|(l, _)| *l == label).map(|(_, c)| *c)
    }

    pub fn total(&self) -> usize {
        self.0.iter().map(|(_, c)| c).sum()
    }
}

impl Serialize for BucketCounts {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (label, count) in &self.0 {
            map.serialize_entry(label, count)?;
        }
        map.end()
    }
}

/// Sort by `metric` descending, ties broken by `address` ascending
pub fn rank_by<R>(items: &mut [R], metric: impl Fn(&R) -> f64, address: impl Fn(&R) -> &str) {
    items.sort_by(|a, b| {
        metric(b)
            .total_cmp(&metric(a))
            .then_with(|| address(a).cmp(address(b)))
    });
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
