//! Data types produced by the aggregation stage.

use crate::config::{Dimension, Granularity};
use chrono::NaiveDate;
use serde::Serialize;

/// Identity of an aggregate group.
///
/// The derived ordering sorts buckets chronologically, then category values
/// lexicographically in dimension order, with a missing value first.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct GroupKey {
    pub bucket_start: NaiveDate,
    pub categories: Vec<Option<String>>,
}

impl GroupKey {
    /// Category values joined for display, e.g. `DHL / north`.
    pub fn category_label(&self) -> String {
        if self.categories.is_empty() {
            return "all".to_string();
        }
        self.categories
            .iter()
            .map(|c| c.as_deref().unwrap_or("(none)"))
            .collect::<Vec<_>>()
            .join(" / ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Percentile {
    pub rank: f64,
    pub value: f64,
}

/// Summary statistics of the durations in one group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DurationStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub percentiles: Vec<Percentile>,
    /// Share of deliveries at or under the on-time threshold, when configured
    pub on_time_rate: Option<f64>,
}

impl DurationStats {
    pub fn percentile(&self, rank: f64) -> Option<f64> {
        self.percentiles
            .iter()
            .find(|p| p.rank == rank)
            .map(|p| p.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateGroup {
    pub key: GroupKey,
    pub stats: DurationStats,
}

/// Ordered groups together with how they were formed.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub granularity: Granularity,
    pub dimensions: Vec<Dimension>,
    pub groups: Vec<AggregateGroup>,
}

impl Aggregation {
    pub fn total_count(&self) -> usize {
        self.groups.iter().map(|g| g.stats.count).sum()
    }

    /// Distinct bucket starts in chronological order.
    pub fn buckets(&self) -> Vec<NaiveDate> {
        let mut buckets: Vec<_> = self.groups.iter().map(|g| g.key.bucket_start).collect();
        buckets.dedup();
        buckets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(day: u32, categories: &[Option<&str>]) -> GroupKey {
        GroupKey {
            bucket_start: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            categories: categories.iter().map(|c| c.map(str::to_string)).collect(),
        }
    }

    #[test]
    fn test_key_ordering() {
        let mut keys = vec![
            key(2, &[Some("A")]),
            key(1, &[Some("B")]),
            key(1, &[None]),
            key(1, &[Some("A")]),
        ];
        keys.sort();

        assert_eq!(
            keys,
            vec![
                key(1, &[None]),
                key(1, &[Some("A")]),
                key(1, &[Some("B")]),
                key(2, &[Some("A")]),
            ]
        );
    }

    #[test]
    fn test_category_label() {
        assert_eq!(key(1, &[]).category_label(), "all");
        assert_eq!(
            key(1, &[Some("DHL"), None]).category_label(),
            "DHL / (none)"
        );
    }
}
