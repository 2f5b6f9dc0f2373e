//! Per-delivery duration derivation.

use crate::analyzers::bucket::bucket_start;
use crate::config::{CalculatorConfig, Dimension};
use crate::error::{AnalysisError, Result};
use crate::records::{Categories, DeliveryRecord};
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{info, warn};

/// Elapsed time for one delivery, plus what it is grouped by.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryDuration {
    pub id: String,
    pub placed_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Elapsed time in the configured unit; never negative
    pub duration: f64,
    pub bucket_start: NaiveDate,
    pub categories: Categories,
}

impl DeliveryDuration {
    /// Builds a duration from a record, rejecting deliveries that finished
    /// before they were placed.
    pub fn from_record(record: DeliveryRecord, config: &CalculatorConfig) -> Result<Self> {
        let elapsed = record.completed_at - record.placed_at;
        if elapsed < chrono::Duration::zero() {
            return Err(AnalysisError::NegativeDuration {
                id: record.id,
                placed: record.placed_at,
                completed: record.completed_at,
            });
        }

        let seconds =
            elapsed.num_seconds() as f64 + f64::from(elapsed.subsec_nanos()) / 1_000_000_000.0;

        Ok(Self {
            bucket_start: bucket_start(record.placed_at, config.granularity),
            duration: seconds / config.unit.seconds(),
            id: record.id,
            placed_at: record.placed_at,
            completed_at: record.completed_at,
            categories: record.categories,
        })
    }

    pub fn category(&self, dimension: Dimension) -> Option<&str> {
        self.categories.get(dimension)
    }
}

#[derive(Debug, Default)]
pub struct CalculatedDurations {
    pub durations: Vec<DeliveryDuration>,
    /// Records excluded because they completed before being placed
    pub anomalies: usize,
}

/// Maps every record to a duration, in input order.
///
/// Negative durations are dropped and counted unless `config.strict` is set,
/// in which case the first one is returned as an error.
#[tracing::instrument(skip_all, fields(records = records.len(), strict = config.strict))]
pub fn calculate_durations(
    records: Vec<DeliveryRecord>,
    config: &CalculatorConfig,
) -> Result<CalculatedDurations> {
    let mut calculated = CalculatedDurations {
        durations: Vec::with_capacity(records.len()),
        anomalies: 0,
    };

    for record in records {
        match DeliveryDuration::from_record(record, config) {
            Ok(duration) => calculated.durations.push(duration),
            Err(e) if e.is_recoverable() && !config.strict => {
                warn!(error = %e, "Excluding anomalous delivery");
                calculated.anomalies += 1;
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        durations = calculated.durations.len(),
        anomalies = calculated.anomalies,
        unit = config.unit.label(),
        "Delivery durations calculated"
    );
    Ok(calculated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DurationUnit, Granularity};
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn record(id: &str, placed: DateTime<Utc>, completed: DateTime<Utc>) -> DeliveryRecord {
        DeliveryRecord {
            id: id.to_string(),
            placed_at: placed,
            completed_at: completed,
            categories: Categories::default(),
        }
    }

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_fractional_hours() {
        let config = CalculatorConfig::default();
        let d = DeliveryDuration::from_record(record("a", at(1, 0, 0), at(1, 1, 30)), &config)
            .unwrap();

        assert_eq!(d.duration, 1.5);
        assert_eq!(d.bucket_start, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    }

    #[test]
    fn test_minute_precision_is_not_rounded() {
        let config = CalculatorConfig {
            unit: DurationUnit::Minutes,
            ..Default::default()
        };
        let placed = at(1, 0, 0);
        let completed = placed + chrono::Duration::seconds(90);
        let d = DeliveryDuration::from_record(record("a", placed, completed), &config).unwrap();

        assert_eq!(d.duration, 1.5);
    }

    #[test]
    fn test_zero_duration_is_valid() {
        let config = CalculatorConfig::default();
        let d = DeliveryDuration::from_record(record("a", at(1, 5, 0), at(1, 5, 0)), &config)
            .unwrap();
        assert_eq!(d.duration, 0.0);
    }

    #[test]
    fn test_bucket_uses_placed_timestamp() {
        let config = CalculatorConfig {
            granularity: Granularity::Month,
            ..Default::default()
        };
        let placed = Utc.with_ymd_and_hms(2024, 1, 31, 23, 0, 0).unwrap();
        let completed = Utc.with_ymd_and_hms(2024, 2, 2, 1, 0, 0).unwrap();
        let d = DeliveryDuration::from_record(record("a", placed, completed), &config).unwrap();

        assert_eq!(d.bucket_start, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    }

    #[test]
    fn test_negative_duration_excluded_when_lenient() {
        let records = vec![
            record("ok", at(1, 0, 0), at(1, 2, 0)),
            record("bad", at(1, 5, 0), at(1, 2, 0)),
        ];
        let calculated = calculate_durations(records, &CalculatorConfig::default()).unwrap();

        assert_eq!(calculated.durations.len(), 1);
        assert_eq!(calculated.durations[0].id, "ok");
        assert_eq!(calculated.anomalies, 1);
    }

    #[test]
    fn test_negative_duration_aborts_when_strict() {
        let config = CalculatorConfig {
            strict: true,
            ..Default::default()
        };
        let records = vec![
            record("ok", at(1, 0, 0), at(1, 2, 0)),
            record("bad", at(1, 5, 0), at(1, 2, 0)),
            record("worse", at(1, 9, 0), at(1, 2, 0)),
        ];
        let err = calculate_durations(records, &config).unwrap_err();

        match err {
            AnalysisError::NegativeDuration { id, .. } => assert_eq!(id, "bad"),
            other => panic!("expected negative duration, got {other:?}"),
        }
    }

    proptest! {
        #[test]
        fn prop_emitted_durations_are_non_negative(
            offsets in prop::collection::vec((0i64..10_000_000, -500_000i64..5_000_000), 0..64)
        ) {
            let base = at(1, 0, 0);
            let records: Vec<_> = offsets
                .iter()
                .enumerate()
                .map(|(i, (placed, elapsed))| {
                    let placed = base + chrono::Duration::seconds(*placed);
                    record(&i.to_string(), placed, placed + chrono::Duration::seconds(*elapsed))
                })
                .collect();
            let total = records.len();

            let calculated = calculate_durations(records, &CalculatorConfig::default()).unwrap();

            prop_assert!(calculated.durations.iter().all(|d| d.duration >= 0.0));
            prop_assert_eq!(calculated.durations.len() + calculated.anomalies, total);
        }
    }
}
