use crate::analyzers::types::{AggregateGroup, Aggregation, DurationStats, GroupKey, Percentile};
use crate::analyzers::utility::{mean, median, percentile, stddev};
use crate::config::AggregatorConfig;
use crate::duration::DeliveryDuration;
use crate::error::{AnalysisError, Result};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Groups durations by bucket and category values and summarises each group.
///
/// Groups come back in [`GroupKey`] order, so identical input and
/// configuration always produce identically ordered output. Only keys that
/// received at least one duration are emitted.
///
/// # Errors
///
/// `EmptyInput` when `durations` is empty, so "no data" is never confused
/// with an empty report.
#[tracing::instrument(skip_all, fields(durations = durations.len(), granularity = ?config.granularity))]
pub fn aggregate(durations: &[DeliveryDuration], config: &AggregatorConfig) -> Result<Aggregation> {
    if durations.is_empty() {
        return Err(AnalysisError::empty_input(
            "no delivery durations left to aggregate",
        ));
    }

    let mut series: BTreeMap<GroupKey, Vec<f64>> = BTreeMap::new();

    for d in durations {
        let key = GroupKey {
            bucket_start: d.bucket_start,
            categories: d.categories.project(&config.dimensions),
        };
        series.entry(key).or_default().push(d.duration);
    }

    let groups: Vec<AggregateGroup> = series
        .into_iter()
        .map(|(key, mut values)| {
            let stats = summarize(&mut values, config);
            debug!(bucket = %key.bucket_start, group = %key.category_label(), count = stats.count, "Group summarised");
            AggregateGroup { key, stats }
        })
        .collect();

    info!(groups = groups.len(), "Aggregation complete");

    Ok(Aggregation {
        granularity: config.granularity,
        dimensions: config.dimensions.clone(),
        groups,
    })
}

/// Statistics over every duration in the run, ignoring grouping.
pub fn overall_stats(
    durations: &[DeliveryDuration],
    config: &AggregatorConfig,
) -> Result<DurationStats> {
    if durations.is_empty() {
        return Err(AnalysisError::empty_input(
            "no delivery durations left to aggregate",
        ));
    }
    let mut values: Vec<f64> = durations.iter().map(|d| d.duration).collect();
    Ok(summarize(&mut values, config))
}

/// Summarises a non-empty set of values, sorting them in place.
pub fn summarize(values: &mut [f64], config: &AggregatorConfig) -> DurationStats {
    values.sort_by(|a, b| a.total_cmp(b));

    let avg = mean(values);
    let on_time_rate = config.on_time_threshold.map(|threshold| {
        let on_time = values.iter().filter(|v| **v <= threshold).count();
        on_time as f64 / values.len() as f64
    });

    DurationStats {
        count: values.len(),
        mean: avg,
        median: median(values),
        std_dev: stddev(values, avg, config.std_dev),
        min: values.first().copied().unwrap_or_default(),
        max: values.last().copied().unwrap_or_default(),
        percentiles: config
            .percentiles
            .iter()
            .map(|rank| Percentile {
                rank: *rank,
                value: percentile(values, *rank),
            })
            .collect(),
        on_time_rate,
    }
}
