//! Run-level bookkeeping written next to the results.

use crate::analyzers::types::DurationStats;
use crate::config::{Dimension, DurationUnit, Granularity, StdDevKind};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct SkippedChart {
    pub chart: String,
    pub reason: String,
}

/// What happened during a run, serialised as `summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub generated_at: DateTime<Utc>,
    pub inputs: Vec<String>,
    pub granularity: Granularity,
    pub group_by: Vec<Dimension>,
    pub unit: DurationUnit,
    pub std_dev: StdDevKind,
    pub rows_read: usize,
    pub rows_skipped: usize,
    pub records_loaded: usize,
    pub anomalies_excluded: usize,
    pub durations_aggregated: usize,
    pub groups: usize,
    pub overall: DurationStats,
    pub charts_written: Vec<String>,
    pub charts_skipped: Vec<SkippedChart>,
}
