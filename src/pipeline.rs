//! End-to-end run: load, calculate, aggregate, render, write.

use crate::analyzers::aggregate::{aggregate, overall_stats};
use crate::config::AnalysisConfig;
use crate::duration::calculate_durations;
use crate::error::Result;
use crate::loader::load_records;
use crate::output::{AnalysisResult, write_results};
use crate::summary::{RunSummary, SkippedChart};
use crate::visualize::render_charts;
use chrono::Utc;
use tracing::info;

/// Runs every stage once.
///
/// Fatal errors from loading, duration calculation in strict mode, or
/// aggregation return before anything is written. Chart failures are
/// recorded in the summary and do not fail the run.
#[tracing::instrument(skip_all, fields(output_dir = %config.writer.output_dir.display()))]
pub fn run(config: &AnalysisConfig) -> Result<RunSummary> {
    config.validate()?;

    let loaded = load_records(&config.effective_loader())?;
    let records_loaded = loaded.records.len();

    let calculated = calculate_durations(loaded.records, &config.calculator)?;
    let aggregation = aggregate(&calculated.durations, &config.aggregator)?;
    let overall = overall_stats(&calculated.durations, &config.aggregator)?;

    let chart_set = render_charts(&aggregation, &config.chart);

    let summary = RunSummary {
        generated_at: Utc::now(),
        inputs: config
            .loader
            .inputs
            .iter()
            .map(|p| p.display().to_string())
            .collect(),
        granularity: config.aggregator.granularity,
        group_by: config.aggregator.dimensions.clone(),
        unit: config.calculator.unit,
        std_dev: config.aggregator.std_dev,
        rows_read: loaded.rows_read,
        rows_skipped: loaded.rows_skipped,
        records_loaded,
        anomalies_excluded: calculated.anomalies,
        durations_aggregated: calculated.durations.len(),
        groups: aggregation.groups.len(),
        overall,
        charts_written: chart_set.charts.iter().map(|c| c.file_name()).collect(),
        charts_skipped: chart_set
            .skipped
            .iter()
            .map(|(kind, reason)| SkippedChart {
                chart: kind.name().to_string(),
                reason: reason.clone(),
            })
            .collect(),
    };

    let result = AnalysisResult {
        aggregation,
        charts: chart_set.charts,
        records: config.writer.keep_records.then_some(calculated.durations),
    };
    write_results(&result, &summary, &config.writer)?;

    info!(
        groups = summary.groups,
        durations = summary.durations_aggregated,
        anomalies = summary.anomalies_excluded,
        skipped_rows = summary.rows_skipped,
        "Analysis complete"
    );
    Ok(summary)
}
