//! Output persistence for analysis results.
//!
//! Writes the aggregate table, optional per-delivery audit table, charts and
//! run summary into the output directory. Every file goes through a temporary
//! file in the same directory and is renamed into place, so readers never see
//! a half-written artifact under its final name.

use crate::analyzers::types::{AggregateGroup, Aggregation, DurationStats, GroupKey, Percentile};
use crate::config::{Dimension, WriterConfig};
use crate::duration::DeliveryDuration;
use crate::error::{AnalysisError, Result};
use crate::summary::RunSummary;
use crate::visualize::{ChartKind, RenderedChart};
use chrono::{DateTime, NaiveDate, Utc};
use csv::WriterBuilder;
use serde::Serialize;
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

pub const GROUP_TABLE_FILE: &str = "duration_stats.csv";
pub const RECORDS_FILE: &str = "deliveries.csv";
pub const SUMMARY_FILE: &str = "summary.json";

const STAT_COLUMNS: [&str; 6] = ["count", "mean", "median", "stddev", "min", "max"];
const ON_TIME_COLUMN: &str = "on_time_rate";

/// Everything the writer persists for one run.
#[derive(Debug)]
pub struct AnalysisResult {
    pub aggregation: Aggregation,
    pub charts: Vec<RenderedChart>,
    /// Per-delivery rows, present when the audit table is requested
    pub records: Option<Vec<DeliveryDuration>>,
}

/// Paths written by [`write_results`], in write order.
#[derive(Debug, Default)]
pub struct WrittenArtifacts {
    pub files: Vec<PathBuf>,
}

/// Logs a run summary as pretty-printed JSON.
pub fn print_json(summary: &RunSummary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary)
        .map_err(|e| AnalysisError::write(SUMMARY_FILE, io::Error::other(e)))?;
    info!("{}", json);
    Ok(())
}

/// Persists a run's results into `config.output_dir`.
///
/// Every artifact is first written into a staging directory next to the
/// results. Only when all of them are complete are the previous run's
/// artifacts moved aside and the staged ones renamed into place, summary
/// last. If any rename fails the previous artifacts are restored, so the
/// directory always holds the output of exactly one run. Artifacts the
/// current run does not produce (a skipped chart, an unrequested audit
/// table) do not survive from an earlier run.
///
/// # Errors
///
/// `Write` when the directory cannot be created, an artifact path is
/// occupied by a directory, or any file cannot be written.
#[tracing::instrument(skip_all, fields(output_dir = %config.output_dir.display()))]
pub fn write_results(
    result: &AnalysisResult,
    summary: &RunSummary,
    config: &WriterConfig,
) -> Result<WrittenArtifacts> {
    let dir = config.output_dir.as_path();
    fs::create_dir_all(dir).map_err(|e| AnalysisError::write(dir, e))?;
    check_targets(dir)?;

    let staging = tempfile::Builder::new()
        .prefix(".staging-")
        .tempdir_in(dir)
        .map_err(|e| AnalysisError::write(dir, e))?;
    let mut staged = Vec::new();

    let table = group_table_bytes(&result.aggregation)
        .map_err(|e| AnalysisError::write(dir.join(GROUP_TABLE_FILE), e))?;
    write_atomic(staging.path(), GROUP_TABLE_FILE, &table)?;
    staged.push(GROUP_TABLE_FILE.to_string());

    if let (Some(records), true) = (&result.records, config.keep_records) {
        let bytes = records_table_bytes(records)
            .map_err(|e| AnalysisError::write(dir.join(RECORDS_FILE), e))?;
        write_atomic(staging.path(), RECORDS_FILE, &bytes)?;
        staged.push(RECORDS_FILE.to_string());
    }

    for chart in &result.charts {
        write_atomic(staging.path(), &chart.file_name(), &chart.png)?;
        staged.push(chart.file_name());
    }

    let json = serde_json::to_vec_pretty(summary)
        .map_err(|e| AnalysisError::write(dir.join(SUMMARY_FILE), io::Error::other(e)))?;
    write_atomic(staging.path(), SUMMARY_FILE, &json)?;
    staged.push(SUMMARY_FILE.to_string());

    let written = commit(dir, staging.path(), &staged)?;

    info!(files = written.files.len(), "Results written");
    Ok(written)
}

/// Writes `bytes` to `dir/name` via a temporary file and a rename.
pub fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf> {
    let target = dir.join(name);
    debug!(path = %target.display(), bytes = bytes.len(), "Writing artifact");

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| AnalysisError::write(&target, e))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| AnalysisError::write(&target, e))?;
    tmp.persist(&target)
        .map_err(|e| AnalysisError::write(&target, e.error))?;

    Ok(target)
}

/// Every file name a run may own inside the output directory.
fn artifact_names() -> Vec<String> {
    let mut names = vec![GROUP_TABLE_FILE.to_string(), RECORDS_FILE.to_string()];
    names.extend(ChartKind::ALL.iter().map(ChartKind::file_name));
    names.push(SUMMARY_FILE.to_string());
    names
}

/// Refuses to touch artifact paths that are not plain files.
fn check_targets(dir: &Path) -> Result<()> {
    for name in artifact_names() {
        let path = dir.join(&name);
        match fs::symlink_metadata(&path) {
            Ok(meta) if meta.is_dir() => {
                return Err(AnalysisError::write(
                    path,
                    io::Error::new(ErrorKind::AlreadyExists, "a directory is in the way"),
                ));
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(AnalysisError::write(path, e)),
        }
    }
    Ok(())
}

/// Swaps the staged artifacts into `dir`, restoring the previous ones on failure.
fn commit(dir: &Path, staging: &Path, staged: &[String]) -> Result<WrittenArtifacts> {
    let previous = tempfile::Builder::new()
        .prefix(".previous-")
        .tempdir_in(dir)
        .map_err(|e| AnalysisError::write(dir, e))?;

    let mut moved_aside = Vec::new();
    let mut written = WrittenArtifacts::default();

    let swapped = swap_in(
        dir,
        staging,
        previous.path(),
        staged,
        &mut moved_aside,
        &mut written,
    );
    if let Err(e) = swapped {
        warn!(error = %e, "Restoring previous results");
        roll_back(dir, previous.path(), &moved_aside, &written.files);
        return Err(e);
    }
    Ok(written)
}

fn swap_in(
    dir: &Path,
    staging: &Path,
    previous: &Path,
    staged: &[String],
    moved_aside: &mut Vec<String>,
    written: &mut WrittenArtifacts,
) -> Result<()> {
    for name in artifact_names() {
        let target = dir.join(&name);
        match fs::rename(&target, previous.join(&name)) {
            Ok(()) => moved_aside.push(name),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(AnalysisError::write(target, e)),
        }
    }
    for name in staged {
        let target = dir.join(name);
        fs::rename(staging.join(name), &target).map_err(|e| AnalysisError::write(&target, e))?;
        debug!(path = %target.display(), "Artifact in place");
        written.files.push(target);
    }
    Ok(())
}

fn roll_back(dir: &Path, previous: &Path, moved_aside: &[String], placed: &[PathBuf]) {
    for path in placed {
        if let Err(e) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "Could not remove new artifact");
        }
    }
    for name in moved_aside {
        if let Err(e) = fs::rename(previous.join(name), dir.join(name)) {
            warn!(file = name.as_str(), error = %e, "Could not restore previous artifact");
        }
    }
}

fn percentile_column(rank: f64) -> String {
    format!("p{rank}")
}

/// Header row for a group table.
pub fn group_table_header(aggregation: &Aggregation) -> Vec<String> {
    let mut header = vec!["bucket_start".to_string()];
    header.extend(aggregation.dimensions.iter().map(|d| d.as_str().to_string()));
    header.extend(STAT_COLUMNS.iter().map(|c| c.to_string()));

    if let Some(first) = aggregation.groups.first() {
        header.extend(first.stats.percentiles.iter().map(|p| percentile_column(p.rank)));
        if first.stats.on_time_rate.is_some() {
            header.push(ON_TIME_COLUMN.to_string());
        }
    }
    header
}

/// Serialises the groups as CSV, one row per group in aggregation order.
pub fn group_table_bytes(aggregation: &Aggregation) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let mut wtr = WriterBuilder::new().from_writer(&mut buf);
        wtr.write_record(group_table_header(aggregation))?;

        for group in &aggregation.groups {
            let stats = &group.stats;
            let mut row = vec![group.key.bucket_start.format("%Y-%m-%d").to_string()];
            row.extend(
                group
                    .key
                    .categories
                    .iter()
                    .map(|c| c.clone().unwrap_or_default()),
            );
            row.push(stats.count.to_string());
            row.extend(
                [
                    stats.mean,
                    stats.median,
                    stats.std_dev,
                    stats.min,
                    stats.max,
                ]
                .iter()
                .map(f64::to_string),
            );
            row.extend(stats.percentiles.iter().map(|p| p.value.to_string()));
            if let Some(rate) = stats.on_time_rate {
                row.push(rate.to_string());
            }
            wtr.write_record(&row)?;
        }
        wtr.flush()?;
    }
    Ok(buf)
}

#[derive(Serialize)]
struct AuditRow<'a> {
    delivery_id: &'a str,
    placed_at: DateTime<Utc>,
    delivered_at: DateTime<Utc>,
    duration: f64,
    bucket_start: NaiveDate,
    carrier: Option<&'a str>,
    region: Option<&'a str>,
    product_class: Option<&'a str>,
}

fn records_table_bytes(records: &[DeliveryDuration]) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let mut wtr = WriterBuilder::new().from_writer(&mut buf);
        for d in records {
            wtr.serialize(AuditRow {
                delivery_id: &d.id,
                placed_at: d.placed_at,
                delivered_at: d.completed_at,
                duration: d.duration,
                bucket_start: d.bucket_start,
                carrier: d.category(Dimension::Carrier),
                region: d.category(Dimension::Region),
                product_class: d.category(Dimension::ProductClass),
            })?;
        }
        wtr.flush()?;
    }
    Ok(buf)
}

/// Groups reloaded from a group table, with the dimensions named in its header.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupTable {
    pub dimensions: Vec<Dimension>,
    pub groups: Vec<AggregateGroup>,
}

fn invalid(path: &Path, message: impl Into<String>) -> AnalysisError {
    AnalysisError::read(path, io::Error::new(ErrorKind::InvalidData, message.into()))
}

/// Reloads a table written by [`write_results`].
pub fn read_group_table(path: &Path) -> Result<GroupTable> {
    let mut rdr = csv::Reader::from_path(path)
        .map_err(|e| AnalysisError::read(path, io::Error::other(e)))?;
    let headers = rdr
        .headers()
        .map_err(|e| AnalysisError::read(path, io::Error::other(e)))?
        .clone();

    let columns: Vec<&str> = headers.iter().collect();
    if columns.first() != Some(&"bucket_start") {
        return Err(invalid(path, "first column must be bucket_start"));
    }
    let count_at = columns
        .iter()
        .position(|c| *c == "count")
        .ok_or_else(|| invalid(path, "missing count column"))?;

    let dimensions = columns[1..count_at]
        .iter()
        .map(|c| {
            Dimension::from_column_name(c)
                .ok_or_else(|| invalid(path, format!("unknown dimension column '{c}'")))
        })
        .collect::<Result<Vec<_>>>()?;

    let stat_end = count_at + STAT_COLUMNS.len();
    if columns.len() < stat_end || columns[count_at..stat_end] != STAT_COLUMNS {
        return Err(invalid(path, "statistic columns are missing or out of order"));
    }

    let mut ranks = Vec::new();
    let mut has_on_time = false;
    for column in &columns[stat_end..] {
        if *column == ON_TIME_COLUMN {
            has_on_time = true;
        } else {
            let rank = column
                .strip_prefix('p')
                .and_then(|r| r.parse::<f64>().ok())
                .ok_or_else(|| invalid(path, format!("unexpected column '{column}'")))?;
            ranks.push(rank);
        }
    }

    let mut groups = Vec::new();
    for (line, result) in rdr.records().enumerate() {
        let row = result.map_err(|e| AnalysisError::read(path, io::Error::other(e)))?;
        let field = |i: usize| row.get(i).unwrap_or_default();
        let number = |i: usize| {
            field(i)
                .parse::<f64>()
                .map_err(|_| invalid(path, format!("row {}: bad number '{}'", line + 1, field(i))))
        };

        let bucket_start = NaiveDate::parse_from_str(field(0), "%Y-%m-%d")
            .map_err(|_| invalid(path, format!("row {}: bad bucket_start", line + 1)))?;
        let categories = (1..count_at)
            .map(|i| Some(field(i).to_string()).filter(|v| !v.is_empty()))
            .collect();
        let count = field(count_at)
            .parse::<usize>()
            .map_err(|_| invalid(path, format!("row {}: bad count", line + 1)))?;

        let percentiles = ranks
            .iter()
            .enumerate()
            .map(|(i, rank)| -> Result<Percentile> {
                Ok(Percentile {
                    rank: *rank,
                    value: number(stat_end + i)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let on_time_rate = if has_on_time {
            Some(number(columns.len() - 1)?)
        } else {
            None
        };

        groups.push(AggregateGroup {
            key: GroupKey {
                bucket_start,
                categories,
            },
            stats: DurationStats {
                count,
                mean: number(count_at + 1)?,
                median: number(count_at + 2)?,
                std_dev: number(count_at + 3)?,
                min: number(count_at + 4)?,
                max: number(count_at + 5)?,
                percentiles,
                on_time_rate,
            },
        });
    }

    Ok(GroupTable { dimensions, groups })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::aggregate::aggregate;
    use crate::config::{AggregatorConfig, CalculatorConfig, Granularity, StdDevKind};
    use crate::records::{Categories, DeliveryRecord};
    use crate::summary::RunSummary;
    use chrono::TimeZone;

    fn durations() -> Vec<DeliveryDuration> {
        let rows = [
            ("a", 1, 0, 2, Some("DHL")),
            ("b", 1, 0, 5, Some("DHL")),
            ("c", 1, 3, 4, None),
            ("d", 2, 1, 11, Some("UPS")),
        ];
        rows.iter()
            .map(|(id, day, placed, completed, carrier)| {
                let record = DeliveryRecord {
                    id: id.to_string(),
                    placed_at: Utc.with_ymd_and_hms(2024, 3, *day, *placed, 0, 0).unwrap(),
                    completed_at: Utc
                        .with_ymd_and_hms(2024, 3, *day, *completed, 20, 0)
                        .unwrap(),
                    categories: Categories {
                        carrier: carrier.map(str::to_string),
                        ..Default::default()
                    },
                };
                DeliveryDuration::from_record(record, &CalculatorConfig::default()).unwrap()
            })
            .collect()
    }

    fn aggregator_config() -> AggregatorConfig {
        AggregatorConfig {
            dimensions: vec![Dimension::Carrier],
            percentiles: vec![50.0, 90.0, 99.5],
            on_time_threshold: Some(3.0),
            ..Default::default()
        }
    }

    fn summary(aggregation: &Aggregation) -> RunSummary {
        let mut values: Vec<f64> = durations().iter().map(|d| d.duration).collect();
        RunSummary {
            generated_at: Utc::now(),
            inputs: vec!["test.csv".to_string()],
            granularity: Granularity::Day,
            group_by: aggregation.dimensions.clone(),
            unit: Default::default(),
            std_dev: StdDevKind::Population,
            rows_read: 4,
            rows_skipped: 0,
            records_loaded: 4,
            anomalies_excluded: 0,
            durations_aggregated: 4,
            groups: aggregation.groups.len(),
            overall: crate::analyzers::aggregate::summarize(&mut values, &aggregator_config()),
            charts_written: vec![],
            charts_skipped: vec![],
        }
    }

    fn result(records: bool) -> AnalysisResult {
        let durations = durations();
        AnalysisResult {
            aggregation: aggregate(&durations, &aggregator_config()).unwrap(),
            charts: vec![],
            records: records.then_some(durations),
        }
    }

    #[test]
    fn test_group_table_header() {
        let header = group_table_header(&result(false).aggregation);
        assert_eq!(
            header,
            vec![
                "bucket_start",
                "carrier",
                "count",
                "mean",
                "median",
                "stddev",
                "min",
                "max",
                "p50",
                "p90",
                "p99.5",
                "on_time_rate"
            ]
        );
    }

    #[test]
    fn test_group_table_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let result = result(false);
        let config = WriterConfig {
            output_dir: dir.path().join("out"),
            keep_records: false,
        };
        write_results(&result, &summary(&result.aggregation), &config).unwrap();

        let table = read_group_table(&config.output_dir.join(GROUP_TABLE_FILE)).unwrap();

        assert_eq!(table.dimensions, vec![Dimension::Carrier]);
        assert_eq!(table.groups, result.aggregation.groups);
    }

    #[test]
    fn test_group_table_is_byte_identical_across_writes() {
        let first = group_table_bytes(&result(false).aggregation).unwrap();
        let second = group_table_bytes(&result(false).aggregation).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_write_results_creates_directory_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("results");
        let result = result(true);
        let config = WriterConfig {
            output_dir: out.clone(),
            keep_records: true,
        };

        let written = write_results(&result, &summary(&result.aggregation), &config).unwrap();

        assert_eq!(written.files.len(), 3);
        assert!(out.join(GROUP_TABLE_FILE).exists());
        assert!(out.join(RECORDS_FILE).exists());
        assert!(out.join(SUMMARY_FILE).exists());

        let audit = fs::read_to_string(out.join(RECORDS_FILE)).unwrap();
        assert!(audit.starts_with("delivery_id,placed_at,delivered_at,duration,bucket_start"));
        assert_eq!(audit.lines().count(), 5);

        let summary: serde_json::Value =
            serde_json::from_slice(&fs::read(out.join(SUMMARY_FILE)).unwrap()).unwrap();
        assert_eq!(summary["durations_aggregated"], 4);
        assert_eq!(summary["granularity"], "day");
    }

    #[test]
    fn test_rewrite_replaces_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().to_path_buf();
        fs::write(out.join(GROUP_TABLE_FILE), "stale").unwrap();
        fs::write(out.join(RECORDS_FILE), "stale").unwrap();
        fs::write(out.join(ChartKind::MeanTrend.file_name()), "stale").unwrap();

        let result = result(false);
        let config = WriterConfig {
            output_dir: out.clone(),
            keep_records: false,
        };
        write_results(&result, &summary(&result.aggregation), &config).unwrap();

        let table = fs::read_to_string(out.join(GROUP_TABLE_FILE)).unwrap();
        assert!(table.starts_with("bucket_start,"));
        assert!(!out.join(RECORDS_FILE).exists());
        assert!(!out.join(ChartKind::MeanTrend.file_name()).exists());

        // no staging or temporary entries left behind
        let leftovers: Vec<_> = fs::read_dir(&out)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with('.'))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[test]
    fn test_failed_write_keeps_previous_run_intact() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().to_path_buf();
        fs::write(out.join(GROUP_TABLE_FILE), "previous table").unwrap();
        fs::write(out.join(SUMMARY_FILE), "previous summary").unwrap();
        fs::create_dir(out.join(ChartKind::MeanTrend.file_name())).unwrap();

        let mut result = result(false);
        result.charts.push(RenderedChart {
            kind: ChartKind::MeanTrend,
            width: 1,
            height: 1,
            png: vec![1, 2, 3],
        });
        let config = WriterConfig {
            output_dir: out.clone(),
            keep_records: false,
        };
        let err = write_results(&result, &summary(&result.aggregation), &config).unwrap_err();

        assert!(matches!(err, AnalysisError::Write { .. }));
        assert_eq!(
            fs::read_to_string(out.join(GROUP_TABLE_FILE)).unwrap(),
            "previous table"
        );
        assert_eq!(
            fs::read_to_string(out.join(SUMMARY_FILE)).unwrap(),
            "previous summary"
        );
    }

    #[test]
    fn test_commit_restores_previous_artifacts_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let staging = dir.path().join("staging");
        fs::create_dir_all(&out).unwrap();
        fs::create_dir_all(&staging).unwrap();
        fs::write(out.join(GROUP_TABLE_FILE), "previous table").unwrap();
        fs::write(out.join(SUMMARY_FILE), "previous summary").unwrap();
        fs::write(out.join(RECORDS_FILE), "previous records").unwrap();
        // the staged summary is missing, so the second rename fails
        fs::write(staging.join(GROUP_TABLE_FILE), "new table").unwrap();

        let staged = vec![GROUP_TABLE_FILE.to_string(), SUMMARY_FILE.to_string()];
        let err = commit(&out, &staging, &staged).unwrap_err();

        assert!(matches!(err, AnalysisError::Write { .. }));
        for (name, contents) in [
            (GROUP_TABLE_FILE, "previous table"),
            (SUMMARY_FILE, "previous summary"),
            (RECORDS_FILE, "previous records"),
        ] {
            assert_eq!(fs::read_to_string(out.join(name)).unwrap(), contents);
        }
    }

    #[test]
    fn test_charts_are_written_as_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut result = result(false);
        result.charts.push(RenderedChart {
            kind: ChartKind::CategoryDistribution,
            width: 1,
            height: 1,
            png: vec![1, 2, 3],
        });
        let config = WriterConfig {
            output_dir: dir.path().to_path_buf(),
            keep_records: false,
        };
        write_results(&result, &summary(&result.aggregation), &config).unwrap();

        let bytes = fs::read(dir.path().join("duration_by_category.png")).unwrap();
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[test]
    fn test_unwritable_output_dir_is_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, "file").unwrap();

        let result = result(false);
        let config = WriterConfig {
            output_dir: blocker.join("results"),
            keep_records: false,
        };
        let err = write_results(&result, &summary(&result.aggregation), &config).unwrap_err();

        assert!(matches!(err, AnalysisError::Write { .. }));
    }

    #[test]
    fn test_read_group_table_rejects_unknown_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(GROUP_TABLE_FILE);
        fs::write(
            &path,
            "bucket_start,warehouse,count,mean,median,stddev,min,max\n",
        )
        .unwrap();

        assert!(matches!(
            read_group_table(&path),
            Err(AnalysisError::Read { .. })
        ));
    }
}
