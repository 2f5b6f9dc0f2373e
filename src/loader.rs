//! Record loading from CSV exports.
//!
//! Inputs are read in order and concatenated. Files ending in `.gz` are
//! decompressed on the fly.

use crate::config::{ColumnMap, LoaderConfig};
use crate::error::{AnalysisError, Result};
use crate::records::{Categories, DeliveryRecord};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use csv::{ReaderBuilder, StringRecord, Trim};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

/// Naive layouts accepted after RFC 3339; interpreted as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Records that survived validation plus row accounting.
#[derive(Debug, Default)]
pub struct LoadedRecords {
    pub records: Vec<DeliveryRecord>,
    pub rows_read: usize,
    pub rows_skipped: usize,
}

impl LoadedRecords {
    pub fn skip_ratio(&self) -> f64 {
        if self.rows_read == 0 {
            0.0
        } else {
            self.rows_skipped as f64 / self.rows_read as f64
        }
    }

    fn extend(&mut self, other: LoadedRecords) {
        self.records.extend(other.records);
        self.rows_read += other.rows_read;
        self.rows_skipped += other.rows_skipped;
    }
}

/// Loads every configured input and applies the skip-ratio policy.
///
/// # Errors
///
/// `Schema` when a required column is missing from any input, `Read` when a
/// file cannot be opened, and `EmptyInput` when nothing valid is left or the
/// share of skipped rows exceeds `max_skip_ratio`.
#[tracing::instrument(skip(config), fields(inputs = config.inputs.len()))]
pub fn load_records(config: &LoaderConfig) -> Result<LoadedRecords> {
    let mut loaded = LoadedRecords::default();

    for path in &config.inputs {
        let reader = open_input(path)?;
        let part = load_from_reader(reader, &path.display().to_string(), config)?;
        loaded.extend(part);
    }

    check_skip_policy(&loaded, config.max_skip_ratio)?;

    info!(
        rows_read = loaded.rows_read,
        rows_skipped = loaded.rows_skipped,
        records = loaded.records.len(),
        "Delivery records loaded"
    );
    Ok(loaded)
}

fn open_input(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).map_err(|e| AnalysisError::read(path, e))?;
    let gzipped = path.extension().and_then(|e| e.to_str()) == Some("gz");
    debug!(path = %path.display(), gzipped, "Opening input");

    if gzipped {
        Ok(Box::new(MultiGzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

fn check_skip_policy(loaded: &LoadedRecords, max_skip_ratio: f64) -> Result<()> {
    if loaded.records.is_empty() {
        return Err(AnalysisError::empty_input(format!(
            "none of the {} input rows were valid",
            loaded.rows_read
        )));
    }

    let ratio = loaded.skip_ratio();
    if ratio > max_skip_ratio {
        return Err(AnalysisError::empty_input(format!(
            "{} of {} rows were invalid ({:.1}% > {:.1}% allowed)",
            loaded.rows_skipped,
            loaded.rows_read,
            ratio * 100.0,
            max_skip_ratio * 100.0
        )));
    }
    Ok(())
}

/// Column positions resolved from a header row.
struct ColumnIndex {
    id: usize,
    placed: usize,
    completed: usize,
    carrier: Option<usize>,
    region: Option<usize>,
    product_class: Option<usize>,
}

impl ColumnIndex {
    fn resolve(headers: &StringRecord, source_name: &str, config: &LoaderConfig) -> Result<Self> {
        let find = |name: &str| headers.iter().position(|h| h == name);
        let columns: &ColumnMap = &config.columns;

        let mut required = vec![
            columns.id.as_str(),
            columns.placed.as_str(),
            columns.completed.as_str(),
        ];
        required.extend(
            config
                .required_dimensions
                .iter()
                .map(|d| columns.for_dimension(*d)),
        );

        let missing: Vec<String> = required
            .into_iter()
            .filter(|name| find(*name).is_none())
            .map(str::to_string)
            .collect();

        match (
            find(columns.id.as_str()),
            find(columns.placed.as_str()),
            find(columns.completed.as_str()),
        ) {
            (Some(id), Some(placed), Some(completed)) if missing.is_empty() => Ok(Self {
                id,
                placed,
                completed,
                carrier: find(columns.carrier.as_str()),
                region: find(columns.region.as_str()),
                product_class: find(columns.product_class.as_str()),
            }),
            _ => Err(AnalysisError::Schema {
                source_name: source_name.to_string(),
                missing,
            }),
        }
    }

    fn parse(&self, row: &StringRecord) -> std::result::Result<DeliveryRecord, String> {
        let id = cell(row, Some(self.id)).ok_or("blank delivery id")?;
        let placed_raw = row.get(self.placed).unwrap_or_default();
        let placed_at = parse_timestamp(placed_raw)
            .ok_or_else(|| format!("unparseable placed timestamp '{placed_raw}'"))?;
        let completed_raw = row.get(self.completed).unwrap_or_default();
        let completed_at = parse_timestamp(completed_raw)
            .ok_or_else(|| format!("unparseable completed timestamp '{completed_raw}'"))?;

        Ok(DeliveryRecord {
            id,
            placed_at,
            completed_at,
            categories: Categories {
                carrier: cell(row, self.carrier),
                region: cell(row, self.region),
                product_class: cell(row, self.product_class),
            },
        })
    }
}

fn cell(row: &StringRecord, index: Option<usize>) -> Option<String> {
    index
        .and_then(|i| row.get(i))
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Reads one CSV source without applying the skip-ratio policy.
pub fn load_from_reader<R: Read>(
    reader: R,
    source_name: &str,
    config: &LoaderConfig,
) -> Result<LoadedRecords> {
    let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);

    let headers = rdr
        .headers()
        .map_err(|e| AnalysisError::read(source_name, std::io::Error::other(e)))?
        .clone();
    let index = ColumnIndex::resolve(&headers, source_name, config)?;

    let mut loaded = LoadedRecords::default();

    for (row_number, result) in rdr.records().enumerate() {
        loaded.rows_read += 1;

        let row = match result {
            Ok(row) => row,
            Err(e) if e.is_io_error() => {
                return Err(AnalysisError::read(source_name, std::io::Error::other(e)));
            }
            Err(e) => {
                debug!(source = source_name, row = row_number + 1, error = %e, "Skipping malformed row");
                loaded.rows_skipped += 1;
                continue;
            }
        };

        match index.parse(&row) {
            Ok(record) => loaded.records.push(record),
            Err(reason) => {
                debug!(source = source_name, row = row_number + 1, reason = %reason, "Skipping invalid row");
                loaded.rows_skipped += 1;
            }
        }
    }

    if loaded.rows_skipped > 0 {
        warn!(
            source = source_name,
            skipped = loaded.rows_skipped,
            rows = loaded.rows_read,
            "Some rows were skipped"
        );
    }

    Ok(loaded)
}

/// Parses a timestamp, normalising it to UTC.
///
/// Accepts RFC 3339, naive date-times with a space or `T` separator (with or
/// without seconds and fractions), and bare dates (midnight).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
