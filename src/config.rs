//! Run configuration.
//!
//! Every stage receives its slice of [`AnalysisConfig`] explicitly; nothing
//! is read from global state once the CLI has built the struct.

use crate::error::{AnalysisError, Result};
use clap::ValueEnum;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Width of a time bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    #[default]
    Day,
    Week,
    Month,
}

/// Categorical attribute a delivery can be grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Carrier,
    Region,
    ProductClass,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Carrier => "carrier",
            Dimension::Region => "region",
            Dimension::ProductClass => "product_class",
        }
    }

    pub fn from_column_name(name: &str) -> Option<Self> {
        match name {
            "carrier" => Some(Dimension::Carrier),
            "region" => Some(Dimension::Region),
            "product_class" => Some(Dimension::ProductClass),
            _ => None,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit durations are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationUnit {
    Minutes,
    #[default]
    Hours,
    Days,
}

impl DurationUnit {
    pub fn seconds(&self) -> f64 {
        match self {
            DurationUnit::Minutes => 60.0,
            DurationUnit::Hours => 3_600.0,
            DurationUnit::Days => 86_400.0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DurationUnit::Minutes => "minutes",
            DurationUnit::Hours => "hours",
            DurationUnit::Days => "days",
        }
    }
}

/// Population (divide by n) or sample (divide by n - 1) standard deviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StdDevKind {
    #[default]
    Population,
    Sample,
}

/// Input column names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    pub id: String,
    pub placed: String,
    pub completed: String,
    pub carrier: String,
    pub region: String,
    pub product_class: String,
}

impl ColumnMap {
    pub fn for_dimension(&self, dimension: Dimension) -> &str {
        match dimension {
            Dimension::Carrier => &self.carrier,
            Dimension::Region => &self.region,
            Dimension::ProductClass => &self.product_class,
        }
    }
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            id: "delivery_id".to_string(),
            placed: "placed_at".to_string(),
            completed: "delivered_at".to_string(),
            carrier: "carrier".to_string(),
            region: "region".to_string(),
            product_class: "product_class".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub inputs: Vec<PathBuf>,
    pub columns: ColumnMap,
    /// Dimensions whose columns must be present in every input
    pub required_dimensions: Vec<Dimension>,
    /// Fail with `EmptyInput` when `skipped / total` exceeds this
    pub max_skip_ratio: f64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            columns: ColumnMap::default(),
            required_dimensions: Vec::new(),
            max_skip_ratio: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CalculatorConfig {
    pub unit: DurationUnit,
    pub granularity: Granularity,
    pub strict: bool,
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub granularity: Granularity,
    pub dimensions: Vec<Dimension>,
    pub percentiles: Vec<f64>,
    pub std_dev: StdDevKind,
    /// Deliveries at or under this duration count as on time
    pub on_time_threshold: Option<f64>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            granularity: Granularity::Day,
            dimensions: Vec::new(),
            percentiles: vec![90.0],
            std_dev: StdDevKind::Population,
            on_time_threshold: None,
        }
    }
}

/// Largest accepted chart width or height, in pixels.
pub const MAX_CHART_SIDE: u32 = 10_000;

/// Chart rendering options, scoped to a single render call.
#[derive(Debug, Clone)]
pub struct ChartStyle {
    pub width: u32,
    pub height: u32,
    /// Hex colour, e.g. `#FFFFFF`
    pub background: String,
    pub palette: Vec<String>,
    pub font_family: String,
    pub unit: DurationUnit,
}

impl Default for ChartStyle {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 600,
            background: "#FFFFFF".to_string(),
            palette: [
                "#1F77B4", "#FF7F0E", "#2CA02C", "#D62728", "#9467BD", "#8C564B", "#E377C2",
                "#7F7F7F",
            ]
            .iter()
            .map(|c| c.to_string())
            .collect(),
            font_family: "sans-serif".to_string(),
            unit: DurationUnit::Hours,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub output_dir: PathBuf,
    pub keep_records: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("results"),
            keep_records: false,
        }
    }
}

/// Complete configuration for one run.
#[derive(Debug, Clone, Default)]
pub struct AnalysisConfig {
    pub loader: LoaderConfig,
    pub calculator: CalculatorConfig,
    pub aggregator: AggregatorConfig,
    pub chart: ChartStyle,
    pub writer: WriterConfig,
}

impl AnalysisConfig {
    /// Checks that the individual sections are usable and agree with each other.
    pub fn validate(&self) -> Result<()> {
        if self.loader.inputs.is_empty() {
            return Err(AnalysisError::Config(
                "at least one input file is required".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.loader.max_skip_ratio) {
            return Err(AnalysisError::Config(format!(
                "max skip ratio must be within [0, 1], got {}",
                self.loader.max_skip_ratio
            )));
        }
        if let Some(p) = self
            .aggregator
            .percentiles
            .iter()
            .find(|p| !(**p > 0.0 && **p <= 100.0))
        {
            return Err(AnalysisError::Config(format!(
                "percentiles must be within (0, 100], got {p}"
            )));
        }
        if let Some(threshold) = self.aggregator.on_time_threshold
            && (threshold.is_nan() || threshold <= 0.0)
        {
            return Err(AnalysisError::Config(format!(
                "on-time threshold must be positive, got {threshold}"
            )));
        }
        if self.chart.width == 0 || self.chart.height == 0 {
            return Err(AnalysisError::Config(
                "chart width and height must be non-zero".to_string(),
            ));
        }
        if self.chart.width > MAX_CHART_SIDE || self.chart.height > MAX_CHART_SIDE {
            return Err(AnalysisError::Config(format!(
                "chart width and height must be at most {MAX_CHART_SIDE}, got {}x{}",
                self.chart.width, self.chart.height
            )));
        }
        if self.calculator.granularity != self.aggregator.granularity {
            return Err(AnalysisError::Config(
                "calculator and aggregator granularity differ".to_string(),
            ));
        }
        let mut seen = self.aggregator.dimensions.clone();
        seen.sort();
        seen.dedup();
        if seen.len() != self.aggregator.dimensions.len() {
            return Err(AnalysisError::Config(
                "group-by dimensions must not repeat".to_string(),
            ));
        }
        Ok(())
    }

    /// Loader settings with the column of every grouped dimension required,
    /// so grouping by a column the input lacks is a schema error rather than
    /// a single group of missing values.
    pub fn effective_loader(&self) -> LoaderConfig {
        let mut loader = self.loader.clone();
        for dimension in &self.aggregator.dimensions {
            if !loader.required_dimensions.contains(dimension) {
                loader.required_dimensions.push(*dimension);
            }
        }
        loader
    }
}
