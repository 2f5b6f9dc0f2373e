//! Error types for the delivery analytics pipeline.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Everything that can go wrong between reading the input and writing results.
///
/// `Schema`, `EmptyInput`, `Write`, `Read` and `Config` are fatal.
/// `NegativeDuration` and `Render` are normally recovered where they occur
/// and only surface to the caller in strict mode or when rendering a single
/// chart directly.
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Required input columns are absent
    #[error("schema error in {source_name}: missing required column(s) {}", missing.join(", "))]
    Schema {
        source_name: String,
        missing: Vec<String>,
    },

    /// No usable records survived loading or cleaning
    #[error("no usable delivery records: {reason}")]
    EmptyInput { reason: String },

    /// A delivery completed before it was placed
    #[error("delivery {id} completed at {completed} before it was placed at {placed}")]
    NegativeDuration {
        id: String,
        placed: DateTime<Utc>,
        completed: DateTime<Utc>,
    },

    /// Chart generation failed
    #[error("failed to render {chart} chart: {message}")]
    Render { chart: String, message: String },

    /// Output could not be written
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Input could not be opened or read
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid run configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl AnalysisError {
    pub fn empty_input(reason: impl Into<String>) -> Self {
        Self::EmptyInput {
            reason: reason.into(),
        }
    }

    pub fn render(chart: impl Into<String>, message: impl ToString) -> Self {
        Self::Render {
            chart: chart.into(),
            message: message.to_string(),
        }
    }

    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }

    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    /// Whether the error is recovered locally in non-strict runs.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NegativeDuration { .. } | Self::Render { .. })
    }
}
