pub mod analyzers;
pub mod config;
pub mod duration;
pub mod error;
pub mod loader;
pub mod output;
pub mod pipeline;
pub mod records;
pub mod summary;
pub mod visualize;

pub use error::{AnalysisError, Result};
