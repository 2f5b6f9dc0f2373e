//! Grouping and statistical summaries of delivery durations.
//!
//! Durations are bucketed by the calendar period their order was placed in,
//! split further by the configured categorical dimensions, and summarised per
//! group.

pub mod aggregate;
pub mod bucket;
pub mod types;
pub mod utility;
