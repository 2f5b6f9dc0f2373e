//! Typed delivery rows.

use crate::config::Dimension;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Optional categorical attributes carried by a delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Categories {
    pub carrier: Option<String>,
    pub region: Option<String>,
    pub product_class: Option<String>,
}

impl Categories {
    pub fn get(&self, dimension: Dimension) -> Option<&str> {
        match dimension {
            Dimension::Carrier => self.carrier.as_deref(),
            Dimension::Region => self.region.as_deref(),
            Dimension::ProductClass => self.product_class.as_deref(),
        }
    }

    /// Values for `dimensions`, in order.
    pub fn project(&self, dimensions: &[Dimension]) -> Vec<Option<String>> {
        dimensions
            .iter()
            .map(|d| self.get(*d).map(str::to_string))
            .collect()
    }
}

/// One validated input row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub id: String,
    pub placed_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub categories: Categories,
}
