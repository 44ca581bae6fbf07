//! `GeoJSON` payloads returned by the GIS endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::IncidentStatus;

/// A `GeoJSON` `FeatureCollection` with typed properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "FeatureCollection")]
pub struct FeatureCollection<P> {
    /// Member features.
    pub features: Vec<Feature<P>>,
}

impl<P> FeatureCollection<P> {
    /// Wraps a list of features.
    #[must_use]
    pub const fn new(features: Vec<Feature<P>>) -> Self {
        Self { features }
    }
}

/// A single `GeoJSON` `Feature`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "Feature")]
pub struct Feature<P> {
    /// Feature geometry.
    pub geometry: geojson::Geometry,
    /// Feature properties.
    pub properties: P,
}

/// Properties of an incident in listing mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentProperties {
    /// Incident id.
    pub id: i64,
    /// Current status.
    pub status: IncidentStatus,
    /// Free-text category.
    pub category: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Properties of a grid cluster in clustering mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterProperties {
    /// Position of the cluster in the response.
    pub id: usize,
    /// Number of incidents in the cell.
    pub count: i64,
    /// Most frequent status in the cell.
    pub status: IncidentStatus,
    /// Most frequent non-null category in the cell.
    pub category: Option<String>,
    /// Most recent creation time in the cell.
    pub created_at: DateTime<Utc>,
}

/// Properties of a reference overlay feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayProperties {
    /// Overlay id.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Overlay type (`hospital`, `police`, `flood`, ...).
    #[serde(rename = "type")]
    pub overlay_type: String,
    /// Optional subtype.
    pub subtype: Option<String>,
    /// Arbitrary metadata.
    pub metadata: serde_json::Value,
}
