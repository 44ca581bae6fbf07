#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Domain and wire types for the GIS incident query engine.
//!
//! These types describe who is asking ([`Caller`]), what they asked for
//! ([`FilterSet`] and the raw query parameter structs it is parsed from),
//! and what comes back (`GeoJSON` [`FeatureCollection`] payloads). They are
//! shared by the query engine and the HTTP server so the wire contract lives
//! in exactly one place.

pub mod feature;
pub mod filter;

pub use feature::{
    ClusterProperties, Feature, FeatureCollection, IncidentProperties, OverlayProperties,
};
pub use filter::{FilterError, FilterSet};

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Lifecycle status of an incident report.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IncidentStatus {
    /// Reported by a citizen, not yet reviewed.
    Submitted,
    /// Confirmed by staff.
    Verified,
    /// Assigned to an agency.
    Assigned,
    /// An agency is actively responding.
    Responding,
    /// Closed.
    Resolved,
}

/// Role attached to an authenticated caller.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    /// Member of the public reporting incidents.
    Citizen,
    /// Staff member of a responding agency.
    AgencyStaff,
    /// Platform administrator.
    Admin,
}

impl Role {
    /// Whether this role may use the GIS endpoints at all.
    #[must_use]
    pub const fn can_query_gis(self) -> bool {
        matches!(self, Self::AgencyStaff | Self::Admin)
    }
}

/// The authenticated identity a request runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    /// User id.
    pub id: i64,
    /// Role of the user.
    pub role: Role,
}

impl Caller {
    /// Creates a caller.
    #[must_use]
    pub const fn new(id: i64, role: Role) -> Self {
        Self { id, role }
    }
}

/// The spatial region that constrains what a caller may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JurisdictionScope {
    /// No jurisdiction predicate applies.
    Unrestricted,
    /// Results are intersected with the agency's jurisdiction polygon.
    Agency {
        /// Agency whose polygon applies.
        agency_id: i64,
    },
}

/// A geographic bounding box in WGS84 coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Western longitude boundary (`minX`).
    pub west: f64,
    /// Southern latitude boundary (`minY`).
    pub south: f64,
    /// Eastern longitude boundary (`maxX`).
    pub east: f64,
    /// Northern latitude boundary (`maxY`).
    pub north: f64,
}

impl BoundingBox {
    /// Creates a new bounding box from the given coordinates.
    #[must_use]
    pub const fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Whether all four coordinates are finite numbers.
    #[must_use]
    pub const fn is_finite(&self) -> bool {
        self.west.is_finite()
            && self.south.is_finite()
            && self.east.is_finite()
            && self.north.is_finite()
    }

    /// Whether the point lies inside or on the edge of this box.
    #[must_use]
    pub fn contains(&self, lng: f64, lat: f64) -> bool {
        lng >= self.west && lng <= self.east && lat >= self.south && lat <= self.north
    }
}

/// Query parameters accepted by `GET /gis/incidents`.
///
/// Every field is kept as raw text so that parsing failures can be reported
/// with the engine's own error messages instead of a generic extractor
/// rejection.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentQueryParams {
    /// Bounding box as `minX,minY,maxX,maxY`.
    pub bbox: Option<String>,
    /// Status filter.
    pub status: Option<String>,
    /// Category filter.
    pub category: Option<String>,
    /// Lower creation-time bound (RFC 3339 or `YYYY-MM-DD`).
    pub from: Option<String>,
    /// Upper creation-time bound (RFC 3339 or `YYYY-MM-DD`).
    pub to: Option<String>,
    /// Rolling window: only incidents created in the last N hours.
    pub trending_hours: Option<String>,
    /// `GeoJSON` polygon to intersect with.
    pub polygon: Option<String>,
    /// Latitude of the radius filter center.
    pub lat: Option<String>,
    /// Longitude of the radius filter center.
    pub lng: Option<String>,
    /// Radius in kilometers.
    pub within_km: Option<String>,
    /// Comma-separated overlay types for the proximity filter.
    pub critical_types: Option<String>,
    /// Proximity radius in kilometers.
    pub critical_km: Option<String>,
    /// `1` or `true` to return grid clusters instead of features.
    pub cluster: Option<String>,
    /// Cluster cell size in degrees.
    pub cluster_grid: Option<String>,
    /// 1-based page number.
    pub page: Option<String>,
    /// Page size.
    pub page_size: Option<String>,
}

/// Query parameters accepted by `GET /gis/incidents/nearby`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyQueryParams {
    /// Latitude of the center point.
    pub lat: Option<String>,
    /// Longitude of the center point.
    pub lng: Option<String>,
    /// Search radius in kilometers.
    pub radius_km: Option<String>,
}

/// Query parameters accepted by `GET /gis/overlays`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayQueryParams {
    /// Comma-separated overlay types.
    pub types: Option<String>,
}

impl OverlayQueryParams {
    /// Returns the requested overlay types, trimmed, sorted, and
    /// de-duplicated. Empty when no type filter applies.
    #[must_use]
    pub fn type_list(&self) -> Vec<String> {
        filter::split_list(self.types.as_deref())
    }
}
