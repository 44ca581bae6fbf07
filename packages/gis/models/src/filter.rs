//! The request-scoped filter set and its parsing from raw query parameters.
//!
//! Parsing here is purely syntactic: text becomes numbers, timestamps, and
//! enums. Semantic checks (required fields, finiteness, ranges, `GeoJSON`
//! structure) happen when the filter set is compiled into a query.

use std::num::IntErrorKind;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{BoundingBox, IncidentQueryParams, IncidentStatus, NearbyQueryParams};

/// Reasons a caller-supplied filter is rejected.
///
/// The `Display` text is returned verbatim in HTTP 400 bodies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    /// The bounding box is missing or malformed.
    #[error("bbox is required (minX,minY,maxX,maxY)")]
    MissingBbox,

    /// The polygon could not be parsed as a polygonal `GeoJSON` geometry.
    #[error("Invalid polygon GeoJSON")]
    InvalidPolygon,

    /// Only some of `lat`, `lng`, `withinKm` were given.
    #[error("lat, lng and withinKm must be provided together")]
    IncompletePointRadius,

    /// The nearby endpoint was called without a center point.
    #[error("lat and lng required")]
    MissingCoordinates,

    /// Only one of `criticalTypes`, `criticalKm` was given.
    #[error("criticalTypes and criticalKm must be provided together")]
    IncompleteOverlayProximity,

    /// A numeric parameter did not parse or is not finite.
    #[error("{field} must be a finite number")]
    InvalidNumber {
        /// Query parameter name.
        field: &'static str,
    },

    /// An integer parameter did not parse.
    #[error("{field} must be an integer")]
    InvalidInteger {
        /// Query parameter name.
        field: &'static str,
    },

    /// A numeric parameter is outside its allowed range.
    #[error("{field} must be {expected}")]
    OutOfRange {
        /// Query parameter name.
        field: &'static str,
        /// Human readable description of the allowed range.
        expected: &'static str,
    },

    /// A timestamp parameter did not parse.
    #[error("{field} is not a valid timestamp: {value}")]
    InvalidTimestamp {
        /// Query parameter name.
        field: &'static str,
        /// The rejected input.
        value: String,
    },

    /// `from` is later than `to`.
    #[error("from must not be after to")]
    InvalidTimeRange,

    /// Unknown incident status.
    #[error("Unknown status: {value}")]
    InvalidStatus {
        /// The rejected input.
        value: String,
    },
}

/// A structured bag of optional, conjunctive constraints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSet {
    /// Spatial bounding box (required by the listing endpoint).
    pub bbox: Option<BoundingBox>,
    /// Raw `GeoJSON` polygon text.
    pub polygon: Option<String>,
    /// Radius filter center latitude.
    pub lat: Option<f64>,
    /// Radius filter center longitude.
    pub lng: Option<f64>,
    /// Radius filter distance in kilometers.
    pub within_km: Option<f64>,
    /// Lower creation-time bound.
    pub from: Option<DateTime<Utc>>,
    /// Upper creation-time bound.
    pub to: Option<DateTime<Utc>>,
    /// Rolling creation-time window in hours.
    pub trending_hours: Option<f64>,
    /// Status filter.
    pub status: Option<IncidentStatus>,
    /// Category filter.
    pub category: Option<String>,
    /// Overlay types for the proximity filter.
    pub critical_types: Vec<String>,
    /// Overlay proximity radius in kilometers.
    pub critical_km: Option<f64>,
    /// Requested page (unclamped).
    pub page: Option<i64>,
    /// Requested page size (unclamped).
    pub page_size: Option<i64>,
    /// Whether to return grid clusters instead of features.
    pub cluster: bool,
    /// Requested cluster cell size in degrees (unclamped).
    pub cluster_grid: Option<f64>,
}

impl FilterSet {
    /// Parses the raw parameters of `GET /gis/incidents`.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError`] if any present parameter is syntactically
    /// invalid. A malformed `bbox` is reported as
    /// [`FilterError::MissingBbox`].
    pub fn from_params(params: &IncidentQueryParams) -> Result<Self, FilterError> {
        let bbox = non_empty(params.bbox.as_deref())
            .map(|s| parse_bbox(s).ok_or(FilterError::MissingBbox))
            .transpose()?;

        let status = non_empty(params.status.as_deref())
            .map(|s| {
                s.parse::<IncidentStatus>()
                    .map_err(|_| FilterError::InvalidStatus {
                        value: s.to_string(),
                    })
            })
            .transpose()?;

        Ok(Self {
            bbox,
            polygon: non_empty(params.polygon.as_deref()).map(str::to_string),
            lat: parse_number("lat", params.lat.as_deref())?,
            lng: parse_number("lng", params.lng.as_deref())?,
            within_km: parse_number("withinKm", params.within_km.as_deref())?,
            from: parse_timestamp("from", params.from.as_deref())?,
            to: parse_timestamp("to", params.to.as_deref())?,
            trending_hours: parse_number("trendingHours", params.trending_hours.as_deref())?,
            status,
            category: non_empty(params.category.as_deref()).map(str::to_string),
            critical_types: split_list(params.critical_types.as_deref()),
            critical_km: parse_number("criticalKm", params.critical_km.as_deref())?,
            page: parse_integer("page", params.page.as_deref())?,
            page_size: parse_integer("pageSize", params.page_size.as_deref())?,
            cluster: non_empty(params.cluster.as_deref())
                .is_some_and(|s| s == "1" || s.eq_ignore_ascii_case("true")),
            cluster_grid: parse_number("clusterGrid", params.cluster_grid.as_deref())?,
        })
    }

    /// Parses the raw parameters of `GET /gis/incidents/nearby` into a
    /// filter set carrying only the point and radius.
    ///
    /// The radius defaults to `default_km` and is clamped to `[min_km,
    /// max_km]`.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::MissingCoordinates`] if `lat` or `lng` is
    /// absent or not a finite number.
    pub fn nearby(
        params: &NearbyQueryParams,
        default_km: f64,
        min_km: f64,
        max_km: f64,
    ) -> Result<Self, FilterError> {
        let coordinate = |raw: Option<&str>| {
            non_empty(raw)
                .and_then(|s| s.parse::<f64>().ok())
                .filter(|v| v.is_finite())
                .ok_or(FilterError::MissingCoordinates)
        };
        let lat = coordinate(params.lat.as_deref())?;
        let lng = coordinate(params.lng.as_deref())?;

        let radius_km = parse_number("radiusKm", params.radius_km.as_deref())?
            .filter(|v| v.is_finite())
            .unwrap_or(default_km)
            .clamp(min_km, max_km);

        Ok(Self {
            lat: Some(lat),
            lng: Some(lng),
            within_km: Some(radius_km),
            ..Self::default()
        })
    }
}

/// Splits a comma-separated list, trimming entries and dropping empties.
/// The result is sorted and de-duplicated so that equivalent lists compare
/// equal.
#[must_use]
pub fn split_list(raw: Option<&str>) -> Vec<String> {
    let mut items: Vec<String> = raw
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    items.sort();
    items.dedup();
    items
}

fn non_empty(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

/// Parses a bounding box string `"minX,minY,maxX,maxY"`.
fn parse_bbox(s: &str) -> Option<BoundingBox> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .ok()?;
    if parts.len() == 4 {
        Some(BoundingBox::new(parts[0], parts[1], parts[2], parts[3]))
    } else {
        None
    }
}

fn parse_number(field: &'static str, raw: Option<&str>) -> Result<Option<f64>, FilterError> {
    non_empty(raw)
        .map(|s| {
            s.parse::<f64>()
                .map_err(|_| FilterError::InvalidNumber { field })
        })
        .transpose()
}

/// Integers beyond `i64` saturate so that the later clamp still applies.
fn parse_integer(field: &'static str, raw: Option<&str>) -> Result<Option<i64>, FilterError> {
    non_empty(raw)
        .map(|s| match s.parse::<i64>() {
            Ok(value) => Ok(value),
            Err(e) => match e.kind() {
                IntErrorKind::PosOverflow => Ok(i64::MAX),
                IntErrorKind::NegOverflow => Ok(i64::MIN),
                _ => Err(FilterError::InvalidInteger { field }),
            },
        })
        .transpose()
}

/// Accepts RFC 3339 timestamps or bare `YYYY-MM-DD` dates (midnight UTC).
fn parse_timestamp(
    field: &'static str,
    raw: Option<&str>,
) -> Result<Option<DateTime<Utc>>, FilterError> {
    let Some(s) = non_empty(raw) else {
        return Ok(None);
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(Some(dt.with_timezone(&Utc)));
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Some(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc)))
        .ok_or_else(|| FilterError::InvalidTimestamp {
            field,
            value: s.to_string(),
        })
}
