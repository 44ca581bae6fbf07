//! Compiles a [`FilterSet`] into SQL predicate fragments with positionally
//! bound parameters.
//!
//! Every optional filter contributes exactly one fragment and consumes the
//! next parameter slots. Slot numbering is owned by [`ParamList`], so
//! predicates appended after compilation (jurisdiction) and the LIMIT/OFFSET
//! slots appended by the store stay consistent with insertion order.
//! Caller values are always bound, never spliced into the SQL text.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use geojson::GeoJson;
use georise_gis_models::{BoundingBox, FilterError, FilterSet, IncidentStatus};
use serde::Serialize;

use crate::cache_key::canonical_json;
use crate::config::GisConfig;

/// Smallest accepted cluster cell, in degrees.
pub const MIN_CLUSTER_GRID: f64 = 0.001;

/// Largest accepted cluster cell, in degrees.
pub const MAX_CLUSTER_GRID: f64 = 1.0;

/// Longest accepted rolling window (100 years), in hours.
pub const MAX_TRENDING_HOURS: f64 = 876_000.0;

/// Longest accepted distance (half the Earth's circumference), in km.
pub const MAX_DISTANCE_KM: f64 = 20_040.0;

/// A value bound to a `$n` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Real(f64),
    Int(i64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

/// Ordered parameter list. Slots are 1-based to match `$n` placeholders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamList {
    values: Vec<SqlParam>,
}

impl ParamList {
    /// Appends `value` and returns its slot.
    pub fn push(&mut self, value: SqlParam) -> usize {
        self.values.push(value);
        self.values.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[SqlParam] {
        &self.values
    }
}

/// One conjunctive constraint on the `incidents i` relation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    HasGeometry,
    Envelope {
        bbox: BoundingBox,
    },
    /// Canonical `GeoJSON` of a validated polygon or multipolygon.
    Polygon {
        geometry: serde_json::Value,
    },
    WithinDistance {
        lng: f64,
        lat: f64,
        meters: f64,
    },
    CreatedWithinHours {
        hours: f64,
    },
    CreatedFrom {
        at: DateTime<Utc>,
    },
    CreatedTo {
        at: DateTime<Utc>,
    },
    Status {
        status: IncidentStatus,
    },
    Category {
        category: String,
    },
    NearOverlay {
        types: Vec<String>,
        meters: f64,
    },
    Jurisdiction {
        agency_id: i64,
    },
}

impl Predicate {
    /// Renders the SQL fragment, pushing its values onto `params`.
    pub fn render(&self, params: &mut ParamList) -> String {
        let mut sql = String::new();

        match self {
            Self::HasGeometry => sql.push_str("i.geom IS NOT NULL"),
            Self::Envelope { bbox } => {
                let west = params.push(SqlParam::Real(bbox.west));
                let south = params.push(SqlParam::Real(bbox.south));
                let east = params.push(SqlParam::Real(bbox.east));
                let north = params.push(SqlParam::Real(bbox.north));
                write!(
                    sql,
                    "ST_Intersects(i.geom, ST_MakeEnvelope(${west}, ${south}, ${east}, ${north}, 4326))"
                )
                .unwrap();
            }
            Self::Polygon { geometry } => {
                let idx = params.push(SqlParam::Text(geometry.to_string()));
                write!(
                    sql,
                    "ST_Intersects(i.geom, ST_SetSRID(ST_GeomFromGeoJSON(${idx}), 4326))"
                )
                .unwrap();
            }
            Self::WithinDistance { lng, lat, meters } => {
                let lng = params.push(SqlParam::Real(*lng));
                let lat = params.push(SqlParam::Real(*lat));
                let meters = params.push(SqlParam::Real(*meters));
                write!(
                    sql,
                    "ST_DWithin(i.geom::geography, ST_SetSRID(ST_MakePoint(${lng}, ${lat}), 4326)::geography, ${meters})"
                )
                .unwrap();
            }
            Self::CreatedWithinHours { hours } => {
                let idx = params.push(SqlParam::Real(*hours));
                write!(sql, "i.created_at >= NOW() - (${idx} * INTERVAL '1 hour')").unwrap();
            }
            Self::CreatedFrom { at } => {
                let idx = params.push(SqlParam::Timestamp(*at));
                write!(sql, "i.created_at >= ${idx}").unwrap();
            }
            Self::CreatedTo { at } => {
                let idx = params.push(SqlParam::Timestamp(*at));
                write!(sql, "i.created_at <= ${idx}").unwrap();
            }
            Self::Status { status } => {
                let idx = params.push(SqlParam::Text(status.to_string()));
                write!(sql, "i.status = ${idx}").unwrap();
            }
            Self::Category { category } => {
                let idx = params.push(SqlParam::Text(category.clone()));
                write!(sql, "i.category = ${idx}").unwrap();
            }
            Self::NearOverlay { types, meters } => {
                let types = params.push(SqlParam::Text(types.join(",")));
                let meters = params.push(SqlParam::Real(*meters));
                write!(
                    sql,
                    "EXISTS (SELECT 1 FROM overlays o WHERE o.type = ANY(string_to_array(${types}, ',')) \
                     AND ST_DWithin(i.geom::geography, o.geom::geography, ${meters}))"
                )
                .unwrap();
            }
            Self::Jurisdiction { agency_id } => {
                let idx = params.push(SqlParam::Int(*agency_id));
                write!(
                    sql,
                    "ST_Intersects(i.geom, (SELECT a.jurisdiction_geom FROM agencies a WHERE a.id = ${idx}))"
                )
                .unwrap();
            }
        }

        sql
    }
}

/// Listing window after clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageWindow {
    pub page: i64,
    pub page_size: i64,
    pub offset: i64,
}

/// How the compiled query is materialized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryMode {
    List(PageWindow),
    Cluster { grid: f64 },
}

/// The output of compilation: typed predicates, their rendered fragments,
/// and the positionally matched parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    filter: FilterSet,
    predicates: Vec<Predicate>,
    fragments: Vec<String>,
    params: ParamList,
    mode: QueryMode,
}

impl CompiledQuery {
    fn new(filter: FilterSet, mode: QueryMode) -> Self {
        let mut query = Self {
            filter,
            predicates: Vec::new(),
            fragments: Vec::new(),
            params: ParamList::default(),
            mode,
        };
        query.push(Predicate::HasGeometry);
        query
    }

    /// Appends a predicate, rendering it into the next parameter slots.
    pub fn push(&mut self, predicate: Predicate) {
        let fragment = predicate.render(&mut self.params);
        self.fragments.push(fragment);
        self.predicates.push(predicate);
    }

    /// The fragments joined with `AND`.
    #[must_use]
    pub fn where_clause(&self) -> String {
        self.fragments.join(" AND ")
    }

    #[must_use]
    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    #[must_use]
    pub const fn params(&self) -> &ParamList {
        &self.params
    }

    #[must_use]
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    #[must_use]
    pub const fn mode(&self) -> QueryMode {
        self.mode
    }

    /// The filter set this query was compiled from.
    #[must_use]
    pub const fn filter(&self) -> &FilterSet {
        &self.filter
    }
}

/// Validates filter sets and compiles them against the configured limits.
#[derive(Debug, Clone)]
pub struct FilterCompiler {
    max_page_size: i64,
    default_page_size: i64,
    cluster_grid: f64,
}

impl FilterCompiler {
    #[must_use]
    pub fn new(config: &GisConfig) -> Self {
        Self {
            max_page_size: config.max_page_size.max(1),
            default_page_size: config.default_page_size,
            cluster_grid: config.cluster_grid,
        }
    }

    /// Compiles a `GET /gis/incidents` filter set.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError`] if the bounding box is absent or any present
    /// filter is invalid.
    pub fn compile(&self, filter: &FilterSet) -> Result<CompiledQuery, FilterError> {
        let bbox = filter
            .bbox
            .filter(BoundingBox::is_finite)
            .ok_or(FilterError::MissingBbox)?;

        let mode = if filter.cluster {
            QueryMode::Cluster {
                grid: self.cluster_grid(filter.cluster_grid)?,
            }
        } else {
            QueryMode::List(self.page_window(filter.page, filter.page_size))
        };

        let mut query = CompiledQuery::new(filter.clone(), mode);
        query.push(Predicate::Envelope { bbox });

        if let Some(raw) = filter.polygon.as_deref() {
            query.push(Predicate::Polygon {
                geometry: parse_polygon(raw)?,
            });
        }

        if let Some(point) = point_radius(filter)? {
            query.push(point);
        }

        if let Some(hours) = filter.trending_hours {
            if !hours.is_finite() {
                return Err(FilterError::InvalidNumber {
                    field: "trendingHours",
                });
            }
            if hours <= 0.0 || hours > MAX_TRENDING_HOURS {
                return Err(FilterError::OutOfRange {
                    field: "trendingHours",
                    expected: "greater than 0 and at most 876000",
                });
            }
            query.push(Predicate::CreatedWithinHours { hours });
        }

        if let Some(status) = filter.status {
            query.push(Predicate::Status { status });
        }

        if let Some(category) = filter.category.as_deref() {
            query.push(Predicate::Category {
                category: category.to_string(),
            });
        }

        if let (Some(from), Some(to)) = (filter.from, filter.to) {
            if from > to {
                return Err(FilterError::InvalidTimeRange);
            }
        }
        if let Some(at) = filter.from {
            query.push(Predicate::CreatedFrom { at });
        }
        if let Some(at) = filter.to {
            query.push(Predicate::CreatedTo { at });
        }

        if let Some(near) = overlay_proximity(filter)? {
            query.push(near);
        }

        Ok(query)
    }

    /// Compiles a `GET /gis/incidents/nearby` filter set: the point radius
    /// only, capped at `limit` rows with no pagination.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::MissingCoordinates`] if the point is absent,
    /// or a range error for out-of-range coordinates.
    pub fn compile_nearby(
        &self,
        filter: &FilterSet,
        limit: i64,
    ) -> Result<CompiledQuery, FilterError> {
        if filter.lat.is_none() || filter.lng.is_none() {
            return Err(FilterError::MissingCoordinates);
        }

        let window = PageWindow {
            page: 1,
            page_size: limit.max(1),
            offset: 0,
        };
        let mut query = CompiledQuery::new(filter.clone(), QueryMode::List(window));
        if let Some(point) = point_radius(filter)? {
            query.push(point);
        }

        Ok(query)
    }

    fn page_window(&self, page: Option<i64>, page_size: Option<i64>) -> PageWindow {
        let page_size = page_size
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size);
        let page = page.unwrap_or(1).max(1);

        PageWindow {
            page,
            page_size,
            offset: (page - 1).saturating_mul(page_size),
        }
    }

    fn cluster_grid(&self, requested: Option<f64>) -> Result<f64, FilterError> {
        let grid = requested.unwrap_or(self.cluster_grid);
        if !grid.is_finite() {
            return Err(FilterError::InvalidNumber {
                field: "clusterGrid",
            });
        }
        Ok(grid.clamp(MIN_CLUSTER_GRID, MAX_CLUSTER_GRID))
    }
}

/// Accepts a `Polygon`, a `MultiPolygon`, or a `Feature` wrapping one, and
/// returns its canonical `GeoJSON` value.
fn parse_polygon(raw: &str) -> Result<serde_json::Value, FilterError> {
    let geometry = match raw.parse::<GeoJson>() {
        Ok(GeoJson::Geometry(geometry)) => geometry,
        Ok(GeoJson::Feature(feature)) => feature.geometry.ok_or(FilterError::InvalidPolygon)?,
        Ok(GeoJson::FeatureCollection(_)) | Err(_) => return Err(FilterError::InvalidPolygon),
    };

    let valid = match &geometry.value {
        geojson::Value::Polygon(rings) => rings_valid(rings),
        geojson::Value::MultiPolygon(polygons) => {
            !polygons.is_empty() && polygons.iter().all(|rings| rings_valid(rings))
        }
        _ => false,
    };
    if !valid {
        return Err(FilterError::InvalidPolygon);
    }

    serde_json::to_value(&geometry)
        .map(canonical_json)
        .map_err(|_| FilterError::InvalidPolygon)
}

/// Rings need four or more finite positions and must be closed.
fn rings_valid(rings: &geojson::PolygonType) -> bool {
    !rings.is_empty()
        && rings.iter().all(|ring| {
            ring.len() >= 4
                && ring.first() == ring.last()
                && ring
                    .iter()
                    .all(|position| position.len() >= 2 && position.iter().all(|c| c.is_finite()))
        })
}

fn point_radius(filter: &FilterSet) -> Result<Option<Predicate>, FilterError> {
    let (lat, lng, km) = match (filter.lat, filter.lng, filter.within_km) {
        (None, None, None) => return Ok(None),
        (Some(lat), Some(lng), Some(km)) => (lat, lng, km),
        _ => return Err(FilterError::IncompletePointRadius),
    };

    for (field, value) in [("lat", lat), ("lng", lng), ("withinKm", km)] {
        if !value.is_finite() {
            return Err(FilterError::InvalidNumber { field });
        }
    }
    if !(-90.0..=90.0).contains(&lat) {
        return Err(FilterError::OutOfRange {
            field: "lat",
            expected: "between -90 and 90",
        });
    }
    if !(-180.0..=180.0).contains(&lng) {
        return Err(FilterError::OutOfRange {
            field: "lng",
            expected: "between -180 and 180",
        });
    }
    Ok(Some(Predicate::WithinDistance {
        lng,
        lat,
        meters: distance_meters("withinKm", km)?,
    }))
}

/// Converts a caller distance to meters. The distance must be positive and
/// no longer than half the Earth's circumference.
fn distance_meters(field: &'static str, km: f64) -> Result<f64, FilterError> {
    if !km.is_finite() {
        return Err(FilterError::InvalidNumber { field });
    }
    if km <= 0.0 || km > MAX_DISTANCE_KM {
        return Err(FilterError::OutOfRange {
            field,
            expected: "greater than 0 and at most 20040",
        });
    }
    Ok(km * 1000.0)
}

fn overlay_proximity(filter: &FilterSet) -> Result<Option<Predicate>, FilterError> {
    let mut types: Vec<String> = filter
        .critical_types
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    types.sort();
    types.dedup();

    match (types.is_empty(), filter.critical_km) {
        (true, None) => Ok(None),
        (false, Some(km)) => Ok(Some(Predicate::NearOverlay {
            types,
            meters: distance_meters("criticalKm", km)?,
        })),
        _ => Err(FilterError::IncompleteOverlayProximity),
    }
}
