//! `PostGIS`-backed [`IncidentStore`].
//!
//! Spatial queries use `query_raw_params()` with `PostGIS` functions. The
//! WHERE clause and its parameters come straight from the
//! [`CompiledQuery`]; this module only appends projection, grouping,
//! ordering, and the trailing LIMIT/OFFSET slots.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseError, DatabaseValue};

use crate::compiler::{CompiledQuery, PageWindow, ParamList, Predicate, SqlParam};
use crate::store::{ClusterRecord, IncidentRecord, IncidentStore, OverlayRecord, StoreError};

/// Error text fragments `PostGIS` emits when it cannot use a
/// caller-supplied geometry.
const GEOMETRY_INPUT_ERRORS: &[&str] = &[
    "geojson",
    "invalid geometry",
    "parse error",
    "topologyexception",
    "geos error",
];

/// Incident store over a `PostGIS` database.
#[derive(Clone)]
pub struct PostgisStore {
    db: Arc<dyn Database>,
}

impl PostgisStore {
    #[must_use]
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// Runs a statement. `caller_geometry` marks statements that bind a
    /// caller-supplied polygon; only their geometry errors count as bad
    /// input.
    async fn query(
        &self,
        sql: &str,
        params: &[DatabaseValue],
        caller_geometry: bool,
    ) -> Result<Vec<switchy_database::Row>, StoreError> {
        log::trace!("Executing: {sql}");
        self.db
            .query_raw_params(sql, params)
            .await
            .map_err(|e| classify(e, caller_geometry))
    }
}

fn classify(e: DatabaseError, caller_geometry: bool) -> StoreError {
    let message = e.to_string();
    if caller_geometry && is_geometry_input_error(&message) {
        StoreError::Rejected { message }
    } else {
        StoreError::Database(e)
    }
}

fn is_geometry_input_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    GEOMETRY_INPUT_ERRORS
        .iter()
        .any(|needle| lower.contains(needle))
}

fn has_caller_geometry(query: &CompiledQuery) -> bool {
    query
        .predicates()
        .iter()
        .any(|predicate| matches!(predicate, Predicate::Polygon { .. }))
}

fn to_database_value(param: &SqlParam) -> DatabaseValue {
    match param {
        SqlParam::Real(v) => DatabaseValue::Real64(*v),
        SqlParam::Int(v) => DatabaseValue::Int64(*v),
        SqlParam::Text(v) => DatabaseValue::String(v.clone()),
        SqlParam::Timestamp(v) => DatabaseValue::DateTime(v.naive_utc()),
    }
}

fn to_database_values(params: &ParamList) -> Vec<DatabaseValue> {
    params.values().iter().map(to_database_value).collect()
}

fn conversion<E: std::fmt::Display>(column: &'static str) -> impl Fn(E) -> StoreError {
    move |e| StoreError::Conversion {
        message: format!("Failed to parse {column}: {e}"),
    }
}

fn utc(naive: NaiveDateTime) -> DateTime<Utc> {
    DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc)
}

/// Builds the listing statement and its parameters.
#[must_use]
pub fn listing_sql(query: &CompiledQuery, window: PageWindow) -> (String, Vec<DatabaseValue>) {
    let mut params = query.params().clone();
    let mut sql = format!(
        "SELECT i.id, i.status, i.category, i.created_at, ST_AsGeoJSON(i.geom) AS geojson
         FROM incidents i
         WHERE {}
         ORDER BY i.created_at DESC, i.id DESC",
        query.where_clause()
    );

    let limit_idx = params.push(SqlParam::Int(window.page_size));
    write!(sql, " LIMIT ${limit_idx}").unwrap();
    let offset_idx = params.push(SqlParam::Int(window.offset));
    write!(sql, " OFFSET ${offset_idx}").unwrap();

    (sql, to_database_values(&params))
}

/// Builds the grid clustering statement and its parameters.
///
/// Modal status and category use `mode() WITHIN GROUP`, which ignores
/// nulls and resolves ties in a store-defined way.
#[must_use]
pub fn cluster_sql(query: &CompiledQuery, grid: f64) -> (String, Vec<DatabaseValue>) {
    let mut params = query.params().clone();
    let grid_idx = params.push(SqlParam::Real(grid));

    let sql = format!(
        "SELECT ST_AsGeoJSON(cell) AS geojson,
                COUNT(*) AS count,
                mode() WITHIN GROUP (ORDER BY status) AS status,
                mode() WITHIN GROUP (ORDER BY category) AS category,
                MAX(created_at) AS created_at
         FROM (
             SELECT ST_SnapToGrid(i.geom, ${grid_idx}) AS cell, i.status, i.category, i.created_at
             FROM incidents i
             WHERE {}
         ) snapped
         GROUP BY cell
         ORDER BY count DESC, created_at DESC",
        query.where_clause()
    );

    (sql, to_database_values(&params))
}

/// Builds the overlay statement and its parameters.
#[must_use]
pub fn overlay_sql(types: &[String], limit: i64) -> (String, Vec<DatabaseValue>) {
    let mut sql = String::from(
        "SELECT id, name, type, subtype, metadata::text AS metadata, ST_AsGeoJSON(geom) AS geojson
         FROM overlays",
    );
    let mut params = Vec::new();
    let mut param_idx = 1u32;

    if !types.is_empty() {
        write!(sql, " WHERE type = ANY(string_to_array(${param_idx}, ','))").unwrap();
        params.push(DatabaseValue::String(types.join(",")));
        param_idx += 1;
    }

    write!(sql, " ORDER BY id LIMIT ${param_idx}").unwrap();
    params.push(DatabaseValue::Int64(limit));

    (sql, params)
}

#[async_trait]
impl IncidentStore for PostgisStore {
    async fn jurisdiction_agency(&self, user_id: i64) -> Result<Option<i64>, StoreError> {
        let rows = self
            .query(
                "SELECT a.id AS agency_id
                 FROM agencies a
                 JOIN agency_staff s ON s.agency_id = a.id
                 WHERE s.user_id = $1 AND a.jurisdiction_geom IS NOT NULL
                 LIMIT 1",
                &[DatabaseValue::Int64(user_id)],
                false,
            )
            .await?;

        rows.first()
            .map(|row| row.to_value("agency_id").map_err(conversion("agency_id")))
            .transpose()
    }

    async fn list_incidents(
        &self,
        query: &CompiledQuery,
        window: PageWindow,
    ) -> Result<Vec<IncidentRecord>, StoreError> {
        let (sql, params) = listing_sql(query, window);
        let rows = self
            .query(&sql, &params, has_caller_geometry(query))
            .await?;

        let mut incidents = Vec::with_capacity(rows.len());
        for row in &rows {
            let created_at: NaiveDateTime =
                row.to_value("created_at").map_err(conversion("created_at"))?;

            incidents.push(IncidentRecord {
                id: row.to_value("id").map_err(conversion("id"))?,
                status: row.to_value("status").map_err(conversion("status"))?,
                category: row.to_value("category").unwrap_or(None),
                created_at: utc(created_at),
                geometry: row.to_value("geojson").unwrap_or(None),
            });
        }

        Ok(incidents)
    }

    async fn cluster_incidents(
        &self,
        query: &CompiledQuery,
        grid: f64,
    ) -> Result<Vec<ClusterRecord>, StoreError> {
        let (sql, params) = cluster_sql(query, grid);
        let rows = self
            .query(&sql, &params, has_caller_geometry(query))
            .await?;

        let mut cells = Vec::with_capacity(rows.len());
        for row in &rows {
            let created_at: Option<NaiveDateTime> = row.to_value("created_at").unwrap_or(None);

            cells.push(ClusterRecord {
                geometry: row.to_value("geojson").unwrap_or(None),
                count: row.to_value("count").map_err(conversion("count"))?,
                status: row.to_value("status").unwrap_or(None),
                category: row.to_value("category").unwrap_or(None),
                created_at: created_at.map(utc),
            });
        }

        Ok(cells)
    }

    async fn list_overlays(
        &self,
        types: &[String],
        limit: i64,
    ) -> Result<Vec<OverlayRecord>, StoreError> {
        let (sql, params) = overlay_sql(types, limit);
        let rows = self.query(&sql, &params, false).await?;

        let mut overlays = Vec::with_capacity(rows.len());
        for row in &rows {
            overlays.push(OverlayRecord {
                id: row.to_value("id").map_err(conversion("id"))?,
                name: row.to_value("name").unwrap_or_default(),
                overlay_type: row.to_value("type").unwrap_or_default(),
                subtype: row.to_value("subtype").unwrap_or(None),
                metadata: row.to_value("metadata").unwrap_or(None),
                geometry: row.to_value("geojson").unwrap_or(None),
            });
        }

        Ok(overlays)
    }
}

#[cfg(test)]
mod tests {
    use georise_gis_models::{BoundingBox, FilterSet};

    use super::*;
    use crate::GisConfig;
    use crate::compiler::{FilterCompiler, QueryMode};

    fn compiled(cluster: bool) -> CompiledQuery {
        let filter = FilterSet {
            bbox: Some(BoundingBox::new(38.6, 8.9, 39.1, 9.1)),
            category: Some("flood".to_string()),
            cluster,
            ..FilterSet::default()
        };
        let mut query = FilterCompiler::new(&GisConfig::default())
            .compile(&filter)
            .unwrap();
        query.push(Predicate::Jurisdiction { agency_id: 3 });
        query
    }

    #[test]
    fn listing_appends_limit_and_offset_after_predicates() {
        let query = compiled(false);
        let QueryMode::List(window) = query.mode() else {
            panic!("expected listing mode");
        };
        let (sql, params) = listing_sql(&query, window);

        assert!(sql.contains("WHERE i.geom IS NOT NULL AND ST_Intersects"));
        assert!(sql.contains("i.category = $5"));
        assert!(sql.contains("a.id = $6"));
        assert!(sql.contains("ORDER BY i.created_at DESC, i.id DESC LIMIT $7 OFFSET $8"));
        assert_eq!(params.len(), 8);
        assert!(matches!(params[6], DatabaseValue::Int64(200)));
        assert!(matches!(params[7], DatabaseValue::Int64(0)));
    }

    #[test]
    fn cluster_binds_grid_after_predicates() {
        let query = compiled(true);
        let (sql, params) = cluster_sql(&query, 0.02);

        assert!(sql.contains("ST_SnapToGrid(i.geom, $7)"));
        assert!(sql.contains("GROUP BY cell"));
        assert!(sql.contains("ORDER BY count DESC"));
        assert_eq!(params.len(), 7);
        assert!(matches!(params[6], DatabaseValue::Real64(g) if (g - 0.02).abs() < f64::EPSILON));
    }

    #[test]
    fn overlay_filter_is_optional() {
        let (all, params) = overlay_sql(&[], 500);
        assert!(!all.contains("WHERE"));
        assert!(all.ends_with("ORDER BY id LIMIT $1"));
        assert_eq!(params.len(), 1);

        let (filtered, params) =
            overlay_sql(&["hospital".to_string(), "police".to_string()], 500);
        assert!(filtered.contains("type = ANY(string_to_array($1, ','))"));
        assert!(filtered.ends_with("LIMIT $2"));
        assert!(matches!(&params[0], DatabaseValue::String(s) if s == "hospital,police"));
    }

    #[test]
    fn geometry_errors_count_only_for_polygon_queries() {
        assert!(!has_caller_geometry(&compiled(false)));

        let with_polygon = FilterCompiler::new(&GisConfig::default())
            .compile(&FilterSet {
                bbox: Some(BoundingBox::new(38.6, 8.9, 39.1, 9.1)),
                polygon: Some(
                    r#"{"type":"Polygon","coordinates":[[[38.7,9.0],[38.8,9.0],[38.8,9.05],[38.7,9.0]]]}"#
                        .to_string(),
                ),
                ..FilterSet::default()
            })
            .unwrap();
        assert!(has_caller_geometry(&with_polygon));

        assert!(is_geometry_input_error(
            "ERROR: Invalid GeoJSON representation"
        ));
        assert!(is_geometry_input_error("GEOSIntersects: TopologyException: side location conflict"));
        assert!(!is_geometry_input_error("canceling statement due to statement timeout"));
    }

    #[test]
    fn timestamps_bind_as_naive_utc() {
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        assert!(matches!(
            to_database_value(&SqlParam::Timestamp(at)),
            DatabaseValue::DateTime(naive) if naive == at.naive_utc()
        ));
    }
}
