//! In-process [`IncidentStore`] that evaluates compiled predicates with
//! `geo`, used to exercise the engine and HTTP layer without `PostGIS`.
//!
//! Distances use the haversine formula on a spherical earth, which agrees
//! with `PostGIS` geography distances to well under a meter at city
//! scale. Cluster cells snap with round-half-to-even like
//! `ST_SnapToGrid`; modal ties pick the smallest value.

#![allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use geo::{
    Closest, ClosestPoint as _, Coord, Geometry, Intersects as _, MapCoords as _, MultiPolygon,
    Point,
};
use georise_gis_models::IncidentStatus;

use crate::compiler::{CompiledQuery, PageWindow, Predicate};
use crate::store::{ClusterRecord, IncidentRecord, IncidentStore, OverlayRecord, StoreError};

const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// A stored incident. `location` is `(lng, lat)`.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryIncident {
    pub id: i64,
    pub status: IncidentStatus,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub location: Option<(f64, f64)>,
}

impl MemoryIncident {
    #[must_use]
    pub const fn new(id: i64, status: IncidentStatus, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            status,
            category: None,
            created_at,
            location: None,
        }
    }

    #[must_use]
    pub const fn located(mut self, lng: f64, lat: f64) -> Self {
        self.location = Some((lng, lat));
        self
    }

    #[must_use]
    pub fn category(mut self, category: &str) -> Self {
        self.category = Some(category.to_string());
        self
    }
}

/// A stored overlay.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryOverlay {
    pub id: i64,
    pub name: String,
    pub overlay_type: String,
    pub subtype: Option<String>,
    pub metadata: serde_json::Value,
    pub geometry: Geometry<f64>,
}

impl MemoryOverlay {
    #[must_use]
    pub fn new(id: i64, name: &str, overlay_type: &str, geometry: impl Into<Geometry<f64>>) -> Self {
        Self {
            id,
            name: name.to_string(),
            overlay_type: overlay_type.to_string(),
            subtype: None,
            metadata: serde_json::Value::Null,
            geometry: geometry.into(),
        }
    }
}

#[derive(Default)]
struct State {
    incidents: Vec<MemoryIncident>,
    overlays: Vec<MemoryOverlay>,
    agencies: BTreeMap<i64, Option<MultiPolygon<f64>>>,
    staff: BTreeMap<i64, i64>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_next: Mutex<Option<StoreError>>,
    incident_queries: AtomicUsize,
    jurisdiction_lookups: AtomicUsize,
}

impl MemoryStore {
    pub fn add_incident(&self, incident: MemoryIncident) {
        self.state().incidents.push(incident);
    }

    pub fn add_overlay(&self, overlay: MemoryOverlay) {
        self.state().overlays.push(overlay);
    }

    /// Registers an agency with an optional jurisdiction polygon, replacing
    /// any previous one.
    pub fn add_agency(&self, agency_id: i64, jurisdiction: Option<MultiPolygon<f64>>) {
        self.state().agencies.insert(agency_id, jurisdiction);
    }

    /// Assigns `user_id` to `agency_id`.
    pub fn add_staff(&self, user_id: i64, agency_id: i64) {
        self.state().staff.insert(user_id, agency_id);
    }

    /// Makes the next store call fail with `error`.
    pub fn fail_next(&self, error: StoreError) {
        *self
            .fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    /// Number of listing and cluster queries executed.
    #[must_use]
    pub fn incident_queries(&self) -> usize {
        self.incident_queries.load(Ordering::SeqCst)
    }

    /// Number of jurisdiction lookups executed.
    #[must_use]
    pub fn jurisdiction_lookups(&self) -> usize {
        self.jurisdiction_lookups.load(Ordering::SeqCst)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_failure(&self) -> Result<(), StoreError> {
        self.fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map_or(Ok(()), Err)
    }

    fn matching(&self, query: &CompiledQuery) -> Result<Vec<MemoryIncident>, StoreError> {
        self.take_failure()?;
        self.incident_queries.fetch_add(1, Ordering::SeqCst);

        let state = self.state();
        let now = Utc::now();
        let mut matched = Vec::new();

        'incidents: for incident in &state.incidents {
            for predicate in query.predicates() {
                if !evaluate(predicate, incident, &state, now)? {
                    continue 'incidents;
                }
            }
            matched.push(incident.clone());
        }

        Ok(matched)
    }
}

fn evaluate(
    predicate: &Predicate,
    incident: &MemoryIncident,
    state: &State,
    now: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let point = incident.location.map(|(lng, lat)| Point::new(lng, lat));

    Ok(match predicate {
        Predicate::HasGeometry => point.is_some(),
        Predicate::Envelope { bbox } => point.is_some_and(|p| bbox.contains(p.x(), p.y())),
        Predicate::Polygon { geometry } => {
            let shape = to_geo(geometry)?;
            point.is_some_and(|p| shape.intersects(&p))
        }
        Predicate::WithinDistance { lng, lat, meters } => {
            point.is_some_and(|p| haversine_meters(p, Point::new(*lng, *lat)) <= *meters)
        }
        Predicate::CreatedWithinHours { hours } => {
            TimeDelta::try_milliseconds((hours * 3_600_000.0) as i64)
                .and_then(|window| now.checked_sub_signed(window))
                .is_none_or(|since| incident.created_at >= since)
        }
        Predicate::CreatedFrom { at } => incident.created_at >= *at,
        Predicate::CreatedTo { at } => incident.created_at <= *at,
        Predicate::Status { status } => incident.status == *status,
        Predicate::Category { category } => incident.category.as_ref() == Some(category),
        Predicate::NearOverlay { types, meters } => point.is_some_and(|p| {
            state
                .overlays
                .iter()
                .filter(|overlay| types.contains(&overlay.overlay_type))
                .any(|overlay| distance_to(&overlay.geometry, p) <= *meters)
        }),
        Predicate::Jurisdiction { agency_id } => match state.agencies.get(agency_id) {
            Some(Some(area)) => point.is_some_and(|p| area.intersects(&p)),
            _ => false,
        },
    })
}

fn to_geo(geometry: &serde_json::Value) -> Result<Geometry<f64>, StoreError> {
    let rejected = |message: String| StoreError::Rejected { message };
    let parsed: geojson::Geometry = serde_json::from_value(geometry.clone())
        .map_err(|e| rejected(format!("Invalid GeoJSON representation: {e}")))?;
    parsed
        .try_into()
        .map_err(|e: geojson::Error| rejected(format!("Invalid geometry: {e}")))
}

fn haversine_meters(a: Point<f64>, b: Point<f64>) -> f64 {
    let (lat1, lat2) = (a.y().to_radians(), b.y().to_radians());
    let dlat = lat2 - lat1;
    let dlng = (b.x() - a.x()).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().asin()
}

/// Zero inside the geometry, otherwise the distance to the closest point on
/// its edges. The closest point is searched in a plane whose longitude is
/// scaled by `cos(lat)` at the incident, so both axes weigh alike.
fn distance_to(geometry: &Geometry<f64>, point: Point<f64>) -> f64 {
    if geometry.intersects(&point) {
        return 0.0;
    }

    let scale = point.y().to_radians().cos().max(f64::EPSILON);
    let local = geometry.map_coords(|c| Coord {
        x: c.x * scale,
        y: c.y,
    });
    match local.closest_point(&Point::new(point.x() * scale, point.y())) {
        Closest::Intersection(_) => 0.0,
        Closest::SinglePoint(nearest) => {
            haversine_meters(point, Point::new(nearest.x() / scale, nearest.y()))
        }
        Closest::Indeterminate => f64::INFINITY,
    }
}

fn point_json(lng: f64, lat: f64) -> String {
    serde_json::json!({ "type": "Point", "coordinates": [lng, lat] }).to_string()
}

/// Most frequent value; ties resolve to the smallest.
fn mode<T: Ord>(values: impl IntoIterator<Item = T>) -> Option<T> {
    let mut counts = BTreeMap::new();
    for value in values {
        *counts.entry(value).or_insert(0_usize) += 1;
    }

    let mut best: Option<(T, usize)> = None;
    for (value, count) in counts {
        if best.as_ref().is_none_or(|(_, most)| count > *most) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value)
}

#[async_trait]
impl IncidentStore for MemoryStore {
    async fn jurisdiction_agency(&self, user_id: i64) -> Result<Option<i64>, StoreError> {
        self.take_failure()?;
        self.jurisdiction_lookups.fetch_add(1, Ordering::SeqCst);

        let state = self.state();
        Ok(state.staff.get(&user_id).copied().filter(|agency_id| {
            state
                .agencies
                .get(agency_id)
                .is_some_and(Option::is_some)
        }))
    }

    async fn list_incidents(
        &self,
        query: &CompiledQuery,
        window: PageWindow,
    ) -> Result<Vec<IncidentRecord>, StoreError> {
        let mut matched = self.matching(query)?;
        matched.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        Ok(matched
            .into_iter()
            .skip(usize::try_from(window.offset).unwrap_or(usize::MAX))
            .take(usize::try_from(window.page_size).unwrap_or(0))
            .map(|incident| IncidentRecord {
                id: incident.id,
                status: incident.status.to_string(),
                category: incident.category,
                created_at: incident.created_at,
                geometry: incident.location.map(|(lng, lat)| point_json(lng, lat)),
            })
            .collect())
    }

    async fn cluster_incidents(
        &self,
        query: &CompiledQuery,
        grid: f64,
    ) -> Result<Vec<ClusterRecord>, StoreError> {
        let mut cells: BTreeMap<(i64, i64), Vec<MemoryIncident>> = BTreeMap::new();
        for incident in self.matching(query)? {
            if let Some((lng, lat)) = incident.location {
                let cell = (
                    (lng / grid).round_ties_even() as i64,
                    (lat / grid).round_ties_even() as i64,
                );
                cells.entry(cell).or_default().push(incident);
            }
        }

        let mut records: Vec<ClusterRecord> = cells
            .into_iter()
            .map(|((x, y), members)| ClusterRecord {
                geometry: Some(point_json(x as f64 * grid, y as f64 * grid)),
                count: members.len() as i64,
                status: mode(members.iter().map(|m| m.status)).map(|s| s.to_string()),
                category: mode(members.iter().filter_map(|m| m.category.clone())),
                created_at: members.iter().map(|m| m.created_at).max(),
            })
            .collect();

        records.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });

        Ok(records)
    }

    async fn list_overlays(
        &self,
        types: &[String],
        limit: i64,
    ) -> Result<Vec<OverlayRecord>, StoreError> {
        self.take_failure()?;

        let state = self.state();
        let mut overlays: Vec<&MemoryOverlay> = state
            .overlays
            .iter()
            .filter(|overlay| types.is_empty() || types.contains(&overlay.overlay_type))
            .collect();
        overlays.sort_by_key(|overlay| overlay.id);

        overlays
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|overlay| -> Result<OverlayRecord, StoreError> {
                let geometry =
                    geojson::Geometry::new(geojson::Value::from(&overlay.geometry));
                Ok(OverlayRecord {
                    id: overlay.id,
                    name: overlay.name.clone(),
                    overlay_type: overlay.overlay_type.clone(),
                    subtype: overlay.subtype.clone(),
                    metadata: (!overlay.metadata.is_null()).then(|| overlay.metadata.to_string()),
                    geometry: Some(serde_json::to_string(&geometry).map_err(|e| {
                        StoreError::Conversion {
                            message: e.to_string(),
                        }
                    })?),
                })
            })
            .collect()
    }
}
