//! Request orchestration: compile, scope, key, then read through the cache.

use std::sync::Arc;

use georise_cache::{Cached, QueryCache};
use georise_gis_models::{Caller, FilterSet, JurisdictionScope, Role};
use serde::Serialize;

use crate::compiler::{CompiledQuery, FilterCompiler, Predicate, QueryMode};
use crate::config::GisConfig;
use crate::jurisdiction::{self, JurisdictionResolver};
use crate::materialize::Materializer;
use crate::store::IncidentStore;
use crate::{GisError, cache_key};

/// Everything that determines a response body. Two requests share a cache
/// entry only if their fingerprints are equal.
#[derive(Serialize)]
struct Fingerprint<'a> {
    endpoint: &'a str,
    role: Role,
    scope: JurisdictionScope,
    predicates: &'a [Predicate],
    mode: QueryMode,
}

#[derive(Serialize)]
struct OverlayFingerprint<'a> {
    types: &'a [String],
    limit: i64,
}

/// The GIS query engine.
#[derive(Clone)]
pub struct GisEngine {
    compiler: FilterCompiler,
    resolver: JurisdictionResolver,
    materializer: Materializer,
    cache: QueryCache,
    config: GisConfig,
}

impl GisEngine {
    #[must_use]
    pub fn new(store: Arc<dyn IncidentStore>, cache: QueryCache, config: GisConfig) -> Self {
        Self {
            compiler: FilterCompiler::new(&config),
            resolver: JurisdictionResolver::new(Arc::clone(&store)),
            materializer: Materializer::new(store),
            cache,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &GisConfig {
        &self.config
    }

    /// `GET /gis/incidents`: a page of features or grid clusters.
    ///
    /// # Errors
    ///
    /// * [`GisError::InvalidFilter`] before any store or cache access
    /// * [`GisError::Jurisdiction`] if the caller's scope cannot be resolved
    /// * [`GisError::QueryExecution`] if the store fails on a cache miss
    pub async fn incidents(&self, caller: &Caller, filter: &FilterSet) -> Result<Cached, GisError> {
        let query = self.compiler.compile(filter)?;
        self.scoped("incidents", caller, query).await
    }

    /// `GET /gis/incidents/nearby`: features within a radius, capped, no
    /// pagination.
    ///
    /// # Errors
    ///
    /// Same as [`Self::incidents`].
    pub async fn nearby(&self, caller: &Caller, filter: &FilterSet) -> Result<Cached, GisError> {
        let query = self
            .compiler
            .compile_nearby(filter, self.config.nearby_limit)?;
        self.scoped("nearby", caller, query).await
    }

    /// `GET /gis/overlays`: overlay features of the given types.
    ///
    /// # Errors
    ///
    /// Returns [`GisError::Overlays`] if the store fails on a cache miss.
    pub async fn overlays(&self, types: &[String]) -> Result<Cached, GisError> {
        let limit = self.config.overlay_limit;
        let key = cache_key::derive("overlays", &OverlayFingerprint { types, limit })?;

        self.cache
            .get_or_compute(&key, self.config.overlay_cache_ttl, || async {
                let collection = self.materializer.overlays(types, limit).await?;
                Ok::<_, GisError>(serde_json::to_string(&collection)?)
            })
            .await
    }

    async fn scoped(
        &self,
        endpoint: &str,
        caller: &Caller,
        mut query: CompiledQuery,
    ) -> Result<Cached, GisError> {
        let scope = self.resolver.resolve(caller).await?;
        jurisdiction::apply(scope, &mut query);

        let key = cache_key::derive(
            endpoint,
            &Fingerprint {
                endpoint,
                role: caller.role,
                scope,
                predicates: query.predicates(),
                mode: query.mode(),
            },
        )?;

        self.cache
            .get_or_compute(&key, self.config.cache_ttl, || self.execute(&query))
            .await
    }

    async fn execute(&self, query: &CompiledQuery) -> Result<String, GisError> {
        let body = match query.mode() {
            QueryMode::List(window) => {
                serde_json::to_string(&self.materializer.list(query, window).await?)?
            }
            QueryMode::Cluster { grid } => {
                serde_json::to_string(&self.materializer.cluster(query, grid).await?)?
            }
        };
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, TimeDelta, Utc};
    use geo::{MultiPolygon, Point, polygon};
    use georise_cache::{CacheBackend, MemoryCache};
    use georise_gis_models::{BoundingBox, FilterError, IncidentQueryParams, IncidentStatus};
    use serde_json::Value;

    use super::*;
    use crate::memory::{MemoryIncident, MemoryOverlay, MemoryStore};
    use crate::store::StoreError;

    const ADMIN: Caller = Caller::new(1, Role::Admin);
    const STAFF_NORTH: Caller = Caller::new(10, Role::AgencyStaff);
    const STAFF_SOUTH: Caller = Caller::new(20, Role::AgencyStaff);

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    /// Two agencies splitting the bbox at latitude 9.0, three located
    /// incidents in one 0.02° cell in the north, one in the south, and one
    /// without geometry.
    fn store() -> Arc<MemoryStore> {
        let store = MemoryStore::default();

        let north = polygon![(x: 38.6, y: 9.0), (x: 39.1, y: 9.0), (x: 39.1, y: 9.1), (x: 38.6, y: 9.1)];
        let south = polygon![(x: 38.6, y: 8.9), (x: 39.1, y: 8.9), (x: 39.1, y: 9.0), (x: 38.6, y: 9.0)];
        store.add_agency(1, Some(MultiPolygon::new(vec![north])));
        store.add_agency(2, Some(MultiPolygon::new(vec![south])));
        store.add_staff(10, 1);
        store.add_staff(20, 2);

        for (id, lng, lat) in [(1, 38.751, 9.011), (2, 38.752, 9.012), (3, 38.753, 9.013)] {
            store.add_incident(
                MemoryIncident::new(id, IncidentStatus::Verified, at(id * 10))
                    .located(lng, lat)
                    .category("flood"),
            );
        }
        store.add_incident(
            MemoryIncident::new(4, IncidentStatus::Submitted, at(40)).located(38.9, 8.95),
        );
        store.add_incident(MemoryIncident::new(5, IncidentStatus::Submitted, at(50)));

        store.add_overlay(MemoryOverlay::new(
            1,
            "Black Lion",
            "hospital",
            Point::new(38.7515, 9.0115),
        ));
        store.add_overlay(MemoryOverlay::new(
            2,
            "Station 4",
            "police",
            Point::new(38.95, 8.95),
        ));

        Arc::new(store)
    }

    fn engine_with(store: Arc<MemoryStore>, backend: Arc<dyn CacheBackend>) -> GisEngine {
        GisEngine::new(store, QueryCache::new(backend), GisConfig::default())
    }

    fn engine(store: Arc<MemoryStore>) -> GisEngine {
        engine_with(store, Arc::new(MemoryCache::new(64)))
    }

    fn bbox() -> FilterSet {
        FilterSet {
            bbox: Some(BoundingBox::new(38.6, 8.9, 39.1, 9.1)),
            ..FilterSet::default()
        }
    }

    fn ids(body: &str) -> Vec<i64> {
        let value: Value = serde_json::from_str(body).unwrap();
        value["features"]
            .as_array()
            .unwrap()
            .iter()
            .map(|f| f["properties"]["id"].as_i64().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn bbox_listing_skips_incidents_without_geometry() {
        let engine = engine(store());
        let result = engine.incidents(&ADMIN, &bbox()).await.unwrap();

        assert!(!result.hit);
        assert_eq!(ids(&result.body), vec![4, 3, 2, 1]);
        let value: Value = serde_json::from_str(&result.body).unwrap();
        assert_eq!(value["type"], "FeatureCollection");
        assert_eq!(value["features"][0]["geometry"]["type"], "Point");
    }

    #[tokio::test]
    async fn cluster_mode_groups_one_cell() {
        let engine = engine(store());
        let filter = FilterSet {
            cluster: true,
            ..bbox()
        };
        let result = engine.incidents(&STAFF_NORTH, &filter).await.unwrap();

        let value: Value = serde_json::from_str(&result.body).unwrap();
        let features = value["features"].as_array().unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0]["properties"]["count"], 3);
        assert_eq!(features[0]["properties"]["id"], 0);
        assert_eq!(features[0]["properties"]["status"], "verified");
        assert_eq!(features[0]["properties"]["category"], "flood");
    }

    #[tokio::test]
    async fn missing_bbox_fails_before_store_or_cache() {
        let store = store();
        let engine = engine(Arc::clone(&store));

        let err = engine
            .incidents(&ADMIN, &FilterSet::default())
            .await
            .unwrap_err();

        assert!(matches!(err, GisError::InvalidFilter(FilterError::MissingBbox)));
        assert_eq!(store.incident_queries(), 0);
        assert_eq!(store.jurisdiction_lookups(), 0);
    }

    #[tokio::test]
    async fn repeat_request_is_served_byte_identical_from_cache() {
        let store = store();
        let engine = engine(Arc::clone(&store));

        let first = engine.incidents(&ADMIN, &bbox()).await.unwrap();
        let second = engine.incidents(&ADMIN, &bbox()).await.unwrap();

        assert!(!first.hit);
        assert!(second.hit);
        assert_eq!(first.body, second.body);
        assert_eq!(store.incident_queries(), 1);
    }

    #[tokio::test]
    async fn agencies_never_share_cache_entries() {
        let store = store();
        let engine = engine(Arc::clone(&store));

        let north = engine.incidents(&STAFF_NORTH, &bbox()).await.unwrap();
        let south = engine.incidents(&STAFF_SOUTH, &bbox()).await.unwrap();
        let north_again = engine.incidents(&STAFF_NORTH, &bbox()).await.unwrap();

        assert_eq!(ids(&north.body), vec![3, 2, 1]);
        assert!(!south.hit);
        assert_eq!(ids(&south.body), vec![4]);
        assert!(north_again.hit);
        assert_eq!(north_again.body, north.body);
        assert_eq!(store.incident_queries(), 2);
    }

    #[tokio::test]
    async fn jurisdiction_is_resolved_on_every_request() {
        let store = store();
        let engine = engine(Arc::clone(&store));

        engine.incidents(&STAFF_NORTH, &bbox()).await.unwrap();
        engine.incidents(&STAFF_NORTH, &bbox()).await.unwrap();

        assert_eq!(store.jurisdiction_lookups(), 2);
    }

    #[tokio::test]
    async fn reassigned_staff_see_their_new_jurisdiction() {
        let store = store();
        let engine = engine(Arc::clone(&store));

        let before = engine.incidents(&STAFF_NORTH, &bbox()).await.unwrap();
        store.add_staff(STAFF_NORTH.id, 2);
        let after = engine.incidents(&STAFF_NORTH, &bbox()).await.unwrap();

        assert!(!after.hit);
        assert_ne!(before.body, after.body);
        assert_eq!(ids(&after.body), vec![4]);
    }

    #[tokio::test]
    async fn jurisdiction_failure_is_not_widened() {
        let store = store();
        store.fail_next(StoreError::Conversion {
            message: "connection reset".to_string(),
        });
        let engine = engine(Arc::clone(&store));

        let err = engine.incidents(&STAFF_NORTH, &bbox()).await.unwrap_err();
        assert!(matches!(err, GisError::Jurisdiction(_)));
        assert_eq!(store.incident_queries(), 0);
    }

    #[tokio::test]
    async fn pages_do_not_share_entries() {
        let engine = engine(store());
        let page = |page| FilterSet {
            page: Some(page),
            page_size: Some(2),
            ..bbox()
        };

        let first = engine.incidents(&ADMIN, &page(1)).await.unwrap();
        let second = engine.incidents(&ADMIN, &page(2)).await.unwrap();

        assert_eq!(ids(&first.body), vec![4, 3]);
        assert!(!second.hit);
        assert_eq!(ids(&second.body), vec![2, 1]);
    }

    #[tokio::test]
    async fn status_and_category_narrow_listing() {
        let engine = engine(store());
        let listing = |status, category: Option<&str>| FilterSet {
            status,
            category: category.map(str::to_string),
            ..bbox()
        };

        let verified_floods = engine
            .incidents(&ADMIN, &listing(Some(IncidentStatus::Verified), Some("flood")))
            .await
            .unwrap();
        let submitted_floods = engine
            .incidents(&ADMIN, &listing(Some(IncidentStatus::Submitted), Some("flood")))
            .await
            .unwrap();
        let submitted = engine
            .incidents(&ADMIN, &listing(Some(IncidentStatus::Submitted), None))
            .await
            .unwrap();

        assert_eq!(ids(&verified_floods.body), vec![3, 2, 1]);
        assert!(ids(&submitted_floods.body).is_empty());
        assert_eq!(ids(&submitted.body), vec![4]);
    }

    #[tokio::test]
    async fn time_window_bounds_are_inclusive() {
        let store = store();
        let engine = engine(Arc::clone(&store));
        let window = FilterSet {
            from: Some(at(20)),
            to: Some(at(30)),
            ..bbox()
        };

        let result = engine.incidents(&ADMIN, &window).await.unwrap();
        assert_eq!(ids(&result.body), vec![3, 2]);

        let inverted = FilterSet {
            from: Some(at(30)),
            to: Some(at(20)),
            ..bbox()
        };
        let err = engine.incidents(&ADMIN, &inverted).await.unwrap_err();
        assert!(matches!(
            err,
            GisError::InvalidFilter(FilterError::InvalidTimeRange)
        ));
        assert_eq!(store.incident_queries(), 1);
    }

    #[tokio::test]
    async fn trending_hours_window_is_relative_to_now() {
        let store = store();
        store.add_incident(
            MemoryIncident::new(6, IncidentStatus::Submitted, Utc::now() - TimeDelta::hours(2))
                .located(38.8, 9.05),
        );
        let engine = engine(store);

        let recent = FilterSet {
            trending_hours: Some(24.0),
            ..bbox()
        };
        let result = engine.incidents(&ADMIN, &recent).await.unwrap();
        assert_eq!(ids(&result.body), vec![6]);

        let too_long = FilterSet {
            trending_hours: Some(1e300),
            ..bbox()
        };
        let err = engine.incidents(&ADMIN, &too_long).await.unwrap_err();
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn polygon_filter_intersects_incidents() {
        let engine = engine(store());
        let around_south = FilterSet {
            polygon: Some(
                r#"{"type":"Feature","properties":{},"geometry":{"type":"Polygon","coordinates":[[[38.85,8.9],[38.95,8.9],[38.95,9.0],[38.85,9.0],[38.85,8.9]]]}}"#
                    .to_string(),
            ),
            ..bbox()
        };

        let result = engine.incidents(&ADMIN, &around_south).await.unwrap();
        assert_eq!(ids(&result.body), vec![4]);

        let not_polygon = FilterSet {
            polygon: Some(r#"{"type":"Point","coordinates":[38.9,8.95]}"#.to_string()),
            ..bbox()
        };
        assert!(matches!(
            engine.incidents(&ADMIN, &not_polygon).await.unwrap_err(),
            GisError::InvalidFilter(FilterError::InvalidPolygon)
        ));
    }

    #[tokio::test]
    async fn oversized_page_size_is_clamped() {
        let engine = engine(store());
        let filter = FilterSet::from_params(&IncidentQueryParams {
            bbox: Some("38.6,8.9,39.1,9.1".to_string()),
            page_size: Some("100000000000000000000".to_string()),
            ..IncidentQueryParams::default()
        })
        .unwrap();

        let result = engine.incidents(&ADMIN, &filter).await.unwrap();
        assert_eq!(ids(&result.body), vec![4, 3, 2, 1]);
        assert_eq!(
            engine.compiler.compile(&filter).unwrap().mode(),
            QueryMode::List(crate::compiler::PageWindow {
                page: 1,
                page_size: engine.config().max_page_size,
                offset: 0,
            })
        );
    }

    #[tokio::test]
    async fn overlay_proximity_filters_incidents() {
        let engine = engine(store());
        let filter = FilterSet {
            critical_types: vec!["hospital".to_string()],
            critical_km: Some(0.5),
            ..bbox()
        };

        let result = engine.incidents(&ADMIN, &filter).await.unwrap();
        assert_eq!(ids(&result.body), vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn nearby_applies_radius_and_scope() {
        let engine = engine(store());
        let filter = FilterSet {
            lat: Some(9.0),
            lng: Some(38.75),
            within_km: Some(50.0),
            ..FilterSet::default()
        };

        let admin = engine.nearby(&ADMIN, &filter).await.unwrap();
        let south = engine.nearby(&STAFF_SOUTH, &filter).await.unwrap();

        assert_eq!(ids(&admin.body), vec![4, 3, 2, 1]);
        assert_eq!(ids(&south.body), vec![4]);
    }

    #[tokio::test]
    async fn overlays_are_cached_separately_from_incidents() {
        let engine = engine(store());

        let first = engine.overlays(&["police".to_string()]).await.unwrap();
        let second = engine.overlays(&["police".to_string()]).await.unwrap();
        let all = engine.overlays(&[]).await.unwrap();

        assert!(second.hit);
        assert_eq!(ids(&first.body), vec![2]);
        assert!(!all.hit);
        assert_eq!(ids(&all.body), vec![1, 2]);

        let value: Value = serde_json::from_str(&first.body).unwrap();
        assert_eq!(value["features"][0]["properties"]["type"], "police");
        assert_eq!(value["features"][0]["properties"]["name"], "Station 4");
    }

    #[tokio::test]
    async fn store_errors_are_not_cached() {
        let store = store();
        let engine = engine(Arc::clone(&store));

        store.fail_next(StoreError::Rejected {
            message: "Invalid GeoJSON representation".to_string(),
        });
        let err = engine.incidents(&ADMIN, &bbox()).await.unwrap_err();
        assert!(err.is_client_error());

        let retried = engine.incidents(&ADMIN, &bbox()).await.unwrap();
        assert!(!retried.hit);
    }

    /// Backend that silently drops every write.
    struct StallingWrites(MemoryCache);

    #[async_trait]
    impl CacheBackend for StallingWrites {
        async fn get(&self, key: &str) -> Option<String> {
            self.0.lookup(key).await
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Option<Duration>) {}
    }

    #[tokio::test]
    async fn dropped_cache_writes_do_not_fail_requests() {
        let store = store();
        let engine = engine_with(
            Arc::clone(&store),
            Arc::new(StallingWrites(MemoryCache::new(4))),
        );

        let first = engine.incidents(&ADMIN, &bbox()).await.unwrap();
        let second = engine.incidents(&ADMIN, &bbox()).await.unwrap();

        assert_eq!(first.body, second.body);
        assert!(!second.hit);
        assert_eq!(store.incident_queries(), 2);
    }
}
