//! HTTP handler functions for the GIS API.

use actix_web::http::header::ContentType;
use actix_web::{HttpResponse, web};
use georise_cache::Cached;
use georise_gis::GisError;
use georise_gis::config::{NEARBY_DEFAULT_KM, NEARBY_MAX_KM, NEARBY_MIN_KM};
use georise_gis_models::{
    FilterError, FilterSet, IncidentQueryParams, NearbyQueryParams, OverlayQueryParams,
};
use serde::Serialize;

use crate::AppState;
use crate::auth::GisCaller;

pub const CACHE_HEADER: &str = "x-cache";

/// Service name reported by `/health`.
pub const SERVICE_NAME: &str = "georise-backend";

#[derive(Debug, Serialize)]
pub struct ApiHealth {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// `GET /health`
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(ApiHealth {
        status: "ok",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /gis/incidents`
///
/// Incidents in a bounding box, optionally narrowed by polygon, radius,
/// time window, status, category, and overlay proximity. `cluster=1`
/// returns grid clusters instead of individual features.
pub async fn incidents(
    state: web::Data<AppState>,
    caller: GisCaller,
    params: web::Query<IncidentQueryParams>,
) -> HttpResponse {
    let filter = match FilterSet::from_params(&params) {
        Ok(filter) => filter,
        Err(e) => return bad_request(&e),
    };

    respond(
        state.engine.incidents(&caller.0, &filter).await,
        "Failed to query incidents",
    )
}

/// `GET /gis/incidents/nearby`
///
/// Incidents within `radiusKm` of a point, capped and unpaginated.
pub async fn nearby(
    state: web::Data<AppState>,
    caller: GisCaller,
    params: web::Query<NearbyQueryParams>,
) -> HttpResponse {
    let filter = match FilterSet::nearby(&params, NEARBY_DEFAULT_KM, NEARBY_MIN_KM, NEARBY_MAX_KM)
    {
        Ok(filter) => filter,
        Err(e) => return bad_request(&e),
    };

    respond(
        state.engine.nearby(&caller.0, &filter).await,
        "Failed to query nearby incidents",
    )
}

/// `GET /gis/overlays`
///
/// Reference overlays, optionally restricted to a comma-separated list of
/// types.
pub async fn overlays(
    state: web::Data<AppState>,
    _caller: GisCaller,
    params: web::Query<OverlayQueryParams>,
) -> HttpResponse {
    respond(
        state.engine.overlays(&params.type_list()).await,
        "Failed to query overlays",
    )
}

fn bad_request(e: &FilterError) -> HttpResponse {
    HttpResponse::BadRequest().json(serde_json::json!({
        "error": e.to_string()
    }))
}

/// Writes a cached payload byte-for-byte, or maps the engine error to a
/// status code.
fn respond(result: Result<Cached, GisError>, failure: &str) -> HttpResponse {
    match result {
        Ok(cached) => HttpResponse::Ok()
            .content_type(ContentType::json())
            .insert_header((CACHE_HEADER, if cached.hit { "HIT" } else { "MISS" }))
            .body(cached.body),
        Err(GisError::InvalidFilter(e)) => bad_request(&e),
        Err(e) if e.is_client_error() => {
            // The store only rejects geometry it could not parse.
            log::warn!("Rejected query input: {e}");
            bad_request(&FilterError::InvalidPolygon)
        }
        Err(e) => {
            log::error!("{failure}: {e}");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": failure
            }))
        }
    }
}
