#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for the GeoRise GIS endpoints.
//!
//! Serves incident listings, grid clusters, nearby searches, and reference
//! overlays as `GeoJSON`, scoped to the caller's agency jurisdiction and
//! read through a short-TTL cache.

pub mod auth;
pub mod cors;
mod handlers;
pub mod request_id;

use std::sync::Arc;

use actix_web::{App, HttpServer, middleware, web};
use georise_cache::{CacheConfig, QueryCache, build_backend};
use georise_database::{DbError, db};
use georise_gis::postgis::PostgisStore;
use georise_gis::{GisConfig, GisEngine};
use thiserror::Error;

/// Default port when `PORT` is unset.
pub const DEFAULT_PORT: u16 = 8000;

/// Shared application state.
pub struct AppState {
    /// The GIS query engine.
    pub engine: GisEngine,
}

/// Errors that stop the server from starting.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Database(#[from] DbError),
}

/// Registers the health route and the `/gis` scope.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(handlers::health)).service(
        web::scope("/gis")
            .route("/incidents", web::get().to(handlers::incidents))
            .route("/incidents/nearby", web::get().to(handlers::nearby))
            .route("/overlays", web::get().to(handlers::overlays)),
    );
}

/// Starts the GIS API server.
///
/// Connects to the `PostGIS` database, selects the cache backend, and
/// starts the Actix-Web HTTP server. The caller is responsible for
/// providing the async runtime (e.g. via `#[actix_web::main]`).
///
/// # Errors
///
/// Returns [`ServerError`] if the database connection fails or the HTTP
/// server fails to bind or encounters a runtime error.
#[allow(clippy::future_not_send)]
pub async fn run_server() -> Result<(), ServerError> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    log::info!("Connecting to database...");
    let db_conn = db::connect_from_env().await?;

    log::info!("Initializing cache...");
    let backend = build_backend(&CacheConfig::from_env()).await;

    let config = GisConfig::from_env();
    log::debug!("GIS config: {config:?}");

    let store = Arc::new(PostgisStore::new(Arc::from(db_conn)));
    let state = web::Data::new(AppState {
        engine: GisEngine::new(store, QueryCache::new(backend), config),
    });

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    let allowed_origins = cors::allowed_origins_from_env();
    if allowed_origins.is_empty() {
        log::warn!("ALLOWED_ORIGINS is unset, accepting requests from any origin");
    } else {
        log::info!("CORS allowlist: {allowed_origins:?}");
    }

    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        let cors = cors::build_cors(&allowed_origins);

        App::new()
            .wrap(request_id::RequestId)
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((bind_addr, port))?
    .run()
    .await?;

    Ok(())
}
