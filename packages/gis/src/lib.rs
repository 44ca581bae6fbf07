#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geospatial incident query engine.
//!
//! Turns an optional set of spatial, temporal, and categorical filters into
//! a jurisdiction-scoped, paginated or clustered `GeoJSON` result:
//!
//! 1. [`compiler`] validates the [`FilterSet`] and renders it into ordered
//!    SQL fragments with positional parameters.
//! 2. [`jurisdiction`] resolves the caller's scope fresh on every request
//!    and contributes one more predicate.
//! 3. [`cache_key`] derives a deterministic key from the effective query.
//! 4. [`materialize`] runs the query against an [`IncidentStore`] on a
//!    cache miss.
//!
//! Geometric predicates are evaluated by the store (`PostGIS` in
//! production, see [`postgis`]); this crate only composes queries.

pub mod cache_key;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod jurisdiction;
pub mod materialize;
#[cfg(any(test, feature = "memory"))]
pub mod memory;
pub mod postgis;
pub mod store;

pub use config::GisConfig;
pub use engine::GisEngine;
pub use georise_gis_models::{FilterError, FilterSet};
pub use store::{IncidentStore, StoreError};

use thiserror::Error;

/// Errors returned by the query engine.
#[derive(Debug, Error)]
pub enum GisError {
    /// The caller's filter is missing a required field or is malformed.
    #[error(transparent)]
    InvalidFilter(#[from] FilterError),

    /// The compiled query failed in the store.
    #[error("Query execution failed: {source}")]
    QueryExecution {
        /// The filter set the query was compiled from.
        filter: Box<FilterSet>,
        /// The store failure.
        #[source]
        source: StoreError,
    },

    /// The caller's jurisdiction could not be determined.
    #[error("Jurisdiction lookup failed: {0}")]
    Jurisdiction(#[source] StoreError),

    /// Overlay lookup failed.
    #[error("Overlay query failed: {0}")]
    Overlays(#[source] StoreError),

    /// A payload or cache key could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GisError {
    /// Whether the failure is attributable to caller input.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        match self {
            Self::InvalidFilter(_) => true,
            Self::QueryExecution { source, .. } => source.is_caller_input(),
            Self::Jurisdiction(_) | Self::Overlays(_) | Self::Serialization(_) => false,
        }
    }
}
