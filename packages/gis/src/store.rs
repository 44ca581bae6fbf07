//! The spatial store seam between the engine and its database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::compiler::{CompiledQuery, PageWindow};

/// Errors raised by an [`IncidentStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] switchy_database::DatabaseError),

    /// The store refused caller-supplied input, such as a geometry it
    /// could not interpret.
    #[error("Store rejected input: {message}")]
    Rejected { message: String },

    /// A returned row could not be translated.
    #[error("Conversion error: {message}")]
    Conversion { message: String },
}

impl StoreError {
    /// Whether the failure is attributable to the caller's input.
    #[must_use]
    pub const fn is_caller_input(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// One incident row. `geometry` is `GeoJSON` text.
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentRecord {
    pub id: i64,
    pub status: String,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub geometry: Option<String>,
}

/// One grid cell aggregate. `geometry` is the snapped cell point as
/// `GeoJSON` text.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterRecord {
    pub geometry: Option<String>,
    pub count: i64,
    pub status: Option<String>,
    pub category: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// One overlay row. `metadata` and `geometry` are JSON text.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayRecord {
    pub id: i64,
    pub name: String,
    pub overlay_type: String,
    pub subtype: Option<String>,
    pub metadata: Option<String>,
    pub geometry: Option<String>,
}

/// Read-only access to incidents, overlays, and agency jurisdictions.
///
/// Implementations evaluate the geometric predicates of a
/// [`CompiledQuery`]; the engine never computes geometry itself.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Returns the agency of `user_id` if that agency has a jurisdiction
    /// polygon.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the lookup fails.
    async fn jurisdiction_agency(&self, user_id: i64) -> Result<Option<i64>, StoreError>;

    /// Lists matching incidents ordered by `created_at DESC, id DESC`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    async fn list_incidents(
        &self,
        query: &CompiledQuery,
        window: PageWindow,
    ) -> Result<Vec<IncidentRecord>, StoreError>;

    /// Aggregates matching incidents into grid cells of `grid` degrees,
    /// ordered by count descending.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    async fn cluster_incidents(
        &self,
        query: &CompiledQuery,
        grid: f64,
    ) -> Result<Vec<ClusterRecord>, StoreError>;

    /// Lists overlays of the given types (all types when empty), up to
    /// `limit` rows.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    async fn list_overlays(
        &self,
        types: &[String],
        limit: i64,
    ) -> Result<Vec<OverlayRecord>, StoreError>;
}
