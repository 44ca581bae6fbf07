//! Executes compiled queries and translates rows into `GeoJSON` features.

use std::sync::Arc;

use georise_gis_models::{
    ClusterProperties, Feature, FeatureCollection, IncidentProperties, IncidentStatus,
    OverlayProperties,
};

use crate::GisError;
use crate::compiler::{CompiledQuery, PageWindow};
use crate::store::{ClusterRecord, IncidentRecord, IncidentStore, OverlayRecord, StoreError};

/// Runs queries against an [`IncidentStore`]. Failures are never retried.
#[derive(Clone)]
pub struct Materializer {
    store: Arc<dyn IncidentStore>,
}

impl Materializer {
    #[must_use]
    pub fn new(store: Arc<dyn IncidentStore>) -> Self {
        Self { store }
    }

    /// Listing mode: one feature per incident, rows without geometry
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns [`GisError::QueryExecution`] if the store fails or a row
    /// cannot be translated.
    pub async fn list(
        &self,
        query: &CompiledQuery,
        window: PageWindow,
    ) -> Result<FeatureCollection<IncidentProperties>, GisError> {
        let rows = self
            .store
            .list_incidents(query, window)
            .await
            .map_err(|e| execution_error(query, e))?;

        let mut features = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(feature) = incident_feature(row).map_err(|e| execution_error(query, e))? {
                features.push(feature);
            }
        }

        Ok(FeatureCollection::new(features))
    }

    /// Clustering mode: one feature per grid cell with `id` set to its
    /// position in the response.
    ///
    /// # Errors
    ///
    /// Returns [`GisError::QueryExecution`] if the store fails or a row
    /// cannot be translated.
    pub async fn cluster(
        &self,
        query: &CompiledQuery,
        grid: f64,
    ) -> Result<FeatureCollection<ClusterProperties>, GisError> {
        let rows = self
            .store
            .cluster_incidents(query, grid)
            .await
            .map_err(|e| execution_error(query, e))?;

        let mut features = Vec::with_capacity(rows.len());
        for row in rows {
            let id = features.len();
            if let Some(feature) = cluster_feature(id, row).map_err(|e| execution_error(query, e))? {
                features.push(feature);
            }
        }

        Ok(FeatureCollection::new(features))
    }

    /// Overlay features of the given types.
    ///
    /// # Errors
    ///
    /// Returns [`GisError::Overlays`] if the store fails or a row cannot be
    /// translated.
    pub async fn overlays(
        &self,
        types: &[String],
        limit: i64,
    ) -> Result<FeatureCollection<OverlayProperties>, GisError> {
        let rows = self.store.list_overlays(types, limit).await.map_err(|e| {
            log::error!("Failed to query overlays {types:?}: {e}");
            GisError::Overlays(e)
        })?;

        let mut features = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(feature) = overlay_feature(row).map_err(GisError::Overlays)? {
                features.push(feature);
            }
        }

        Ok(FeatureCollection::new(features))
    }
}

fn execution_error(query: &CompiledQuery, source: StoreError) -> GisError {
    log::error!(
        "Failed to query incidents for filter {:?}: {source}",
        query.filter()
    );
    GisError::QueryExecution {
        filter: Box::new(query.filter().clone()),
        source,
    }
}

fn parse_geometry(raw: Option<&str>) -> Result<Option<geojson::Geometry>, StoreError> {
    raw.map(|text| {
        serde_json::from_str::<geojson::Geometry>(text).map_err(|e| StoreError::Conversion {
            message: format!("Invalid geometry from store: {e}"),
        })
    })
    .transpose()
}

fn parse_status(raw: &str) -> Result<IncidentStatus, StoreError> {
    raw.parse().map_err(|_| StoreError::Conversion {
        message: format!("Unknown incident status from store: {raw}"),
    })
}

fn incident_feature(
    row: IncidentRecord,
) -> Result<Option<Feature<IncidentProperties>>, StoreError> {
    let Some(geometry) = parse_geometry(row.geometry.as_deref())? else {
        return Ok(None);
    };

    Ok(Some(Feature {
        geometry,
        properties: IncidentProperties {
            id: row.id,
            status: parse_status(&row.status)?,
            category: row.category,
            created_at: row.created_at,
        },
    }))
}

fn cluster_feature(
    id: usize,
    row: ClusterRecord,
) -> Result<Option<Feature<ClusterProperties>>, StoreError> {
    let Some(geometry) = parse_geometry(row.geometry.as_deref())? else {
        return Ok(None);
    };
    let status = row.status.as_deref().ok_or_else(|| StoreError::Conversion {
        message: "Cluster without status".to_string(),
    })?;
    let created_at = row.created_at.ok_or_else(|| StoreError::Conversion {
        message: "Cluster without created_at".to_string(),
    })?;

    Ok(Some(Feature {
        geometry,
        properties: ClusterProperties {
            id,
            count: row.count,
            status: parse_status(status)?,
            category: row.category,
            created_at,
        },
    }))
}

fn overlay_feature(row: OverlayRecord) -> Result<Option<Feature<OverlayProperties>>, StoreError> {
    let Some(geometry) = parse_geometry(row.geometry.as_deref())? else {
        return Ok(None);
    };
    let metadata = row
        .metadata
        .as_deref()
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()
        .map_err(|e| StoreError::Conversion {
            message: format!("Invalid overlay metadata: {e}"),
        })?
        .unwrap_or(serde_json::Value::Null);

    Ok(Some(Feature {
        geometry,
        properties: OverlayProperties {
            id: row.id,
            name: row.name,
            overlay_type: row.overlay_type,
            subtype: row.subtype,
            metadata,
        },
    }))
}
