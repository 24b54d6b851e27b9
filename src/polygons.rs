//! Loading the bounding polygons named by a granularity rule.
//!
//! `spatial_extent` is an http(s) URL of a GeoJSON document, or a local
//! file path. The document is read once per invocation.

use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use harvest_agent_core::geometry::PolygonSet;
use harvest_agent_core::HarvestError;

pub async fn load_polygons(client: &Client, source: &str) -> Result<PolygonSet, HarvestError> {
    let doc: Value = if source.starts_with("http://") || source.starts_with("https://") {
        let response = client
            .get(source)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| HarvestError::transport(format!("Error requesting {}", source), e))?;
        response.json().await.map_err(|e| {
            HarvestError::response_format_from(format!("Invalid GeoJSON from {}", source), e)
        })?
    } else {
        let path = source.strip_prefix("file://").unwrap_or(source);
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            HarvestError::Configuration(format!("Cannot read polygon source {}: {}", path, e))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            HarvestError::response_format_from(format!("Invalid GeoJSON in {}", path), e)
        })?
    };

    let polygons = PolygonSet::from_geojson(&doc)?;
    debug!(source, count = polygons.polygons().len(), "Loaded bounding polygons");
    Ok(polygons)
}
