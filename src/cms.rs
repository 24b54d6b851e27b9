//! Client for the CMS that owns harvester configuration.
//!
//! The CMS answers `GET {cms}/jsonContent?types=Harvester&uid=…` with a list
//! holding the harvester's attributes. Requests authenticate with the
//! `__ac_name` / `__ac_password` query parameters.

use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;

use harvest_agent_core::HarvestError;

/// Harvester attributes as stored in the CMS.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvesterConfig {
    /// Protocol tag, e.g. `OPeNDAP-NetCDF`.
    pub transport: String,
    /// Metadata schema, e.g. `DataCite`.
    pub standard: String,
    #[serde(default)]
    pub default_values: Value,
    #[serde(default)]
    pub supplementary_values: Value,
    #[serde(default)]
    pub granularity: Value,
    #[serde(rename = "updatefrequency")]
    pub update_frequency: String,
    pub search_url: String,
    pub commit_url: String,
    /// Datasource URL and credentials.
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

pub struct Cms {
    base_url: Url,
    client: Client,
}

impl Cms {
    pub fn new(server_url: &str, timeout: Duration) -> Result<Self, HarvestError> {
        let base_url = parse_base_url(server_url)?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HarvestError::transport("Failed to build HTTP client", e))?;
        Ok(Self { base_url, client })
    }

    pub async fn get_harvester_config(
        &self,
        harvester_uid: &str,
        username: &str,
        password: &str,
    ) -> Result<HarvesterConfig, HarvestError> {
        let url = self
            .base_url
            .join("jsonContent")
            .map_err(|e| HarvestError::Configuration(format!("Invalid CMS URL: {}", e)))?;

        let response = self
            .client
            .get(url.clone())
            .query(&[
                ("types", "Harvester"),
                ("uid", harvester_uid),
                ("__ac_name", username),
                ("__ac_password", password),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| HarvestError::transport(format!("Error requesting {}", url), e))?;

        let body: Value = response.json().await.map_err(|e| {
            HarvestError::response_format_from(format!("Invalid response from {}", url), e)
        })?;

        single_harvester(body, harvester_uid)
    }
}

fn parse_base_url(server_url: &str) -> Result<Url, HarvestError> {
    let mut url = server_url.to_string();
    if !url.ends_with('/') {
        url.push('/');
    }
    Url::parse(&url).map_err(|e| {
        HarvestError::Configuration(format!("Invalid CMS URL '{}': {}", server_url, e))
    })
}

/// The response must be a list holding exactly one object.
fn single_harvester(body: Value, harvester_uid: &str) -> Result<HarvesterConfig, HarvestError> {
    let not_found =
        || HarvestError::Configuration(format!("Cannot find a harvester with uid {}", harvester_uid));
    let item = match body {
        Value::Array(mut items) if items.len() == 1 && items[0].is_object() => items.remove(0),
        _ => return Err(not_found()),
    };
    serde_json::from_value(item).map_err(|e| {
        HarvestError::Configuration(format!(
            "Incomplete configuration for harvester {}: {}",
            harvester_uid, e
        ))
    })
}

/// Normalize a JSON-valued config attribute to an object.
///
/// Accepts an object, a JSON-encoded object string, or any empty value.
pub fn json_attribute(value: &Value, name: &str) -> Result<Map<String, Value>, HarvestError> {
    let invalid = |kind: &str| {
        HarvestError::Configuration(format!("{}: expecting JSON object; got {}", name, kind))
    };
    match value {
        Value::Null => Ok(Map::new()),
        Value::Object(map) => Ok(map.clone()),
        Value::String(s) if s.trim().is_empty() => Ok(Map::new()),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(invalid("non-object JSON")),
            Err(_) => Err(invalid("invalid JSON string")),
        },
        Value::Array(items) if items.is_empty() => Ok(Map::new()),
        Value::Array(_) => Err(invalid("list")),
        Value::Bool(false) => Ok(Map::new()),
        Value::Bool(true) => Err(invalid("boolean")),
        Value::Number(_) => Err(invalid("number")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_json() -> Value {
        json!({
            "transport": "OPeNDAP-NetCDF",
            "standard": "DataCite",
            "defaultValues": "{\"publisher\": \"SAEON\"}",
            "supplementaryValues": "",
            "granularity": {"temporal_extent": "day"},
            "updatefrequency": "1 Days",
            "searchUrl": "http://repo/search",
            "commitUrl": "http://repo/commit",
            "url": "http://thredds/catalog/",
            "username": "reader",
            "password": null
        })
    }

    #[test]
    fn test_single_harvester_parses() {
        let cfg = single_harvester(json!([config_json()]), "h-1").unwrap();
        assert_eq!(cfg.transport, "OPeNDAP-NetCDF");
        assert_eq!(cfg.update_frequency, "1 Days");
        assert_eq!(cfg.username.as_deref(), Some("reader"));
        assert!(cfg.password.is_none());
    }

    #[test]
    fn test_response_must_hold_exactly_one_object() {
        for body in [json!([]), json!([config_json(), config_json()]), json!(config_json()), json!(["x"])] {
            let err = single_harvester(body, "h-1").unwrap_err();
            assert!(err.to_string().contains("Cannot find a harvester with uid h-1"));
        }
    }

    #[test]
    fn test_json_attribute_forms() {
        assert_eq!(
            json_attribute(&json!("{\"publisher\": \"SAEON\"}"), "defaultValues").unwrap()["publisher"],
            "SAEON"
        );
        assert!(json_attribute(&json!(""), "x").unwrap().is_empty());
        assert!(json_attribute(&Value::Null, "x").unwrap().is_empty());
        assert!(json_attribute(&json!({"a": 1}), "x").unwrap().contains_key("a"));
        assert!(json_attribute(&json!("[1, 2]"), "x").is_err());
        assert!(json_attribute(&json!(["a"]), "x").is_err());
        assert!(json_attribute(&json!("not json"), "x").is_err());
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let url = parse_base_url("http://cms.example.org/Plone").unwrap();
        assert_eq!(url.join("jsonContent").unwrap().as_str(), "http://cms.example.org/Plone/jsonContent");
        assert!(parse_base_url("not a url").is_err());
    }
}
