//! DataCite repository sink over the repository's JSON API.
//!
//! - Candidate search: `GET {search_url}?types=Metadata&depth=-1&datasource_id=…`
//!   with optional `metadata_values` (JSON) and `collected_date` (`start|end`);
//!   the answer is a list of `{"jsonData": {…}}`.
//! - Submit: form field `json` holding the record plus repository credentials,
//!   `POST` to create and `PUT` to update; the answer is
//!   `{"success": bool, "message": str, "uuid"?: str}`.

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use harvest_agent_core::datacite::{self, DataCiteMetadata};
use harvest_agent_core::metadata::Metadata;
use harvest_agent_core::sink::{CandidateQuery, RepositorySink, SubmitMethod};
use harvest_agent_core::HarvestError;

/// Where and as whom records are committed.
#[derive(Debug, Clone)]
pub struct RepositoryEndpoint {
    pub repository_url: String,
    pub search_url: String,
    pub commit_url: String,
    pub username: String,
    pub password: String,
    pub institution: String,
}

pub struct DataCiteRepository {
    endpoint: RepositoryEndpoint,
    client: Client,
    uuid_pattern: Regex,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "jsonData")]
    json_data: Value,
}

#[derive(Debug, Deserialize)]
struct SubmitResult {
    success: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    uuid: Option<String>,
}

impl DataCiteRepository {
    pub fn new(endpoint: RepositoryEndpoint, timeout: Duration) -> Result<Self, HarvestError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HarvestError::transport("Failed to build HTTP client", e))?;
        let uuid_pattern = Regex::new(r"\buuid=(\w+)\b")
            .map_err(|e| HarvestError::Configuration(format!("Invalid pattern: {}", e)))?;
        Ok(Self {
            endpoint,
            client,
            uuid_pattern,
        })
    }

    fn search_params(&self, query: &CandidateQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("types", "Metadata".to_string()),
            ("depth", "-1".to_string()),
            ("datasource_id", query.datasource_id.clone()),
            ("__ac_name", self.endpoint.username.clone()),
            ("__ac_password", self.endpoint.password.clone()),
        ];
        if let Some(values) = &query.key_values {
            params.push(("metadata_values", Value::Object(values.clone()).to_string()));
        }
        if let Some((start, end)) = &query.collected {
            params.push((
                "collected_date",
                format!(
                    "{}|{}",
                    start.format("%Y-%m-%d %H:%M:%S"),
                    end.format("%Y-%m-%d %H:%M:%S")
                ),
            ));
        }
        params
    }

    fn submit_payload(&self, metadata: &dyn Metadata) -> Value {
        let (pid, pid_type) = metadata.metadata_id();
        json!({
            "json": metadata.to_value(),
            "schema": datacite::SCHEMA,
            "mode": "manual",
            "PID": pid,
            "typePID": pid_type,
            "repository": {
                "URL": self.endpoint.repository_url,
                "username": self.endpoint.username,
                "password": self.endpoint.password,
                "institution": self.endpoint.institution,
            },
        })
    }

    /// Extract the repository id from a submit response body.
    fn parse_submit_result(&self, body: Value, method: SubmitMethod) -> Result<String, HarvestError> {
        let result: SubmitResult = serde_json::from_value(body).map_err(|e| {
            HarvestError::response_format_from(
                format!(
                    "Invalid response {} metadata record from {}",
                    method.verb(),
                    self.endpoint.commit_url
                ),
                e,
            )
        })?;

        if !result.success {
            return Err(HarvestError::response_format(format!(
                "Error {} metadata record in repository: {}",
                method.verb(),
                result.message
            )));
        }

        result
            .uuid
            .filter(|u| !u.is_empty())
            .or_else(|| {
                self.uuid_pattern
                    .captures(&result.message)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string())
            })
            .ok_or_else(|| {
                HarvestError::response_format(format!(
                    "Repository reported success {} metadata record but returned no id: {}",
                    method.verb(),
                    result.message
                ))
            })
    }
}

#[async_trait]
impl RepositorySink for DataCiteRepository {
    fn schema(&self) -> &str {
        datacite::SCHEMA
    }

    fn decode(&self, value: Value) -> Result<Box<dyn Metadata>, HarvestError> {
        Ok(Box::new(DataCiteMetadata::from_value(value)?))
    }

    async fn search_candidates(
        &self,
        query: &CandidateQuery,
    ) -> Result<Vec<Box<dyn Metadata>>, HarvestError> {
        let url = &self.endpoint.search_url;
        let response = self
            .client
            .get(url)
            .query(&self.search_params(query))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                HarvestError::transport(format!("Error searching metadata records at {}", url), e)
            })?;

        let hits: Vec<SearchHit> = response.json().await.map_err(|e| {
            HarvestError::response_format_from(format!("Invalid response searching metadata records from {}", url), e)
        })?;

        hits.into_iter()
            .map(|hit| self.decode(hit.json_data))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                HarvestError::response_format_from(format!("Invalid response searching metadata records from {}", url), e)
            })
    }

    async fn submit(
        &self,
        metadata: &dyn Metadata,
        method: SubmitMethod,
    ) -> Result<String, HarvestError> {
        let url = &self.endpoint.commit_url;
        let http_method = match method {
            SubmitMethod::Create => Method::POST,
            SubmitMethod::Update => Method::PUT,
        };
        let payload = self.submit_payload(metadata).to_string();

        let response = self
            .client
            .request(http_method, url)
            .form(&[("json", payload)])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                HarvestError::transport(
                    format!("Error {} metadata record at {}", method.verb(), url),
                    e,
                )
            })?;

        let body: Value = response.json().await.map_err(|e| {
            HarvestError::response_format_from(
                format!("Invalid response {} metadata record from {}", method.verb(), url),
                e,
            )
        })?;
        self.parse_submit_result(body, method)
    }
}
