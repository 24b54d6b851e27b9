//! Repository sink contract.
//!
//! A sink is the destination repository for one metadata schema: it decodes
//! stored JSON into that schema's [`Metadata`] adapter, answers coarse
//! candidate searches, and accepts create/update submissions.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::{Map, Value};
use std::fmt;

use crate::error::HarvestError;
use crate::granule::Granule;
use crate::metadata::Metadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMethod {
    Create,
    Update,
}

impl SubmitMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmitMethod::Create => "create",
            SubmitMethod::Update => "update",
        }
    }

    /// Progressive form for error messages ("creating", "updating").
    pub fn verb(&self) -> &'static str {
        match self {
            SubmitMethod::Create => "creating",
            SubmitMethod::Update => "updating",
        }
    }
}

impl fmt::Display for SubmitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Search parameters for candidate records of a granule.
///
/// The search is advisory and may over-return; spatial filtering happens
/// locally in [`crate::matching`].
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateQuery {
    pub datasource_id: String,
    pub key_values: Option<Map<String, Value>>,
    pub collected: Option<(NaiveDateTime, NaiveDateTime)>,
}

impl From<&Granule> for CandidateQuery {
    fn from(granule: &Granule) -> Self {
        Self {
            datasource_id: granule.datasource_id.clone(),
            key_values: granule.values.clone(),
            collected: granule.timeframe,
        }
    }
}

#[async_trait]
pub trait RepositorySink: Send + Sync {
    /// Metadata schema this sink speaks (e.g. `"DataCite"`).
    fn schema(&self) -> &str;

    /// Wrap a raw metadata object in this schema's adapter.
    fn decode(&self, value: Value) -> Result<Box<dyn Metadata>, HarvestError>;

    /// Existing records of the datasource, narrowed by key values and date overlap.
    async fn search_candidates(
        &self,
        query: &CandidateQuery,
    ) -> Result<Vec<Box<dyn Metadata>>, HarvestError>;

    /// Create or update a record; returns the repository's id for it.
    async fn submit(
        &self,
        metadata: &dyn Metadata,
        method: SubmitMethod,
    ) -> Result<String, HarvestError>;
}
