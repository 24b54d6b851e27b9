//! Collector contract.
//!
//! A collector reads raw records from one kind of remote datastore. It is
//! selected per harvester by its `(protocol, schema)` pair.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HarvestError;

/// Collection outcome reported by a collector for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectStatus {
    Pending,
    Success,
    Error,
}

/// One record as returned by a collector.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub uid: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub metadata: Option<Value>,
    pub status: CollectStatus,
    pub error: Option<String>,
}

impl RawRecord {
    /// A listed record whose metadata has not been read yet.
    pub fn pending(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            timestamp: None,
            metadata: None,
            status: CollectStatus::Pending,
            error: None,
        }
    }

    pub fn success(uid: impl Into<String>, metadata: Value) -> Self {
        Self {
            uid: uid.into(),
            timestamp: None,
            metadata: Some(metadata),
            status: CollectStatus::Success,
            error: None,
        }
    }

    pub fn failed(uid: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            timestamp: None,
            metadata: None,
            status: CollectStatus::Error,
            error: Some(error.into()),
        }
    }
}

#[async_trait]
pub trait Collector: Send + Sync {
    /// Transport protocol tag, e.g. `"OPeNDAP-NetCDF"`.
    fn protocol(&self) -> &str;

    /// Metadata schema the collector produces.
    fn schema(&self) -> &str;

    /// List records in the datastore, optionally newer than `since` and at most `limit`.
    async fn list_records(
        &self,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<RawRecord>, HarvestError>;

    /// Read one record's metadata.
    ///
    /// Per-record problems may be reported either as `Err` or as a record
    /// with [`CollectStatus::Error`]; the pipeline treats both as a failed fetch.
    async fn fetch_metadata(&self, uid: &str) -> Result<RawRecord, HarvestError>;
}
