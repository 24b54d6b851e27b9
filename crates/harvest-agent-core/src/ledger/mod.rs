//! Per-record harvest ledger.
//!
//! One [`LedgerRow`] exists for every remote record ever discovered for a
//! (datasource, repository) pairing. Rows only move forward:
//!
//! ```text
//! Pending ──fetch ok──▶ Fetched ──commit ok──▶ Committed
//!    │  ▲                  │  ▲
//!    └──┘ fetch failed     └──┘ commit failed (error_count += 1)
//! ```
//!
//! A row whose `error_count` reaches [`MAX_ATTEMPTS`] is frozen: the
//! pipeline no longer selects it, but it stays visible for remediation.
//!
//! Storage is behind the [`LedgerStore`] trait; [`memory::InMemoryLedger`]
//! is used in tests and the `harvest-agent` crate provides SQLite.

pub mod memory;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::collector::{CollectStatus, RawRecord};

/// Retry budget: consecutive failures after which a row is no longer retried.
pub const MAX_ATTEMPTS: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RecordStatus {
    Pending,
    Fetched,
    Committed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "Pending",
            RecordStatus::Fetched => "Fetched",
            RecordStatus::Committed => "Committed",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(RecordStatus::Pending),
            "fetched" => Ok(RecordStatus::Fetched),
            "committed" => Ok(RecordStatus::Committed),
            _ => bail!(
                "Unknown record status '{}'. Expected Pending, Fetched or Committed.",
                s
            ),
        }
    }
}

/// Composite ledger key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LedgerKey {
    pub datasource_id: i64,
    pub repository_id: i64,
    pub uid: String,
}

impl LedgerKey {
    pub fn new(datasource_id: i64, repository_id: i64, uid: impl Into<String>) -> Self {
        Self {
            datasource_id,
            repository_id,
            uid: uid.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerRow {
    pub key: LedgerKey,
    /// Remote timestamp reported by the collector.
    pub timestamp: Option<DateTime<Utc>>,
    pub metadata: Option<Value>,
    /// Repository id assigned on commit.
    pub metadata_uid: Option<String>,
    pub status: RecordStatus,
    pub last_error: Option<String>,
    pub error_count: i64,
    pub updated: DateTime<Utc>,
}

impl LedgerRow {
    /// Initial row for a record seen for the first time by discovery.
    ///
    /// Records that arrive with metadata start `Fetched`; a collector error
    /// is kept as the first failed attempt.
    pub fn from_discovered(key: LedgerKey, record: &RawRecord, now: DateTime<Utc>) -> Self {
        let fetched = record.status == CollectStatus::Success && record.metadata.is_some();
        let failed = record.status == CollectStatus::Error;
        Self {
            key,
            timestamp: record.timestamp,
            metadata: if fetched { record.metadata.clone() } else { None },
            metadata_uid: None,
            status: if fetched {
                RecordStatus::Fetched
            } else {
                RecordStatus::Pending
            },
            last_error: if failed {
                Some(
                    record
                        .error
                        .clone()
                        .unwrap_or_else(|| "Collector reported an error".to_string()),
                )
            } else {
                None
            },
            error_count: if failed { 1 } else { 0 },
            updated: now,
        }
    }

    /// Pending → Fetched.
    pub fn fetch_succeeded(
        &mut self,
        metadata: Value,
        timestamp: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.expect_status(RecordStatus::Pending, "fetch")?;
        self.timestamp = timestamp;
        self.metadata = Some(metadata);
        self.status = RecordStatus::Fetched;
        self.clear_error(now);
        Ok(())
    }

    /// Stays Pending with one more failure.
    pub fn fetch_failed(&mut self, error: String, now: DateTime<Utc>) -> Result<()> {
        self.expect_status(RecordStatus::Pending, "fetch")?;
        self.record_error(error, now);
        Ok(())
    }

    /// Fetched → Committed.
    pub fn commit_succeeded(&mut self, metadata_uid: String, now: DateTime<Utc>) -> Result<()> {
        self.expect_status(RecordStatus::Fetched, "commit")?;
        self.metadata_uid = Some(metadata_uid);
        self.status = RecordStatus::Committed;
        self.clear_error(now);
        Ok(())
    }

    /// Stays Fetched with one more failure.
    pub fn commit_failed(&mut self, error: String, now: DateTime<Utc>) -> Result<()> {
        self.expect_status(RecordStatus::Fetched, "commit")?;
        self.record_error(error, now);
        Ok(())
    }

    /// True once the retry budget is spent.
    pub fn is_frozen(&self) -> bool {
        self.status != RecordStatus::Committed && self.error_count >= MAX_ATTEMPTS
    }

    fn expect_status(&self, expected: RecordStatus, phase: &str) -> Result<()> {
        if self.status != expected {
            bail!(
                "Cannot record {} outcome for '{}': status is {}, expected {}",
                phase,
                self.key.uid,
                self.status,
                expected
            );
        }
        Ok(())
    }

    fn clear_error(&mut self, now: DateTime<Utc>) {
        self.last_error = None;
        self.error_count = 0;
        self.updated = now;
    }

    fn record_error(&mut self, error: String, now: DateTime<Utc>) {
        self.last_error = Some(error);
        self.error_count += 1;
        self.updated = now;
    }
}

/// Row selection for ledger inspection.
#[derive(Debug, Clone, Default)]
pub struct LedgerFilter {
    pub datasource_id: Option<i64>,
    pub repository_id: Option<i64>,
    pub status: Option<RecordStatus>,
    /// Only rows whose retry budget is spent.
    pub frozen_only: bool,
}

impl LedgerFilter {
    pub fn matches(&self, row: &LedgerRow) -> bool {
        self.datasource_id.map_or(true, |id| id == row.key.datasource_id)
            && self.repository_id.map_or(true, |id| id == row.key.repository_id)
            && self.status.map_or(true, |s| s == row.status)
            && (!self.frozen_only || row.is_frozen())
    }
}

/// Durable storage for ledger rows.
///
/// Every method is one atomic unit: a failed call leaves no partial writes.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert rows whose key is not yet present, all or nothing.
    ///
    /// Returns the number of rows inserted.
    async fn insert_discovered(&self, rows: &[LedgerRow]) -> Result<usize>;

    /// Rows of a pairing in `status` with `error_count < max_errors`, in key order.
    async fn rows_in_status(
        &self,
        datasource_id: i64,
        repository_id: i64,
        status: RecordStatus,
        max_errors: i64,
    ) -> Result<Vec<LedgerRow>>;

    /// Replace the stored row with the same key.
    async fn save(&self, row: &LedgerRow) -> Result<()>;

    async fn get(&self, key: &LedgerKey) -> Result<Option<LedgerRow>>;

    async fn list(&self, filter: &LedgerFilter) -> Result<Vec<LedgerRow>>;
}
