//! Three-phase harvest pipeline.
//!
//! One invocation runs, in order:
//!
//! 1. **discover**: list remote records and insert ledger rows for unseen
//!    uids, as one atomic batch;
//! 2. **fetch**: read metadata for `Pending` rows under the retry budget;
//! 3. **commit**: run the curator on `Fetched` rows under the retry budget.
//!
//! Collector and sink failures are caught per row and written onto the row;
//! they never abort sibling rows or later phases. Ledger storage failures
//! do abort the run, since nothing can be recorded without the ledger.

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use crate::collector::{CollectStatus, Collector};
use crate::curator::Curator;
use crate::harvester::Harvester;
use crate::ledger::{LedgerKey, LedgerRow, LedgerStore, RecordStatus, MAX_ATTEMPTS};
use crate::sink::RepositorySink;

/// Ledger pairing a pipeline works on.
#[derive(Debug, Clone)]
pub struct Pairing {
    pub datasource_id: i64,
    pub repository_id: i64,
}

/// Row counts for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HarvestReport {
    pub discovered: usize,
    pub fetched: usize,
    pub fetch_failures: usize,
    pub committed: usize,
    pub commit_failures: usize,
}

pub struct HarvestPipeline<'a> {
    pub harvester: &'a Harvester,
    pub pairing: Pairing,
    pub ledger: &'a dyn LedgerStore,
    pub collector: &'a dyn Collector,
    pub sink: &'a dyn RepositorySink,
    pub curator: &'a Curator,
}

impl<'a> HarvestPipeline<'a> {
    /// Run all three phases. `limit` caps the new rows discovery may insert.
    ///
    /// The caller stamps the harvester's `lastrun` before calling this.
    pub async fn run(&self, limit: Option<usize>) -> Result<HarvestReport> {
        self.harvester.ensure_active()?;

        let mut report = HarvestReport {
            discovered: self.discover(limit).await?,
            ..Default::default()
        };
        let (ok, failed) = self.fetch_pending().await?;
        report.fetched = ok;
        report.fetch_failures = failed;
        let (ok, failed) = self.commit_fetched().await?;
        report.committed = ok;
        report.commit_failures = failed;
        Ok(report)
    }

    /// Insert rows for records not yet in the ledger; returns how many were new.
    ///
    /// `limit` caps the number of *new* rows, so records already in the
    /// ledger never use up the allowance.
    pub async fn discover(&self, limit: Option<usize>) -> Result<usize> {
        debug!(harvester = %self.harvester.uid, "Fetching new records");

        let records = match self.collector.list_records(None, None).await {
            Ok(records) => records,
            Err(e) => {
                warn!(harvester = %self.harvester.uid, "Listing remote records failed: {}", e);
                return Ok(0);
            }
        };

        let now = Utc::now();
        let mut rows = Vec::new();
        for record in &records {
            if limit.is_some_and(|n| rows.len() >= n) {
                break;
            }
            let key = self.key(&record.uid);
            if self.ledger.get(&key).await?.is_none() {
                rows.push(LedgerRow::from_discovered(key, record, now));
            }
        }
        if rows.is_empty() {
            return Ok(0);
        }

        let inserted = self.ledger.insert_discovered(&rows).await?;
        debug!(listed = records.len(), inserted, "Discovery complete");
        Ok(inserted)
    }

    /// Fetch metadata for pending rows; returns (succeeded, failed).
    pub async fn fetch_pending(&self) -> Result<(usize, usize)> {
        debug!(harvester = %self.harvester.uid, "Fetching pending records");

        let rows = self
            .ledger
            .rows_in_status(
                self.pairing.datasource_id,
                self.pairing.repository_id,
                RecordStatus::Pending,
                MAX_ATTEMPTS,
            )
            .await?;

        let (mut ok, mut failed) = (0, 0);
        for mut row in rows {
            let outcome = match self.collector.fetch_metadata(&row.key.uid).await {
                Ok(record) => match (record.status, record.metadata) {
                    (CollectStatus::Success, Some(metadata)) => Ok((metadata, record.timestamp)),
                    (CollectStatus::Success, None) => {
                        Err(format!("Collector returned no metadata for '{}'", row.key.uid))
                    }
                    _ => Err(record
                        .error
                        .unwrap_or_else(|| "Collector reported an error".to_string())),
                },
                Err(e) => Err(e.diagnostic()),
            };

            let now = Utc::now();
            match outcome {
                Ok((metadata, timestamp)) => {
                    row.fetch_succeeded(metadata, timestamp, now)?;
                    ok += 1;
                }
                Err(error) => {
                    warn!(uid = %row.key.uid, "Error fetching metadata: {}", error);
                    row.fetch_failed(error, now)?;
                    failed += 1;
                }
            }
            self.ledger.save(&row).await?;
        }
        Ok((ok, failed))
    }

    /// Commit fetched rows to the repository; returns (succeeded, failed).
    pub async fn commit_fetched(&self) -> Result<(usize, usize)> {
        debug!(harvester = %self.harvester.uid, "Committing records");

        let rows = self
            .ledger
            .rows_in_status(
                self.pairing.datasource_id,
                self.pairing.repository_id,
                RecordStatus::Fetched,
                MAX_ATTEMPTS,
            )
            .await?;

        let (mut ok, mut failed) = (0, 0);
        for mut row in rows {
            let outcome = match row.metadata.clone() {
                Some(metadata) => self
                    .curator
                    .commit_metadata(
                        self.sink,
                        metadata,
                        &self.harvester.datasource_uid,
                        &row.key.uid,
                    )
                    .await
                    .map_err(|e| e.diagnostic()),
                None => Err(format!("Record '{}' has no stored metadata", row.key.uid)),
            };

            let now = Utc::now();
            match outcome {
                Ok(metadata_uid) => {
                    debug!(uid = %row.key.uid, %metadata_uid, "Committed");
                    row.commit_succeeded(metadata_uid, now)?;
                    ok += 1;
                }
                Err(error) => {
                    warn!(uid = %row.key.uid, "Error committing: {}", error);
                    row.commit_failed(error, now)?;
                    failed += 1;
                }
            }
            self.ledger.save(&row).await?;
        }
        Ok((ok, failed))
    }

    fn key(&self, uid: &str) -> LedgerKey {
        LedgerKey::new(self.pairing.datasource_id, self.pairing.repository_id, uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::RawRecord;
    use crate::curator::tests::RecordingSink;
    use crate::error::HarvestError;
    use crate::granularity::Granularity;
    use crate::harvester::tests::harvester;
    use crate::harvester::{Frequency, HarvesterStatus};
    use crate::ledger::memory::InMemoryLedger;
    use crate::sink::SubmitMethod;
    use async_trait::async_trait;
    use chrono::DateTime;
    use serde_json::{json, Map, Value};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeCollector {
        listing: Vec<RawRecord>,
        listing_fails: bool,
        metadata: HashMap<String, Value>,
        fetches: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Collector for FakeCollector {
        fn protocol(&self) -> &str {
            "Fake"
        }

        fn schema(&self) -> &str {
            "DataCite"
        }

        async fn list_records(
            &self,
            _since: Option<DateTime<Utc>>,
            limit: Option<usize>,
        ) -> Result<Vec<RawRecord>, HarvestError> {
            if self.listing_fails {
                return Err(HarvestError::response_format("unexpected directory page"));
            }
            let n = limit.unwrap_or(self.listing.len());
            Ok(self.listing.iter().take(n).cloned().collect())
        }

        async fn fetch_metadata(&self, uid: &str) -> Result<RawRecord, HarvestError> {
            self.fetches.lock().unwrap().push(uid.to_string());
            match self.metadata.get(uid) {
                Some(md) => Ok(RawRecord::success(uid, md.clone())),
                None => Err(HarvestError::transport(
                    format!("Error requesting http://datasource/{}.das", uid),
                    std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out"),
                )),
            }
        }
    }

    fn curator() -> Curator {
        Curator::new(Granularity::default(), Map::new(), Map::new())
    }

    fn pairing() -> Pairing {
        Pairing {
            datasource_id: 1,
            repository_id: 1,
        }
    }

    fn key(uid: &str) -> LedgerKey {
        LedgerKey::new(1, 1, uid)
    }

    #[tokio::test]
    async fn test_discover_inserts_pending_row() {
        let h = harvester(Frequency::Days1, None);
        let ledger = InMemoryLedger::new();
        let collector = FakeCollector {
            listing: vec![RawRecord::pending("f1")],
            ..Default::default()
        };
        let sink = RecordingSink::default();
        let curator = curator();
        let pipeline = HarvestPipeline {
            harvester: &h,
            pairing: pairing(),
            ledger: &ledger,
            collector: &collector,
            sink: &sink,
            curator: &curator,
        };

        assert_eq!(pipeline.discover(None).await.unwrap(), 1);
        let row = ledger.get(&key("f1")).await.unwrap().unwrap();
        assert_eq!(row.status, RecordStatus::Pending);
        assert_eq!(row.error_count, 0);

        // Rediscovery leaves the existing row alone.
        assert_eq!(pipeline.discover(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_discover_respects_limit_and_survives_listing_failure() {
        let h = harvester(Frequency::Days1, None);
        let ledger = InMemoryLedger::new();
        let collector = FakeCollector {
            listing: vec![RawRecord::pending("a"), RawRecord::pending("b")],
            ..Default::default()
        };
        let sink = RecordingSink::default();
        let curator = curator();
        let pipeline = HarvestPipeline {
            harvester: &h,
            pairing: pairing(),
            ledger: &ledger,
            collector: &collector,
            sink: &sink,
            curator: &curator,
        };
        assert_eq!(pipeline.discover(Some(1)).await.unwrap(), 1);
        assert!(ledger.get(&key("a")).await.unwrap().is_some());
        assert!(ledger.get(&key("b")).await.unwrap().is_none());

        // Known records do not count against the allowance.
        assert_eq!(pipeline.discover(Some(1)).await.unwrap(), 1);
        assert!(ledger.get(&key("b")).await.unwrap().is_some());
        assert_eq!(pipeline.discover(Some(1)).await.unwrap(), 0);

        let broken = FakeCollector {
            listing_fails: true,
            ..Default::default()
        };
        let pipeline = HarvestPipeline {
            harvester: &h,
            pairing: pairing(),
            ledger: &ledger,
            collector: &broken,
            sink: &sink,
            curator: &curator,
        };
        assert_eq!(pipeline.discover(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fetch_transport_error_keeps_row_pending() {
        let h = harvester(Frequency::Days1, None);
        let ledger = InMemoryLedger::new();
        let collector = FakeCollector {
            listing: vec![RawRecord::pending("f1")],
            ..Default::default()
        };
        let sink = RecordingSink::default();
        let curator = curator();
        let pipeline = HarvestPipeline {
            harvester: &h,
            pairing: pairing(),
            ledger: &ledger,
            collector: &collector,
            sink: &sink,
            curator: &curator,
        };
        pipeline.discover(None).await.unwrap();

        assert_eq!(pipeline.fetch_pending().await.unwrap(), (0, 1));
        let row = ledger.get(&key("f1")).await.unwrap().unwrap();
        assert_eq!(row.status, RecordStatus::Pending);
        assert_eq!(row.error_count, 1);
        let error = row.last_error.unwrap();
        assert!(error.contains("f1.das"));
        assert!(error.contains("Caused by: timed out"));
    }

    #[tokio::test]
    async fn test_full_run_creates_and_commits() {
        let h = harvester(Frequency::Days1, None);
        let ledger = InMemoryLedger::new();
        let collector = FakeCollector {
            listing: vec![RawRecord::pending("f1")],
            metadata: HashMap::from([("f1".to_string(), json!({"titles": [{"title": "f1"}]}))]),
            ..Default::default()
        };
        let sink = RecordingSink::default();
        let curator = curator();
        let pipeline = HarvestPipeline {
            harvester: &h,
            pairing: pairing(),
            ledger: &ledger,
            collector: &collector,
            sink: &sink,
            curator: &curator,
        };

        let report = pipeline.run(None).await.unwrap();
        assert_eq!(
            report,
            HarvestReport {
                discovered: 1,
                fetched: 1,
                fetch_failures: 0,
                committed: 1,
                commit_failures: 0,
            }
        );

        let row = ledger.get(&key("f1")).await.unwrap().unwrap();
        assert_eq!(row.status, RecordStatus::Committed);
        assert_eq!(row.metadata_uid.as_deref(), Some("uuid-1"));
        assert_eq!(sink.submissions.lock().unwrap()[0].0, SubmitMethod::Create);

        // A committed row is never touched again.
        let again = pipeline.run(None).await.unwrap();
        assert_eq!(again, HarvestReport::default());
        assert_eq!(sink.submissions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_failure_keeps_row_fetched() {
        let h = harvester(Frequency::Days1, None);
        let ledger = InMemoryLedger::new();
        let collector = FakeCollector {
            listing: vec![RawRecord::success("f1", json!({"titles": []}))],
            ..Default::default()
        };
        let sink = RecordingSink {
            fail_submit: true,
            ..Default::default()
        };
        let curator = curator();
        let pipeline = HarvestPipeline {
            harvester: &h,
            pairing: pairing(),
            ledger: &ledger,
            collector: &collector,
            sink: &sink,
            curator: &curator,
        };

        let report = pipeline.run(None).await.unwrap();
        assert_eq!(report.commit_failures, 1);
        // Discovery returned metadata, so no fetch was needed.
        assert!(collector.fetches.lock().unwrap().is_empty());

        let row = ledger.get(&key("f1")).await.unwrap().unwrap();
        assert_eq!(row.status, RecordStatus::Fetched);
        assert_eq!(row.error_count, 1);
        assert!(row.last_error.unwrap().contains("creating"));
    }

    #[tokio::test]
    async fn test_exhausted_rows_are_skipped() {
        let h = harvester(Frequency::Days1, None);
        let ledger = InMemoryLedger::new();
        let now = Utc::now();

        let mut pending = LedgerRow::from_discovered(key("p"), &RawRecord::pending("p"), now);
        pending.error_count = MAX_ATTEMPTS;
        let mut fetched =
            LedgerRow::from_discovered(key("f"), &RawRecord::success("f", json!({})), now);
        fetched.error_count = MAX_ATTEMPTS;
        ledger.insert_discovered(&[pending, fetched]).await.unwrap();

        let collector = FakeCollector::default();
        let sink = RecordingSink::default();
        let curator = curator();
        let pipeline = HarvestPipeline {
            harvester: &h,
            pairing: pairing(),
            ledger: &ledger,
            collector: &collector,
            sink: &sink,
            curator: &curator,
        };

        assert_eq!(pipeline.run(None).await.unwrap(), HarvestReport::default());
        assert!(collector.fetches.lock().unwrap().is_empty());
        assert!(sink.submissions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inactive_harvester_does_nothing() {
        let mut h = harvester(Frequency::Days1, None);
        h.status = HarvesterStatus::Deleted;
        let ledger = InMemoryLedger::new();
        let collector = FakeCollector {
            listing: vec![RawRecord::pending("f1")],
            ..Default::default()
        };
        let sink = RecordingSink::default();
        let curator = curator();
        let pipeline = HarvestPipeline {
            harvester: &h,
            pairing: pairing(),
            ledger: &ledger,
            collector: &collector,
            sink: &sink,
            curator: &curator,
        };

        let err = pipeline.run(None).await.unwrap_err();
        assert!(err.to_string().contains("Deleted"));
        assert!(ledger.get(&key("f1")).await.unwrap().is_none());
    }
}
