//! The `invoke_harvester` entry point.
//!
//! One invocation:
//!
//! 1. claims the harvester's invocation lease,
//! 2. refreshes harvester, datasource and repository rows from the CMS,
//! 3. runs the harvest pipeline if the harvester is due,
//! 4. releases the lease.
//!
//! Every failure is reported through the returned `(success, message)`
//! tuple; row-level errors stay on the ledger rows.

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::{debug, error, info, warn};

use harvest_agent_core::curator::Curator;
use harvest_agent_core::harvester::{Frequency, Harvester, HarvesterStatus};
use harvest_agent_core::pipeline::{HarvestPipeline, Pairing};

use crate::cms::{json_attribute, Cms};
use crate::config::Config;
use crate::db::to_ts;
use crate::entities;
use crate::polygons::load_polygons;
use crate::registry::{CollectorRegistry, HarvestTarget, SinkRegistry};
use crate::sqlite_ledger::SqliteLedger;

/// The seven invocation parameters, as posted to `/invoke_harvester`.
#[derive(Debug, Clone, Deserialize)]
pub struct InvokeParams {
    pub harvester_uid: String,
    pub datasource_uid: String,
    pub repository_uid: String,
    pub repository_url: String,
    /// Credentials for both the CMS and the repository.
    pub username: String,
    pub password: String,
    pub institution: String,
}

impl InvokeParams {
    pub const NAMES: [&'static str; 7] = [
        "harvester_uid",
        "datasource_uid",
        "repository_uid",
        "repository_url",
        "username",
        "password",
        "institution",
    ];
}

pub struct Agent {
    config: Config,
    pool: SqlitePool,
    collectors: CollectorRegistry,
    sinks: SinkRegistry,
}

struct Lease {
    harvester_uid: String,
    acquired_at: i64,
}

impl Agent {
    pub fn new(config: Config, pool: SqlitePool) -> Self {
        Self::with_registries(config, pool, CollectorRegistry::builtin(), SinkRegistry::builtin())
    }

    pub fn with_registries(
        config: Config,
        pool: SqlitePool,
        collectors: CollectorRegistry,
        sinks: SinkRegistry,
    ) -> Self {
        Self {
            config,
            pool,
            collectors,
            sinks,
        }
    }

    pub async fn invoke_harvester(&self, params: &InvokeParams) -> (bool, String) {
        let uid = &params.harvester_uid;
        debug!(
            harvester = %uid,
            datasource = %params.datasource_uid,
            repository = %params.repository_uid,
            "BEGIN invoke"
        );

        let lease = match self.acquire_lease(uid).await {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                let msg = format!("Harvester {} is already running", uid);
                warn!("{}", msg);
                return (false, msg);
            }
            Err(e) => {
                let msg = format!("Error acquiring invocation lease: {:#}", e);
                error!("{}", msg);
                return (false, msg);
            }
        };

        let outcome = self.invoke_leased(params).await;

        if let Err(e) = self.release_lease(&lease).await {
            warn!(harvester = %uid, "Error releasing invocation lease: {:#}", e);
        }
        debug!(harvester = %uid, "END invoke");
        outcome
    }

    async fn invoke_leased(&self, params: &InvokeParams) -> (bool, String) {
        if let Err(e) = self.refresh_config(params).await {
            let msg = format!("Error refreshing config: {:#}", e);
            error!("{}", msg);
            return (false, msg);
        }

        match self.run_if_due(&params.harvester_uid).await {
            Ok(msg) => {
                info!("{}", msg);
                (true, msg)
            }
            Err(e) => {
                let msg = format!("Error running harvester: {:#}", e);
                error!("{}", msg);
                (false, msg)
            }
        }
    }

    /// Mirror the CMS configuration into the local harvester, datasource and
    /// repository rows, in one transaction.
    pub async fn refresh_config(&self, params: &InvokeParams) -> Result<()> {
        let cms = Cms::new(&self.config.cms.url, self.config.harvest.http_timeout())?;
        let remote = cms
            .get_harvester_config(&params.harvester_uid, &params.username, &params.password)
            .await?;

        let frequency: Frequency = remote.update_frequency.parse()?;
        let harvester = Harvester {
            uid: params.harvester_uid.clone(),
            datasource_uid: params.datasource_uid.clone(),
            repository_uid: params.repository_uid.clone(),
            protocol: remote.transport.clone(),
            schema: remote.standard.clone(),
            default_values: json_attribute(&remote.default_values, "defaultValues")?,
            supplementary_values: json_attribute(&remote.supplementary_values, "supplementaryValues")?,
            granularity: json_attribute(&remote.granularity, "granularity")?,
            search_url: remote.search_url.clone(),
            commit_url: remote.commit_url.clone(),
            frequency,
            status: HarvesterStatus::Active,
            lastrun: None,
        };
        // Reject a malformed rule before it is stored.
        harvester.granularity_rule()?;

        let mut tx = self.pool.begin().await?;

        if let Some(existing) = entities::get_harvester(&mut *tx, &harvester.uid).await? {
            if existing.datasource_uid != harvester.datasource_uid {
                warn!(harvester = %harvester.uid, "datasource_uid has changed");
            }
            if existing.repository_uid != harvester.repository_uid {
                warn!(harvester = %harvester.uid, "repository_uid has changed");
            }
        }

        let new_harvester = entities::upsert_harvester(&mut *tx, &harvester).await?;
        let (_, new_datasource) = entities::upsert_datasource(
            &mut *tx,
            &params.datasource_uid,
            &remote.url,
            remote.username.as_deref(),
            remote.password.as_deref(),
        )
        .await?;
        let (_, new_repository) = entities::upsert_repository(
            &mut *tx,
            &params.repository_uid,
            &params.repository_url,
            Some(&params.username),
            Some(&params.password),
            Some(&params.institution),
        )
        .await?;

        tx.commit().await?;

        if new_harvester {
            info!("Created harvester {}", params.harvester_uid);
        }
        if new_datasource {
            info!("Created datasource {}", params.datasource_uid);
        }
        if new_repository {
            info!("Created repository {}", params.repository_uid);
        }
        Ok(())
    }

    async fn run_if_due(&self, harvester_uid: &str) -> Result<String> {
        let mut conn = self.pool.acquire().await?;
        let harvester = entities::get_harvester(&mut *conn, harvester_uid)
            .await?
            .with_context(|| format!("Harvester {} not found", harvester_uid))?;

        let now = Utc::now();
        if !harvester.is_due(now) {
            return Ok(format!(
                "Not running harvester {} as harvest is not due",
                harvester_uid
            ));
        }
        harvester.ensure_active()?;

        let datasource = entities::get_datasource(&mut *conn, &harvester.datasource_uid)
            .await?
            .with_context(|| format!("Datasource {} not found", harvester.datasource_uid))?;
        let repository = entities::get_repository(&mut *conn, &harvester.repository_uid)
            .await?
            .with_context(|| format!("Repository {} not found", harvester.repository_uid))?;
        drop(conn);

        info!("Running harvester {}", harvester_uid);

        let timeout = self.config.harvest.http_timeout();
        let target = HarvestTarget {
            harvester: &harvester,
            datasource: &datasource,
            repository: &repository,
            http_timeout: timeout,
        };
        let collector = self.collectors.build(&target)?;
        let sink = self.sinks.build(&target)?;

        let polygons = match &harvester.granularity_rule()?.spatial_extent {
            Some(source) => {
                let client = Client::builder().timeout(timeout).build()?;
                Some(load_polygons(&client, source).await?)
            }
            None => None,
        };
        let curator = Curator::new(
            harvester.granularity_with(polygons)?,
            harvester.default_values.clone(),
            harvester.supplementary_values.clone(),
        );

        entities::set_lastrun(&self.pool, harvester_uid, now).await?;

        let ledger = SqliteLedger::new(self.pool.clone());
        let pipeline = HarvestPipeline {
            harvester: &harvester,
            pairing: Pairing {
                datasource_id: datasource.datasource_id,
                repository_id: repository.repository_id,
            },
            ledger: &ledger,
            collector: collector.as_ref(),
            sink: sink.as_ref(),
            curator: &curator,
        };
        let report = pipeline.run(self.config.harvest.limit()).await?;
        info!(
            harvester = %harvester_uid,
            discovered = report.discovered,
            fetched = report.fetched,
            fetch_failures = report.fetch_failures,
            committed = report.committed,
            commit_failures = report.commit_failures,
            "Harvest complete"
        );

        Ok(format!("Finished running harvester {}", harvester_uid))
    }

    /// Claim the lease unless a live one exists. Leases older than
    /// `lock_ttl_secs` are taken over.
    async fn acquire_lease(&self, harvester_uid: &str) -> Result<Option<Lease>> {
        let now = to_ts(Utc::now());
        let stale_before = now - self.config.harvest.lock_ttl_secs;
        let result = sqlx::query(
            r#"
            INSERT INTO invocation_lock (harvester_uid, acquired_at) VALUES (?, ?)
            ON CONFLICT(harvester_uid) DO UPDATE SET acquired_at = excluded.acquired_at
            WHERE invocation_lock.acquired_at <= ?
            "#,
        )
        .bind(harvester_uid)
        .bind(now)
        .bind(stale_before)
        .execute(&self.pool)
        .await?;

        Ok((result.rows_affected() == 1).then(|| Lease {
            harvester_uid: harvester_uid.to_string(),
            acquired_at: now,
        }))
    }

    /// Release only the lease this invocation holds.
    async fn release_lease(&self, lease: &Lease) -> Result<()> {
        sqlx::query("DELETE FROM invocation_lock WHERE harvester_uid = ? AND acquired_at = ?")
            .bind(&lease.harvester_uid)
            .bind(lease.acquired_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
