//! Ledger inspection for `agentctl records`.
//!
//! Rows whose retry budget is spent are only ever surfaced here; `--frozen`
//! lists just those.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use harvest_agent_core::ledger::{LedgerFilter, LedgerRow, LedgerStore, RecordStatus};

use crate::config::Config;
use crate::db;
use crate::entities;
use crate::sqlite_ledger::SqliteLedger;

#[derive(Debug, Clone, Default)]
pub struct RecordsQuery {
    /// Restrict to the datasource/repository pairing of this harvester.
    pub harvester: Option<String>,
    pub status: Option<RecordStatus>,
    pub frozen: bool,
}

pub async fn run_records(config: &Config, query: &RecordsQuery, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let rows = list_records(&pool, query).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else if rows.is_empty() {
        println!("No records.");
    } else {
        print!("{}", format_table(&rows));
    }
    Ok(())
}

pub async fn list_records(pool: &SqlitePool, query: &RecordsQuery) -> Result<Vec<LedgerRow>> {
    let mut filter = LedgerFilter {
        status: query.status,
        frozen_only: query.frozen,
        ..Default::default()
    };

    if let Some(uid) = &query.harvester {
        let mut conn = pool.acquire().await?;
        let harvester = entities::get_harvester(&mut *conn, uid)
            .await?
            .with_context(|| format!("Harvester {} not found", uid))?;
        let datasource = entities::get_datasource(&mut *conn, &harvester.datasource_uid)
            .await?
            .with_context(|| format!("Datasource {} not found", harvester.datasource_uid))?;
        let repository = entities::get_repository(&mut *conn, &harvester.repository_uid)
            .await?
            .with_context(|| format!("Repository {} not found", harvester.repository_uid))?;
        filter.datasource_id = Some(datasource.datasource_id);
        filter.repository_id = Some(repository.repository_id);
    }

    SqliteLedger::new(pool.clone()).list(&filter).await
}

fn format_table(rows: &[LedgerRow]) -> String {
    let mut out = format!(
        "{:<4} {:<4} {:<40} {:<10} {:>6}  {:<20} {}\n",
        "DS", "REPO", "UID", "STATUS", "ERRORS", "UPDATED", "LAST ERROR"
    );
    out.push_str(&"-".repeat(100));
    out.push('\n');
    for row in rows {
        let last_error = row
            .last_error
            .as_deref()
            .and_then(|e| e.lines().next())
            .unwrap_or("");
        out.push_str(&format!(
            "{:<4} {:<4} {:<40} {:<10} {:>6}  {:<20} {}\n",
            row.key.datasource_id,
            row.key.repository_id,
            row.key.uid,
            row.status.as_str(),
            row.error_count,
            row.updated.format("%Y-%m-%d %H:%M:%S"),
            last_error
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use harvest_agent_core::ledger::LedgerKey;

    #[test]
    fn test_table_shows_first_error_line() {
        let row = LedgerRow {
            key: LedgerKey::new(1, 2, "sst_2017.nc"),
            timestamp: None,
            metadata: None,
            metadata_uid: None,
            status: RecordStatus::Pending,
            last_error: Some("Error requesting http://x\nCaused by: refused".to_string()),
            error_count: 10,
            updated: Utc.with_ymd_and_hms(2017, 4, 3, 12, 0, 0).unwrap(),
        };
        let table = format_table(&[row]);
        let line = table.lines().nth(2).unwrap();
        assert!(line.contains("sst_2017.nc"));
        assert!(line.contains("Pending"));
        assert!(line.contains("2017-04-03 12:00:00"));
        assert!(line.ends_with("Error requesting http://x"));
        assert!(!table.contains("Caused by"));
    }
}
