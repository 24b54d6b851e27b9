//! SQLite-backed [`LedgerStore`].
//!
//! Every trait method runs in its own transaction: begin, apply, commit.
//! An early return drops the transaction, which rolls it back.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use harvest_agent_core::ledger::{LedgerFilter, LedgerKey, LedgerRow, LedgerStore, RecordStatus, MAX_ATTEMPTS};

use crate::db::{from_opt_ts, from_ts, to_ts};

const COLUMNS: &str = "datasource_id, repository_id, uid, timestamp, metadata, metadata_uid, \
                       status, last_error, error_count, updated";

pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_ledger(row: &SqliteRow) -> Result<LedgerRow> {
    let metadata: Option<String> = row.get("metadata");
    let status: String = row.get("status");
    Ok(LedgerRow {
        key: LedgerKey::new(
            row.get("datasource_id"),
            row.get("repository_id"),
            row.get::<String, _>("uid"),
        ),
        timestamp: from_opt_ts(row.get("timestamp"))?,
        metadata: metadata
            .map(|text| serde_json::from_str::<Value>(&text))
            .transpose()
            .context("Invalid metadata JSON in ledger row")?,
        metadata_uid: row.get("metadata_uid"),
        status: status.parse()?,
        last_error: row.get("last_error"),
        error_count: row.get("error_count"),
        updated: from_ts(row.get("updated"))?,
    })
}

fn metadata_text(row: &LedgerRow) -> Option<String> {
    row.metadata.as_ref().map(Value::to_string)
}

#[async_trait]
impl LedgerStore for SqliteLedger {
    async fn insert_discovered(&self, rows: &[LedgerRow]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for row in rows {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO harvested_record
                    (datasource_id, repository_id, uid, timestamp, metadata, metadata_uid,
                     status, last_error, error_count, updated)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(row.key.datasource_id)
            .bind(row.key.repository_id)
            .bind(&row.key.uid)
            .bind(row.timestamp.map(to_ts))
            .bind(metadata_text(row))
            .bind(&row.metadata_uid)
            .bind(row.status.as_str())
            .bind(&row.last_error)
            .bind(row.error_count)
            .bind(to_ts(row.updated))
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn rows_in_status(
        &self,
        datasource_id: i64,
        repository_id: i64,
        status: RecordStatus,
        max_errors: i64,
    ) -> Result<Vec<LedgerRow>> {
        let sql = format!(
            "SELECT {} FROM harvested_record \
             WHERE datasource_id = ? AND repository_id = ? AND status = ? AND error_count < ? \
             ORDER BY uid",
            COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(datasource_id)
            .bind(repository_id)
            .bind(status.as_str())
            .bind(max_errors)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_ledger).collect()
    }

    async fn save(&self, row: &LedgerRow) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE harvested_record
            SET timestamp = ?, metadata = ?, metadata_uid = ?, status = ?,
                last_error = ?, error_count = ?, updated = ?
            WHERE datasource_id = ? AND repository_id = ? AND uid = ?
            "#,
        )
        .bind(row.timestamp.map(to_ts))
        .bind(metadata_text(row))
        .bind(&row.metadata_uid)
        .bind(row.status.as_str())
        .bind(&row.last_error)
        .bind(row.error_count)
        .bind(to_ts(row.updated))
        .bind(row.key.datasource_id)
        .bind(row.key.repository_id)
        .bind(&row.key.uid)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            anyhow::bail!("Ledger row '{}' does not exist", row.key.uid);
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, key: &LedgerKey) -> Result<Option<LedgerRow>> {
        let sql = format!(
            "SELECT {} FROM harvested_record WHERE datasource_id = ? AND repository_id = ? AND uid = ?",
            COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(key.datasource_id)
            .bind(key.repository_id)
            .bind(&key.uid)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_ledger).transpose()
    }

    async fn list(&self, filter: &LedgerFilter) -> Result<Vec<LedgerRow>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM harvested_record WHERE 1 = 1",
            COLUMNS
        ));
        if let Some(id) = filter.datasource_id {
            qb.push(" AND datasource_id = ").push_bind(id);
        }
        if let Some(id) = filter.repository_id {
            qb.push(" AND repository_id = ").push_bind(id);
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if filter.frozen_only {
            qb.push(" AND status != ")
                .push_bind(RecordStatus::Committed.as_str())
                .push(" AND error_count >= ")
                .push_bind(MAX_ATTEMPTS);
        }
        qb.push(" ORDER BY datasource_id, repository_id, uid");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_ledger).collect()
    }
}
