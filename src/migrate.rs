use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table if missing. Safe to run repeatedly.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS datasource (
            datasource_id INTEGER PRIMARY KEY AUTOINCREMENT,
            uid TEXT NOT NULL UNIQUE,
            url TEXT NOT NULL,
            username TEXT,
            password TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repository (
            repository_id INTEGER PRIMARY KEY AUTOINCREMENT,
            uid TEXT NOT NULL UNIQUE,
            url TEXT NOT NULL,
            username TEXT,
            password TEXT,
            institution TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS harvester (
            harvester_id INTEGER PRIMARY KEY AUTOINCREMENT,
            uid TEXT NOT NULL UNIQUE,
            datasource_uid TEXT NOT NULL,
            repository_uid TEXT NOT NULL,
            protocol TEXT NOT NULL,
            schema TEXT NOT NULL,
            default_values TEXT NOT NULL DEFAULT '{}',
            supplementary_values TEXT NOT NULL DEFAULT '{}',
            granularity TEXT NOT NULL DEFAULT '{}',
            search_url TEXT NOT NULL,
            commit_url TEXT NOT NULL,
            frequency TEXT NOT NULL,
            status TEXT NOT NULL,
            lastrun INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // The ledger. One row per remote record per datasource/repository pairing.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS harvested_record (
            datasource_id INTEGER NOT NULL,
            repository_id INTEGER NOT NULL,
            uid TEXT NOT NULL,
            timestamp INTEGER,
            metadata TEXT,
            metadata_uid TEXT,
            status TEXT NOT NULL,
            last_error TEXT,
            error_count INTEGER NOT NULL DEFAULT 0,
            updated INTEGER NOT NULL,
            PRIMARY KEY (datasource_id, repository_id, uid),
            FOREIGN KEY (datasource_id) REFERENCES datasource(datasource_id),
            FOREIGN KEY (repository_id) REFERENCES repository(repository_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_harvested_record_status ON harvested_record(datasource_id, repository_id, status)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS invocation_lock (
            harvester_uid TEXT PRIMARY KEY,
            acquired_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
