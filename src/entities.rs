//! Harvester, datasource and repository rows.
//!
//! Writers take a `&mut SqliteConnection` so the config refresh can apply
//! all three upserts inside one transaction.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::{Row, SqliteConnection, SqlitePool};

use harvest_agent_core::harvester::Harvester;

use crate::db::{from_opt_ts, to_ts};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Datasource {
    pub datasource_id: i64,
    pub uid: String,
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Repository {
    pub repository_id: i64,
    pub uid: String,
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub institution: Option<String>,
}

/// Insert or update a datasource by uid. Returns `(datasource_id, created)`.
pub async fn upsert_datasource(
    conn: &mut SqliteConnection,
    uid: &str,
    url: &str,
    username: Option<&str>,
    password: Option<&str>,
) -> Result<(i64, bool)> {
    let existing: Option<i64> =
        sqlx::query_scalar("SELECT datasource_id FROM datasource WHERE uid = ?")
            .bind(uid)
            .fetch_optional(&mut *conn)
            .await?;

    match existing {
        Some(id) => {
            sqlx::query(
                "UPDATE datasource SET url = ?, username = ?, password = ? WHERE datasource_id = ?",
            )
            .bind(url)
            .bind(username)
            .bind(password)
            .bind(id)
            .execute(&mut *conn)
            .await?;
            Ok((id, false))
        }
        None => {
            let result = sqlx::query(
                "INSERT INTO datasource (uid, url, username, password) VALUES (?, ?, ?, ?)",
            )
            .bind(uid)
            .bind(url)
            .bind(username)
            .bind(password)
            .execute(&mut *conn)
            .await?;
            Ok((result.last_insert_rowid(), true))
        }
    }
}

/// Insert or update a repository by uid. Returns `(repository_id, created)`.
pub async fn upsert_repository(
    conn: &mut SqliteConnection,
    uid: &str,
    url: &str,
    username: Option<&str>,
    password: Option<&str>,
    institution: Option<&str>,
) -> Result<(i64, bool)> {
    let existing: Option<i64> =
        sqlx::query_scalar("SELECT repository_id FROM repository WHERE uid = ?")
            .bind(uid)
            .fetch_optional(&mut *conn)
            .await?;

    match existing {
        Some(id) => {
            sqlx::query(
                "UPDATE repository SET url = ?, username = ?, password = ?, institution = ? WHERE repository_id = ?",
            )
            .bind(url)
            .bind(username)
            .bind(password)
            .bind(institution)
            .bind(id)
            .execute(&mut *conn)
            .await?;
            Ok((id, false))
        }
        None => {
            let result = sqlx::query(
                "INSERT INTO repository (uid, url, username, password, institution) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(uid)
            .bind(url)
            .bind(username)
            .bind(password)
            .bind(institution)
            .execute(&mut *conn)
            .await?;
            Ok((result.last_insert_rowid(), true))
        }
    }
}

/// Insert or replace the configuration of a harvester. `lastrun` is kept.
///
/// Returns true when the harvester is new.
pub async fn upsert_harvester(conn: &mut SqliteConnection, harvester: &Harvester) -> Result<bool> {
    let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM harvester WHERE uid = ?")
        .bind(&harvester.uid)
        .fetch_one(&mut *conn)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO harvester (uid, datasource_uid, repository_uid, protocol, schema,
                               default_values, supplementary_values, granularity,
                               search_url, commit_url, frequency, status)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(uid) DO UPDATE SET
            datasource_uid = excluded.datasource_uid,
            repository_uid = excluded.repository_uid,
            protocol = excluded.protocol,
            schema = excluded.schema,
            default_values = excluded.default_values,
            supplementary_values = excluded.supplementary_values,
            granularity = excluded.granularity,
            search_url = excluded.search_url,
            commit_url = excluded.commit_url,
            frequency = excluded.frequency,
            status = excluded.status
        "#,
    )
    .bind(&harvester.uid)
    .bind(&harvester.datasource_uid)
    .bind(&harvester.repository_uid)
    .bind(&harvester.protocol)
    .bind(&harvester.schema)
    .bind(Value::Object(harvester.default_values.clone()).to_string())
    .bind(Value::Object(harvester.supplementary_values.clone()).to_string())
    .bind(Value::Object(harvester.granularity.clone()).to_string())
    .bind(&harvester.search_url)
    .bind(&harvester.commit_url)
    .bind(harvester.frequency.as_str())
    .bind(harvester.status.as_str())
    .execute(&mut *conn)
    .await?;

    Ok(!exists)
}

pub async fn get_harvester(conn: &mut SqliteConnection, uid: &str) -> Result<Option<Harvester>> {
    let row = sqlx::query(
        r#"
        SELECT uid, datasource_uid, repository_uid, protocol, schema, default_values,
               supplementary_values, granularity, search_url, commit_url, frequency,
               status, lastrun
        FROM harvester WHERE uid = ?
        "#,
    )
    .bind(uid)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let frequency: String = row.get("frequency");
    let status: String = row.get("status");
    Ok(Some(Harvester {
        uid: row.get("uid"),
        datasource_uid: row.get("datasource_uid"),
        repository_uid: row.get("repository_uid"),
        protocol: row.get("protocol"),
        schema: row.get("schema"),
        default_values: json_object(row.get("default_values"), "default_values")?,
        supplementary_values: json_object(row.get("supplementary_values"), "supplementary_values")?,
        granularity: json_object(row.get("granularity"), "granularity")?,
        search_url: row.get("search_url"),
        commit_url: row.get("commit_url"),
        frequency: frequency.parse()?,
        status: status.parse()?,
        lastrun: from_opt_ts(row.get("lastrun"))?,
    }))
}

pub async fn set_lastrun(pool: &SqlitePool, uid: &str, lastrun: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE harvester SET lastrun = ? WHERE uid = ?")
        .bind(to_ts(lastrun))
        .bind(uid)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_datasource(conn: &mut SqliteConnection, uid: &str) -> Result<Option<Datasource>> {
    let row = sqlx::query(
        "SELECT datasource_id, uid, url, username, password FROM datasource WHERE uid = ?",
    )
    .bind(uid)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|row| Datasource {
        datasource_id: row.get("datasource_id"),
        uid: row.get("uid"),
        url: row.get("url"),
        username: row.get("username"),
        password: row.get("password"),
    }))
}

pub async fn get_repository(conn: &mut SqliteConnection, uid: &str) -> Result<Option<Repository>> {
    let row = sqlx::query(
        "SELECT repository_id, uid, url, username, password, institution FROM repository WHERE uid = ?",
    )
    .bind(uid)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|row| Repository {
        repository_id: row.get("repository_id"),
        uid: row.get("uid"),
        url: row.get("url"),
        username: row.get("username"),
        password: row.get("password"),
        institution: row.get("institution"),
    }))
}

fn json_object(text: String, column: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str(&text).with_context(|| format!("Invalid JSON in harvester.{}", column))? {
        Value::Object(map) => Ok(map),
        _ => anyhow::bail!("harvester.{} must hold a JSON object", column),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::apply_schema;
    use harvest_agent_core::harvester::{Frequency, HarvesterStatus};
    use serde_json::json;
    use tempfile::TempDir;

    fn harvester() -> Harvester {
        Harvester {
            uid: "h-1".to_string(),
            datasource_uid: "ds-1".to_string(),
            repository_uid: "repo-1".to_string(),
            protocol: "OPeNDAP-NetCDF".to_string(),
            schema: "DataCite".to_string(),
            default_values: json!({"publisher": "SAEON"}).as_object().unwrap().clone(),
            supplementary_values: Map::new(),
            granularity: json!({"temporal_extent": "day"}).as_object().unwrap().clone(),
            search_url: "http://repo/search".to_string(),
            commit_url: "http://repo/commit".to_string(),
            frequency: Frequency::Days1,
            status: HarvesterStatus::Active,
            lastrun: None,
        }
    }

    #[tokio::test]
    async fn test_harvester_roundtrip_keeps_lastrun() {
        let tmp = TempDir::new().unwrap();
        let pool = crate::db::connect_path(&tmp.path().join("t.sqlite")).await.unwrap();
        apply_schema(&pool).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        assert!(upsert_harvester(&mut conn, &harvester()).await.unwrap());
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        set_lastrun(&pool, "h-1", now).await.unwrap();

        let mut changed = harvester();
        changed.frequency = Frequency::Never;
        assert!(!upsert_harvester(&mut conn, &changed).await.unwrap());

        let loaded = get_harvester(&mut conn, "h-1").await.unwrap().unwrap();
        assert_eq!(loaded.frequency, Frequency::Never);
        assert_eq!(loaded.lastrun, Some(now));
        assert_eq!(loaded.default_values["publisher"], "SAEON");
        assert!(get_harvester(&mut conn, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_datasource_upsert_keeps_id() {
        let tmp = TempDir::new().unwrap();
        let pool = crate::db::connect_path(&tmp.path().join("t.sqlite")).await.unwrap();
        apply_schema(&pool).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let (id, created) = upsert_datasource(&mut conn, "ds-1", "http://a/", None, None)
            .await
            .unwrap();
        assert!(created);
        let (again, created) =
            upsert_datasource(&mut conn, "ds-1", "http://b/", Some("u"), Some("p"))
                .await
                .unwrap();
        assert!(!created);
        assert_eq!(id, again);

        let ds = get_datasource(&mut conn, "ds-1").await.unwrap().unwrap();
        assert_eq!(ds.url, "http://b/");
        assert_eq!(ds.username.as_deref(), Some("u"));
    }
}
