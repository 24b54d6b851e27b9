//! In-memory [`LedgerStore`] for tests.
//!
//! Rows live in a `BTreeMap` behind `std::sync::RwLock`, so iteration is in
//! key order like the SQLite store's `ORDER BY`.

use std::collections::BTreeMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{LedgerFilter, LedgerKey, LedgerRow, LedgerStore, RecordStatus};

pub struct InMemoryLedger {
    rows: RwLock<BTreeMap<LedgerKey, LedgerRow>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("ledger lock poisoned")
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn insert_discovered(&self, rows: &[LedgerRow]) -> Result<usize> {
        let mut stored = self.rows.write().map_err(poisoned)?;
        let mut inserted = 0;
        for row in rows {
            if !stored.contains_key(&row.key) {
                stored.insert(row.key.clone(), row.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn rows_in_status(
        &self,
        datasource_id: i64,
        repository_id: i64,
        status: RecordStatus,
        max_errors: i64,
    ) -> Result<Vec<LedgerRow>> {
        let stored = self.rows.read().map_err(poisoned)?;
        Ok(stored
            .values()
            .filter(|r| {
                r.key.datasource_id == datasource_id
                    && r.key.repository_id == repository_id
                    && r.status == status
                    && r.error_count < max_errors
            })
            .cloned()
            .collect())
    }

    async fn save(&self, row: &LedgerRow) -> Result<()> {
        self.rows
            .write()
            .map_err(poisoned)?
            .insert(row.key.clone(), row.clone());
        Ok(())
    }

    async fn get(&self, key: &LedgerKey) -> Result<Option<LedgerRow>> {
        Ok(self.rows.read().map_err(poisoned)?.get(key).cloned())
    }

    async fn list(&self, filter: &LedgerFilter) -> Result<Vec<LedgerRow>> {
        let stored = self.rows.read().map_err(poisoned)?;
        Ok(stored.values().filter(|r| filter.matches(r)).cloned().collect())
    }
}
