//! In-process release store with the same upsert semantics as PostgreSQL

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::errors::ReleaseError;
use crate::models::release::{ReleaseRecord, StoredRelease, UpsertSummary};
use crate::store::ReleaseStore;

#[derive(Debug, Default)]
pub struct MemoryReleaseStore {
    rows: RwLock<Vec<StoredRelease>>,
}

impl MemoryReleaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All rows, in insertion order
    pub async fn rows(&self) -> Vec<StoredRelease> {
        self.rows.read().await.clone()
    }

    /// Active rows of one platform
    pub async fn active(&self, platform: &str) -> Vec<StoredRelease> {
        self.rows
            .read()
            .await
            .iter()
            .filter(|row| row.is_active && row.record.platform == platform)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ReleaseStore for MemoryReleaseStore {
    async fn upsert_release(&self, record: &ReleaseRecord) -> Result<UpsertSummary, ReleaseError> {
        record.validate()?;

        // The write lock is the transaction
        let mut rows = self.rows.write().await;

        let mut deactivated = 0;
        for row in rows.iter_mut().filter(|row| {
            row.is_active
                && row.record.platform == record.platform
                && row.record.version_name != record.version_name
        }) {
            row.is_active = false;
            deactivated += 1;
        }

        let now = Utc::now();
        match rows.iter_mut().find(|row| {
            row.record.platform == record.platform && row.record.version_code == record.version_code
        }) {
            Some(row) => {
                row.record = record.clone();
                row.is_active = true;
                row.created_at = now;
            }
            None => rows.push(StoredRelease {
                record: record.clone(),
                is_active: true,
                created_at: now,
            }),
        }

        Ok(UpsertSummary { deactivated })
    }
}
