//! Record stage: persist the release metadata

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::errors::ReleaseError;
use crate::models::release::{ReleaseRecord, UpsertSummary};

pub use memory::MemoryReleaseStore;
pub use postgres::PgReleaseStore;

/// Transactional release metadata store
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    /// Deactivate every other active version name of the record's platform,
    /// then insert the record or overwrite the row with the same
    /// (platform, version_code). Both happen atomically or not at all.
    ///
    /// Invalid records are rejected with `ValidationError` before the store
    /// is touched.
    async fn upsert_release(&self, record: &ReleaseRecord) -> Result<UpsertSummary, ReleaseError>;
}
