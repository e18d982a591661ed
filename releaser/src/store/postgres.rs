//! PostgreSQL store for `app_updates`

use async_trait::async_trait;
use secrecy::ExposeSecret;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Postgres, Transaction};
use tracing::{debug, info, warn};

use crate::errors::ReleaseError;
use crate::models::release::{ReleaseRecord, UpsertSummary};
use crate::models::request::DatabaseParams;
use crate::store::ReleaseStore;

const DEACTIVATE_SQL: &str = "\
UPDATE app_updates SET is_active = FALSE \
WHERE platform = $1 AND is_active = TRUE AND version_name <> $2";

const UPSERT_SQL: &str = "\
INSERT INTO app_updates (
    platform, version_name, version_code, release_notes, download_url,
    is_mandatory, is_active, package_path, build_platform, build_timestamp
) VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7, $8, $9)
ON CONFLICT (platform, version_code) DO UPDATE SET
    version_name = EXCLUDED.version_name,
    release_notes = EXCLUDED.release_notes,
    download_url = EXCLUDED.download_url,
    is_mandatory = EXCLUDED.is_mandatory,
    is_active = EXCLUDED.is_active,
    package_path = EXCLUDED.package_path,
    build_platform = EXCLUDED.build_platform,
    build_timestamp = EXCLUDED.build_timestamp,
    created_at = CURRENT_TIMESTAMP";

const SCHEMA_SQL: &str = "\
CREATE TABLE IF NOT EXISTS app_updates (
    id BIGSERIAL PRIMARY KEY,
    platform VARCHAR(32) NOT NULL,
    version_name VARCHAR(64) NOT NULL,
    version_code BIGINT NOT NULL CHECK (version_code > 0),
    release_notes TEXT NOT NULL DEFAULT '',
    download_url TEXT,
    is_mandatory BOOLEAN NOT NULL DEFAULT FALSE,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    package_path TEXT NOT NULL,
    build_platform VARCHAR(32) NOT NULL,
    build_timestamp TIMESTAMPTZ NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (platform, version_code)
)";

/// Store that opens one connection per operation and always closes it
pub struct PgReleaseStore {
    params: DatabaseParams,
}

impl PgReleaseStore {
    pub fn new(params: DatabaseParams) -> Self {
        Self { params }
    }

    fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.params.host)
            .port(self.params.port)
            .database(&self.params.name)
            .username(&self.params.user)
            .password(self.params.password.expose_secret())
    }

    /// Open a connection, bounded by the configured connect timeout
    pub async fn connect(&self) -> Result<PgConnection, ReleaseError> {
        debug!(
            "Connecting to postgres://{}@{}:{}/{}",
            self.params.user, self.params.host, self.params.port, self.params.name
        );
        let options = self.connect_options();
        match tokio::time::timeout(
            self.params.connect_timeout,
            PgConnection::connect_with(&options),
        )
        .await
        {
            Ok(result) => Ok(result?),
            Err(_) => Err(ReleaseError::ConnError(format!(
                "timed out after {}s connecting to {}:{}",
                self.params.connect_timeout.as_secs(),
                self.params.host,
                self.params.port
            ))),
        }
    }

    /// Connect and run `SELECT 1`
    pub async fn ping(&self) -> Result<(), ReleaseError> {
        let mut conn = self.connect().await?;
        let result = sqlx::query("SELECT 1").execute(&mut conn).await;
        close(conn).await;
        result?;
        Ok(())
    }

    /// Create `app_updates` if it does not exist yet
    pub async fn ensure_schema(&self) -> Result<(), ReleaseError> {
        let mut conn = self.connect().await?;
        let result = sqlx::query(SCHEMA_SQL).execute(&mut conn).await;
        close(conn).await;
        result?;
        info!("Table app_updates is present");
        Ok(())
    }
}

#[async_trait]
impl ReleaseStore for PgReleaseStore {
    async fn upsert_release(&self, record: &ReleaseRecord) -> Result<UpsertSummary, ReleaseError> {
        record.validate()?;

        let mut conn = self.connect().await?;
        let result = upsert_in_transaction(&mut conn, record).await;
        close(conn).await;
        result
    }
}

async fn upsert_in_transaction(
    conn: &mut PgConnection,
    record: &ReleaseRecord,
) -> Result<UpsertSummary, ReleaseError> {
    let mut tx = conn.begin().await?;
    match write_release(&mut tx, record).await {
        Ok(summary) => {
            tx.commit().await?;
            Ok(summary)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!("Rollback failed: {}", rollback);
            } else {
                debug!("Transaction rolled back");
            }
            Err(e)
        }
    }
}

async fn write_release(
    tx: &mut Transaction<'_, Postgres>,
    record: &ReleaseRecord,
) -> Result<UpsertSummary, ReleaseError> {
    let deactivated = sqlx::query(DEACTIVATE_SQL)
        .bind(&record.platform)
        .bind(&record.version_name)
        .execute(&mut **tx)
        .await?
        .rows_affected();

    sqlx::query(UPSERT_SQL)
        .bind(&record.platform)
        .bind(&record.version_name)
        .bind(record.version_code)
        .bind(&record.release_notes)
        .bind(&record.download_url)
        .bind(record.is_mandatory)
        .bind(&record.package_path)
        .bind(&record.build_platform)
        .bind(record.build_timestamp)
        .execute(&mut **tx)
        .await?;

    Ok(UpsertSummary { deactivated })
}

async fn close(conn: PgConnection) {
    if let Err(e) = conn.close().await {
        debug!("Closing database connection failed: {}", e);
    }
}
