//! Connection tests for the database and the SFTP server

use tracing::info;

use crate::errors::ReleaseError;
use crate::models::request::{DatabaseParams, SftpParams};
use crate::store::PgReleaseStore;
use crate::transfer::sftp::SftpSession;

/// What to test
#[derive(Debug, Clone)]
pub enum ProbeTarget {
    Database(DatabaseParams),
    Transfer(SftpParams),
}

pub async fn run(target: ProbeTarget) -> Result<String, ReleaseError> {
    match target {
        ProbeTarget::Database(params) => test_database(&params).await,
        ProbeTarget::Transfer(params) => test_transfer(&params).await,
    }
}

/// Connect, run `SELECT 1` and disconnect
pub async fn test_database(params: &DatabaseParams) -> Result<String, ReleaseError> {
    PgReleaseStore::new(params.clone())
        .ping()
        .await
        .map_err(|e| explain_database_error(params, e))?;
    info!("Database {} on {} reachable", params.name, params.host);
    Ok("Database connection successful!".to_string())
}

/// Authenticate, open SFTP and list the home directory
pub async fn test_transfer(params: &SftpParams) -> Result<String, ReleaseError> {
    let params = params.clone();
    let entries = tokio::task::spawn_blocking(move || {
        let session = SftpSession::connect(&params)?;
        session.list_home()
    })
    .await??;
    info!("SFTP login succeeded, {} entries in home directory", entries.len());
    Ok("SFTP connection successful!".to_string())
}

/// Replace common connection failures with an actionable message
fn explain_database_error(params: &DatabaseParams, err: ReleaseError) -> ReleaseError {
    let text = err.to_string().to_lowercase();
    if text.contains("password authentication failed") {
        ReleaseError::AuthError(format!(
            "password authentication failed for user '{}'",
            params.user
        ))
    } else if text.contains("database") && text.contains("does not exist") {
        ReleaseError::ConfigError(format!("database '{}' does not exist", params.name))
    } else if text.contains("connection refused") {
        ReleaseError::ConnError(format!(
            "connection to {}:{} refused (check host/port/firewall)",
            params.host, params.port
        ))
    } else {
        err
    }
}
