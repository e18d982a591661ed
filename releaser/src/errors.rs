//! Error types for the releaser

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the releaser
#[derive(Error, Debug)]
pub enum ReleaseError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Failed to launch '{program}': {source}")]
    LaunchError {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Build failed with {}", describe_exit(.code))]
    BuildFailed { code: Option<i32> },

    #[error("No artifact matches pattern '{pattern}'")]
    ArtifactNotFound { pattern: String },

    #[error("Artifact reported at {path} does not exist")]
    ArtifactMissing { path: PathBuf },

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Could not load private key {path}: {reason}")]
    KeyError { path: PathBuf, reason: String },

    #[error("Connection error: {0}")]
    ConnError(String),

    #[error("Transfer error: {0}")]
    TransferError(String),

    #[error("Failed to create remote directory {dir}: {reason}")]
    CreateFailed { dir: String, reason: String },

    #[error("Cannot upload directory {0} without archiving it first")]
    UnsupportedDirectoryUpload(PathBuf),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    StoreError(#[from] sqlx::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Busy: {0}")]
    Busy(String),

    #[error("Invalid transition: {0}")]
    Transition(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReleaseError {
    /// Stable short code for the error category
    pub fn code(&self) -> &'static str {
        match self {
            ReleaseError::IoError(_) => "io",
            ReleaseError::JsonError(_) => "json",
            ReleaseError::ConfigError(_) => "config",
            ReleaseError::LaunchError { .. } => "launch",
            ReleaseError::BuildFailed { .. } => "build_failed",
            ReleaseError::ArtifactNotFound { .. } | ReleaseError::ArtifactMissing { .. } => {
                "artifact_missing"
            }
            ReleaseError::AuthError(_) | ReleaseError::KeyError { .. } => "auth",
            ReleaseError::ConnError(_) => "connection",
            ReleaseError::TransferError(_) | ReleaseError::CreateFailed { .. } => "transfer",
            ReleaseError::UnsupportedDirectoryUpload(_) => "unsupported_directory_upload",
            ReleaseError::ValidationError(_) => "validation",
            ReleaseError::StoreError(_) => "store",
            ReleaseError::Cancelled => "cancelled",
            ReleaseError::Busy(_) => "busy",
            ReleaseError::Transition(_) => "transition",
            ReleaseError::Internal(_) => "internal",
        }
    }

    /// SQLSTATE of a database error, when the server reported one
    pub fn sqlstate(&self) -> Option<String> {
        match self {
            ReleaseError::StoreError(e) => e
                .as_database_error()
                .and_then(|db| db.code())
                .map(|code| code.into_owned()),
            _ => None,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

impl From<anyhow::Error> for ReleaseError {
    fn from(err: anyhow::Error) -> Self {
        ReleaseError::Internal(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ReleaseError {
    fn from(err: tokio::task::JoinError) -> Self {
        ReleaseError::Internal(format!("worker task failed: {}", err))
    }
}
