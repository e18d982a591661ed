//! Release record and per-stage results

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ReleaseError;
use crate::models::request::DeployRequest;

/// Output of a successful build stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    /// Absolute path of the located artifact
    pub artifact: PathBuf,
    pub elapsed: Duration,
}

/// Output of a successful upload stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    /// Remote path the artifact was written to
    pub remote_path: String,
    pub bytes: u64,
    pub elapsed: Duration,
}

/// One row of `app_updates`, as written by an upsert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub platform: String,
    pub version_name: String,
    pub version_code: i64,
    pub release_notes: String,
    pub download_url: Option<String>,
    #[serde(default)]
    pub is_mandatory: bool,
    pub package_path: String,
    pub build_platform: String,
    pub build_timestamp: DateTime<Utc>,
}

impl ReleaseRecord {
    /// Record describing the artifact uploaded for `request`
    pub fn from_request(
        request: &DeployRequest,
        upload: &UploadResult,
        build_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            platform: request.platform_id().to_string(),
            version_name: request.version.name.clone(),
            version_code: i64::from(request.version.code),
            release_notes: request.release_notes.clone(),
            download_url: request.download_url.clone(),
            is_mandatory: request.is_mandatory,
            package_path: upload.remote_path.clone(),
            build_platform: request.build_host.label().to_string(),
            build_timestamp,
        }
    }

    /// Reject records the store must never see
    pub fn validate(&self) -> Result<(), ReleaseError> {
        if self.platform.trim().is_empty() || self.platform == "unknown" {
            return Err(ReleaseError::ValidationError(
                "Target platform ID is invalid.".to_string(),
            ));
        }
        if self.version_name.trim().is_empty() {
            return Err(ReleaseError::ValidationError(
                "Version name cannot be empty.".to_string(),
            ));
        }
        if self.build_platform.trim().is_empty() {
            return Err(ReleaseError::ValidationError(
                "Build platform cannot be empty.".to_string(),
            ));
        }
        if self.version_code <= 0 {
            return Err(ReleaseError::ValidationError(
                "Version code must be a positive integer.".to_string(),
            ));
        }
        Ok(())
    }
}

/// A stored row, with the columns the store maintains itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRelease {
    #[serde(flatten)]
    pub record: ReleaseRecord,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// What an upsert changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    /// Rows of the same platform deactivated because their version name differs
    pub deactivated: u64,
}
