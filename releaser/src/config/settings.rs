//! Settings file management

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::ReleaseError;
use crate::logs::LogLevel;
use crate::models::request::{
    AppVersion, BuildHost, DatabaseParams, DeployRequest, HostKeyPolicy, SftpParams,
    TargetPlatform, TransferAuth,
};

pub const SFTP_PASSWORD_ENV: &str = "RELEASER_SFTP_PASSWORD";
pub const SFTP_KEY_PASSPHRASE_ENV: &str = "RELEASER_SFTP_KEY_PASSPHRASE";
pub const DB_PASSWORD_ENV: &str = "RELEASER_DB_PASSWORD";

/// Releaser settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Directory for log files; stderr only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default)]
    pub project: ProjectSettings,

    #[serde(default)]
    pub target: TargetSettings,

    /// Version to release when the caller does not supply one
    #[serde(default)]
    pub version: Option<AppVersion>,

    #[serde(default)]
    pub release: ReleaseSettings,

    #[serde(default)]
    pub sftp: SftpSettings,

    #[serde(default)]
    pub database: DatabaseSettings,
}

/// Flutter project settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSettings {
    #[serde(default)]
    pub dir: PathBuf,

    #[serde(default = "default_build_tool")]
    pub build_tool: String,
}

fn default_build_tool() -> String {
    "flutter".to_string()
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::new(),
            build_tool: default_build_tool(),
        }
    }
}

/// Target platform settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSettings {
    #[serde(default = "default_platform")]
    pub platform: TargetPlatform,

    /// Overrides the platform's default artifact location
    #[serde(default)]
    pub artifact_pattern: Option<String>,
}

fn default_platform() -> TargetPlatform {
    TargetPlatform::AndroidApk
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            platform: default_platform(),
            artifact_pattern: None,
        }
    }
}

/// Release metadata settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseSettings {
    #[serde(default)]
    pub notes: String,

    #[serde(default)]
    pub download_url: Option<String>,

    #[serde(default)]
    pub is_mandatory: bool,

    #[serde(default)]
    pub build_host: BuildHost,
}

/// SFTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SftpSettings {
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_sftp_port")]
    pub port: u16,

    #[serde(default)]
    pub user: String,

    /// Prefer the environment variable over storing this in the file
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    #[serde(default)]
    pub key_path: Option<PathBuf>,

    #[serde(default, skip_serializing)]
    pub key_passphrase: Option<String>,

    #[serde(default)]
    pub remote_dir: String,

    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,

    #[serde(default)]
    pub known_hosts_path: Option<PathBuf>,

    #[serde(default = "default_sftp_timeout")]
    pub timeout_secs: u64,
}

fn default_sftp_port() -> u16 {
    22
}

fn default_sftp_timeout() -> u64 {
    20
}

impl Default for SftpSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_sftp_port(),
            user: String::new(),
            password: None,
            key_path: None,
            key_passphrase: None,
            remote_dir: String::new(),
            host_key_policy: HostKeyPolicy::default(),
            known_hosts_path: None,
            timeout_secs: default_sftp_timeout(),
        }
    }
}

/// PostgreSQL settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_db_port")]
    pub port: u16,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub user: String,

    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    #[serde(default = "default_db_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_timeout() -> u64 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_db_port(),
            name: String::new(),
            user: String::new(),
            password: None,
            connect_timeout_secs: default_db_timeout(),
        }
    }
}

/// Per-run values supplied by the caller instead of the file
#[derive(Debug, Clone, Default)]
pub struct RequestOverrides {
    /// Pre-parsed version, e.g. from the app manifest
    pub version: Option<AppVersion>,
    pub release_notes: Option<String>,
}

impl Settings {
    /// Load settings from a JSON file
    pub async fn load(path: &Path) -> Result<Self, ReleaseError> {
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            ReleaseError::ConfigError(format!(
                "Unable to read settings file {}: {}",
                path.display(),
                e
            ))
        })?;
        let settings = serde_json::from_str(&contents)?;
        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Resolve the SFTP connection parameters
    pub fn sftp_params(&self) -> Result<SftpParams, ReleaseError> {
        let sftp = &self.sftp;
        let password = env_or(SFTP_PASSWORD_ENV, sftp.password.as_deref());

        let auth = match (&sftp.key_path, password) {
            (Some(path), password) => {
                if password.is_some() {
                    warn!("Both an SFTP password and a key path are set, using the key");
                }
                TransferAuth::PrivateKey {
                    path: path.clone(),
                    passphrase: env_or(SFTP_KEY_PASSPHRASE_ENV, sftp.key_passphrase.as_deref())
                        .map(SecretString::from),
                }
            }
            (None, Some(password)) => TransferAuth::Password(SecretString::from(password)),
            (None, None) => {
                return Err(ReleaseError::ConfigError(format!(
                    "SFTP requires either a password ({}) or a private key path.",
                    SFTP_PASSWORD_ENV
                )));
            }
        };

        Ok(SftpParams {
            host: sftp.host.trim().to_string(),
            port: sftp.port,
            user: sftp.user.trim().to_string(),
            auth,
            remote_dir: sftp.remote_dir.trim().to_string(),
            host_key_policy: sftp.host_key_policy.clone(),
            known_hosts_path: sftp.known_hosts_path.clone(),
            timeout: Duration::from_secs(sftp.timeout_secs),
        })
    }

    /// Resolve the PostgreSQL connection parameters
    pub fn database_params(&self) -> Result<DatabaseParams, ReleaseError> {
        let db = &self.database;
        let password = env_or(DB_PASSWORD_ENV, db.password.as_deref()).ok_or_else(|| {
            ReleaseError::ConfigError(format!(
                "Missing PostgreSQL password ({}).",
                DB_PASSWORD_ENV
            ))
        })?;

        Ok(DatabaseParams {
            host: db.host.trim().to_string(),
            port: db.port,
            name: db.name.trim().to_string(),
            user: db.user.trim().to_string(),
            password: SecretString::from(password),
            connect_timeout: Duration::from_secs(db.connect_timeout_secs),
        })
    }

    /// Build a validated deploy request
    pub fn to_request(&self, overrides: &RequestOverrides) -> Result<DeployRequest, ReleaseError> {
        let version = overrides
            .version
            .clone()
            .or_else(|| self.version.clone())
            .ok_or_else(|| ReleaseError::ConfigError("No version name/code given.".to_string()))?;

        let release_notes = overrides
            .release_notes
            .clone()
            .unwrap_or_else(|| self.release.notes.clone())
            .trim()
            .to_string();
        if release_notes.is_empty() {
            warn!("Release notes are empty");
        }

        let target = self.target.platform;
        let request = DeployRequest {
            project_root: self.project.dir.clone(),
            target,
            build_tool: self.project.build_tool.clone(),
            artifact_pattern: self
                .target
                .artifact_pattern
                .clone()
                .unwrap_or_else(|| target.default_artifact_pattern().to_string()),
            needs_archive: target.needs_archive(),
            version,
            release_notes,
            download_url: self.release.download_url.clone(),
            is_mandatory: self.release.is_mandatory,
            build_host: self.release.build_host,
            transfer: self.sftp_params()?,
            database: self.database_params()?,
        };

        request.validate()?;
        Ok(request)
    }
}

fn env_or(var: &str, fallback: Option<&str>) -> Option<String> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(|| fallback.filter(|v| !v.is_empty()).map(str::to_string))
}
