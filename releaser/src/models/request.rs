//! Deploy request model

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::errors::ReleaseError;

/// Release target, with the build settings each one implies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetPlatform {
    AndroidApk,
    AndroidAppBundle,
    IosIpa,
    Web,
}

impl TargetPlatform {
    pub const ALL: [TargetPlatform; 4] = [
        TargetPlatform::AndroidApk,
        TargetPlatform::AndroidAppBundle,
        TargetPlatform::IosIpa,
        TargetPlatform::Web,
    ];

    /// Configuration key
    pub fn key(&self) -> &'static str {
        match self {
            TargetPlatform::AndroidApk => "android-apk",
            TargetPlatform::AndroidAppBundle => "android-appbundle",
            TargetPlatform::IosIpa => "ios-ipa",
            TargetPlatform::Web => "web",
        }
    }

    /// Platform identifier stored with the release record
    pub fn id(&self) -> &'static str {
        match self {
            TargetPlatform::AndroidApk | TargetPlatform::AndroidAppBundle => "android",
            TargetPlatform::IosIpa => "ios",
            TargetPlatform::Web => "web",
        }
    }

    /// Platform argument passed to `<tool> build`
    pub fn build_arg(&self) -> &'static str {
        match self {
            TargetPlatform::AndroidApk => "apk",
            TargetPlatform::AndroidAppBundle => "appbundle",
            TargetPlatform::IosIpa => "ipa",
            TargetPlatform::Web => "web",
        }
    }

    /// Where the build leaves its output, relative to the project root
    pub fn default_artifact_pattern(&self) -> &'static str {
        match self {
            TargetPlatform::AndroidApk => "build/app/outputs/flutter-apk/app-release.apk",
            TargetPlatform::AndroidAppBundle => "build/app/outputs/bundle/release/app-release.aab",
            TargetPlatform::IosIpa => "build/ios/ipa/*.ipa",
            TargetPlatform::Web => "build/web",
        }
    }

    /// Whether the output is a directory that must be archived before upload
    pub fn needs_archive(&self) -> bool {
        matches!(self, TargetPlatform::Web)
    }
}

impl fmt::Display for TargetPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for TargetPlatform {
    type Err = ReleaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "android-apk" | "apk" => Ok(TargetPlatform::AndroidApk),
            "android-appbundle" | "appbundle" | "aab" => Ok(TargetPlatform::AndroidAppBundle),
            "ios-ipa" | "ipa" | "ios" => Ok(TargetPlatform::IosIpa),
            "web" => Ok(TargetPlatform::Web),
            other => Err(ReleaseError::ConfigError(format!(
                "Unknown target platform '{}' (expected one of: {})",
                other,
                TargetPlatform::ALL.map(|t| t.key()).join(", ")
            ))),
        }
    }
}

impl Serialize for TargetPlatform {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.key())
    }
}

impl<'de> Deserialize<'de> for TargetPlatform {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Machine the build runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildHost {
    Windows,
    #[serde(rename = "macOS", alias = "macos")]
    MacOs,
    Linux,
}

impl BuildHost {
    /// Build host matching the running OS
    pub fn current() -> Self {
        match std::env::consts::OS {
            "windows" => BuildHost::Windows,
            "macos" => BuildHost::MacOs,
            _ => BuildHost::Linux,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BuildHost::Windows => "Windows",
            BuildHost::MacOs => "macOS",
            BuildHost::Linux => "Linux",
        }
    }
}

impl Default for BuildHost {
    fn default() -> Self {
        Self::current()
    }
}

impl fmt::Display for BuildHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Version pair, either typed in or read from the app manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppVersion {
    pub name: String,
    pub code: u32,
}

/// How to verify the remote host key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyPolicy {
    /// Trust any host key, including unknown hosts
    #[default]
    AcceptAny,
    /// Require a matching entry in an OpenSSH known_hosts file
    KnownHosts,
}

/// SFTP authentication method
#[derive(Debug)]
pub enum TransferAuth {
    Password(SecretString),
    PrivateKey {
        path: PathBuf,
        passphrase: Option<SecretString>,
    },
}

impl Clone for TransferAuth {
    fn clone(&self) -> Self {
        match self {
            TransferAuth::Password(password) => {
                TransferAuth::Password(SecretString::from(password.expose_secret().to_owned()))
            }
            TransferAuth::PrivateKey { path, passphrase } => TransferAuth::PrivateKey {
                path: path.clone(),
                passphrase: passphrase
                    .as_ref()
                    .map(|p| SecretString::from(p.expose_secret().to_owned())),
            },
        }
    }
}

/// SFTP connection parameters
#[derive(Debug, Clone)]
pub struct SftpParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub auth: TransferAuth,
    pub remote_dir: String,
    pub host_key_policy: HostKeyPolicy,
    /// known_hosts file used by [`HostKeyPolicy::KnownHosts`]
    pub known_hosts_path: Option<PathBuf>,
    pub timeout: Duration,
}

/// PostgreSQL connection parameters
#[derive(Debug)]
pub struct DatabaseParams {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: SecretString,
    pub connect_timeout: Duration,
}

impl Clone for DatabaseParams {
    fn clone(&self) -> Self {
        Self {
            host: self.host.clone(),
            port: self.port,
            name: self.name.clone(),
            user: self.user.clone(),
            password: SecretString::from(self.password.expose_secret().to_owned()),
            connect_timeout: self.connect_timeout,
        }
    }
}

/// Everything one deploy run needs. Built once, read-only afterwards.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub project_root: PathBuf,
    pub target: TargetPlatform,
    /// Executable invoked as `<build_tool> build <arg> --release`
    pub build_tool: String,
    pub artifact_pattern: String,
    pub needs_archive: bool,
    pub version: AppVersion,
    pub release_notes: String,
    pub download_url: Option<String>,
    pub is_mandatory: bool,
    pub build_host: BuildHost,
    pub transfer: SftpParams,
    pub database: DatabaseParams,
}

impl DeployRequest {
    /// Platform identifier, e.g. `android`
    pub fn platform_id(&self) -> &'static str {
        self.target.id()
    }

    /// Arguments for the build tool
    pub fn build_args(&self) -> Vec<String> {
        vec![
            "build".to_string(),
            self.target.build_arg().to_string(),
            "--release".to_string(),
        ]
    }

    /// Check every field; all violations are reported together
    pub fn validate(&self) -> Result<(), ReleaseError> {
        let mut errors = Vec::new();

        if !self.project_root.is_dir() {
            errors.push(format!(
                "Project directory not found: {}",
                self.project_root.display()
            ));
        }
        if self.build_tool.trim().is_empty() {
            errors.push("Build tool must not be empty.".to_string());
        }
        if self.artifact_pattern.trim().is_empty() {
            errors.push(format!("No artifact pattern defined for {}.", self.target));
        }
        if self.target == TargetPlatform::IosIpa && self.build_host != BuildHost::MacOs {
            errors.push("iOS builds can only be performed on macOS.".to_string());
        }
        if self.version.name.trim().is_empty() || !self.version.name.contains('.') {
            errors.push(format!(
                "Invalid version name '{}' (expected a dotted version such as 1.0.0).",
                self.version.name
            ));
        }
        if self.version.code == 0 {
            errors.push("Version code must be greater than 0.".to_string());
        }

        let sftp = &self.transfer;
        if sftp.host.is_empty() || sftp.user.is_empty() || sftp.remote_dir.is_empty() {
            errors.push("Missing SFTP host, user or remote directory.".to_string());
        }
        match &sftp.auth {
            TransferAuth::Password(password) if password.expose_secret().is_empty() => {
                errors.push("SFTP password is empty.".to_string());
            }
            TransferAuth::PrivateKey { path, .. } if path.as_os_str().is_empty() => {
                errors.push("SFTP private key path is empty.".to_string());
            }
            _ => {}
        }

        let db = &self.database;
        if db.host.is_empty()
            || db.name.is_empty()
            || db.user.is_empty()
            || db.password.expose_secret().is_empty()
        {
            errors.push("Missing PostgreSQL host, database, user or password.".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ReleaseError::ConfigError(errors.join("\n")))
        }
    }
}
