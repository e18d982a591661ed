//! Remote file naming

use std::path::Path;

/// Where an artifact goes on the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    /// Directory, with forward slashes and no trailing slash
    pub dir: String,
    pub file_name: String,
}

impl RemoteTarget {
    pub fn new(remote_dir: &str, file_name: impl Into<String>) -> Self {
        Self {
            dir: normalize_dir(remote_dir),
            file_name: file_name.into(),
        }
    }

    /// Full remote path
    pub fn path(&self) -> String {
        format!("{}/{}", self.dir, self.file_name)
    }
}

/// `{platform}-{version_name}-{version_code}{ext}`, spaces in the version
/// name replaced with underscores and the extension taken from `local_path`.
pub fn remote_file_name(
    platform_id: &str,
    version_name: &str,
    version_code: u32,
    local_path: &Path,
) -> String {
    let extension = local_path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    format!(
        "{}-{}-{}{}",
        platform_id,
        version_name.replace(' ', "_"),
        version_code,
        extension
    )
}

fn normalize_dir(remote_dir: &str) -> String {
    remote_dir.replace('\\', "/").trim_end_matches('/').to_string()
}
