//! Build artifact lookup

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::errors::ReleaseError;

/// Artifact picked after a build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedArtifact {
    /// Absolute path of the selected match
    pub path: PathBuf,
    /// Other matches that were ignored
    pub alternatives: Vec<PathBuf>,
}

impl LocatedArtifact {
    pub fn is_dir(&self) -> bool {
        self.path.is_dir()
    }
}

/// Whether a pattern needs glob expansion
pub fn has_wildcards(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// Resolve `pattern` relative to `root` and pick the artifact.
///
/// Wildcard patterns are expanded recursively (`**` crosses directories).
/// With several matches the first one in enumeration order wins and the rest
/// are returned as alternatives. The pattern may also name a directory.
pub fn locate(root: &Path, pattern: &str) -> Result<LocatedArtifact, ReleaseError> {
    let normalized = pattern.replace('\\', "/");
    let matches = if has_wildcards(&normalized) {
        expand(root, &normalized)?
    } else {
        let candidate = root.join(&normalized);
        if candidate.exists() {
            vec![candidate]
        } else {
            Vec::new()
        }
    };
    debug!("Pattern {} matched {} path(s)", pattern, matches.len());

    let mut matches = matches.into_iter();
    let first = matches.next().ok_or_else(|| ReleaseError::ArtifactNotFound {
        pattern: pattern.to_string(),
    })?;
    let alternatives: Vec<PathBuf> = matches.collect();
    if !alternatives.is_empty() {
        warn!(
            "Found {} artifacts for {}, using {}",
            alternatives.len() + 1,
            pattern,
            first.display()
        );
    }

    // The match may have vanished between expansion and selection
    let path = first
        .canonicalize()
        .map_err(|_| ReleaseError::ArtifactMissing { path: first.clone() })?;

    Ok(LocatedArtifact { path, alternatives })
}

fn expand(root: &Path, pattern: &str) -> Result<Vec<PathBuf>, ReleaseError> {
    let root = glob::Pattern::escape(&root.to_string_lossy());
    let full = format!("{}/{}", root.trim_end_matches(['/', '\\']), pattern);

    let paths = glob::glob(&full).map_err(|e| {
        ReleaseError::ConfigError(format!("Invalid artifact pattern '{}': {}", pattern, e))
    })?;

    Ok(paths
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                debug!("Skipping unreadable path while searching artifacts: {}", e);
                None
            }
        })
        .collect())
}
