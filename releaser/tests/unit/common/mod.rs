//! Shared fixtures for pipeline tests

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use releaser::build::runner::ProcessRunner;
use releaser::deploy::{DeployOrchestrator, Reporter};
use releaser::errors::ReleaseError;
use releaser::models::release::{ReleaseRecord, UploadResult, UpsertSummary};
use releaser::models::request::{
    AppVersion, BuildHost, DatabaseParams, DeployRequest, HostKeyPolicy, SftpParams,
    TargetPlatform, TransferAuth,
};
use releaser::store::{MemoryReleaseStore, ReleaseStore};
use releaser::transfer::{upload_summary, ArtifactUploader, RemoteTarget};

pub const ARTIFACT: &str = "out/app-release.apk";

/// Build script that produces `out/app-release.apk`
pub const BUILD_OK: &str = r#"
echo "building $1 $2"
mkdir -p out
printf 'apk-bytes' > out/app-release.apk
echo "done"
"#;

/// A project directory whose `build` script is run with `sh`
pub fn project(script: &str) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("build"), script).unwrap();
    dir
}

pub fn request(project_root: &Path, version_name: &str, version_code: u32) -> DeployRequest {
    DeployRequest {
        project_root: project_root.to_path_buf(),
        target: TargetPlatform::AndroidApk,
        build_tool: "sh".to_string(),
        artifact_pattern: ARTIFACT.to_string(),
        needs_archive: false,
        version: AppVersion {
            name: version_name.to_string(),
            code: version_code,
        },
        release_notes: "Bug fixes".to_string(),
        download_url: None,
        is_mandatory: false,
        build_host: BuildHost::Linux,
        transfer: SftpParams {
            host: "files.example.com".to_string(),
            port: 22,
            user: "deploy".to_string(),
            auth: TransferAuth::Password("secret".to_string().into()),
            remote_dir: "/srv/updates".to_string(),
            host_key_policy: HostKeyPolicy::AcceptAny,
            known_hosts_path: None,
            timeout: Duration::from_secs(5),
        },
        database: DatabaseParams {
            host: "db.example.com".to_string(),
            port: 5432,
            name: "releases".to_string(),
            user: "releaser".to_string(),
            password: "secret".to_string().into(),
            connect_timeout: Duration::from_secs(5),
        },
    }
}

/// Uploader that copies into a local directory standing in for the server
pub struct DirUploader {
    pub root: TempDir,
    pub calls: AtomicUsize,
}

impl DirUploader {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Local path of a remote path
    pub fn local_path(&self, remote: &str) -> PathBuf {
        self.root.path().join(remote.trim_start_matches('/'))
    }
}

#[async_trait]
impl ArtifactUploader for DirUploader {
    async fn upload(
        &self,
        local: &Path,
        target: &RemoteTarget,
        reporter: &Reporter,
        cancel: &CancellationToken,
    ) -> Result<UploadResult, ReleaseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if local.is_dir() {
            return Err(ReleaseError::UnsupportedDirectoryUpload(local.to_path_buf()));
        }
        if cancel.is_cancelled() {
            return Err(ReleaseError::Cancelled);
        }

        let started = Instant::now();
        let remote_path = target.path();
        reporter.line(format!("Target remote path: {}", remote_path));
        let dest = self.local_path(&remote_path);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = tokio::fs::copy(local, &dest).await?;
        reporter.progress(bytes, bytes);
        reporter.line(upload_summary(bytes, started.elapsed()));

        Ok(UploadResult {
            remote_path,
            bytes,
            elapsed: started.elapsed(),
        })
    }
}

/// Memory store that counts upserts
#[derive(Default)]
pub struct CountingStore {
    pub inner: MemoryReleaseStore,
    pub calls: AtomicUsize,
}

impl CountingStore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReleaseStore for CountingStore {
    async fn upsert_release(&self, record: &ReleaseRecord) -> Result<UpsertSummary, ReleaseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert_release(record).await
    }
}

pub struct Harness {
    pub uploader: Arc<DirUploader>,
    pub store: Arc<CountingStore>,
    pub orchestrator: Arc<DeployOrchestrator>,
}

impl Harness {
    pub fn new() -> Self {
        let uploader = Arc::new(DirUploader::new());
        let store = Arc::new(CountingStore::default());
        let orchestrator = Arc::new(DeployOrchestrator::new(
            ProcessRunner::new(Duration::from_millis(500)),
            uploader.clone(),
            store.clone(),
        ));
        Self {
            uploader,
            store,
            orchestrator,
        }
    }
}
