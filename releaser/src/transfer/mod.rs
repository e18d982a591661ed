//! Upload stage: move the artifact to the release server

pub mod keys;
pub mod naming;
pub mod sftp;

use std::ops::ControlFlow;
use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::deploy::events::Reporter;
use crate::errors::ReleaseError;
use crate::models::release::UploadResult;
use crate::models::request::SftpParams;

pub use naming::{remote_file_name, RemoteTarget};
use sftp::{RemoteDirState, SftpSession};

/// Moves a local artifact to its remote location
#[async_trait]
pub trait ArtifactUploader: Send + Sync {
    /// Upload `local` to `target`, reporting progress through `reporter`.
    ///
    /// Must return `Cancelled` promptly once `cancel` fires.
    async fn upload(
        &self,
        local: &Path,
        target: &RemoteTarget,
        reporter: &Reporter,
        cancel: &CancellationToken,
    ) -> Result<UploadResult, ReleaseError>;
}

/// Uploader backed by an SFTP session per upload
pub struct SftpUploader {
    params: SftpParams,
}

impl SftpUploader {
    pub fn new(params: SftpParams) -> Self {
        Self { params }
    }
}

#[async_trait]
impl ArtifactUploader for SftpUploader {
    async fn upload(
        &self,
        local: &Path,
        target: &RemoteTarget,
        reporter: &Reporter,
        cancel: &CancellationToken,
    ) -> Result<UploadResult, ReleaseError> {
        if local.is_dir() {
            return Err(ReleaseError::UnsupportedDirectoryUpload(local.to_path_buf()));
        }

        let params = self.params.clone();
        let local = local.to_path_buf();
        let target = target.clone();
        let reporter = reporter.clone();
        let cancel = cancel.clone();

        // libssh2 is blocking
        tokio::task::spawn_blocking(move || {
            upload_blocking(&params, &local, &target, &reporter, &cancel)
        })
        .await?
    }
}

fn upload_blocking(
    params: &SftpParams,
    local: &Path,
    target: &RemoteTarget,
    reporter: &Reporter,
    cancel: &CancellationToken,
) -> Result<UploadResult, ReleaseError> {
    let remote_path = target.path();
    reporter.line(format!("Target remote path: {}", remote_path));
    reporter.line(format!(
        "Connecting to {}@{}:{}...",
        params.user, params.host, params.port
    ));

    let session = SftpSession::connect(params)?;
    if cancel.is_cancelled() {
        return Err(ReleaseError::Cancelled);
    }

    match session.ensure_remote_dir(&target.dir) {
        Ok(RemoteDirState::Existing) => {
            reporter.line(format!("Remote directory {} found.", target.dir))
        }
        Ok(RemoteDirState::Created) => {
            reporter.line(format!("Remote directory {} not found, created it.", target.dir))
        }
        Err(e) => {
            reporter.line(format!("Error: {}", e));
            return Err(e);
        }
    }

    reporter.line(format!("Uploading {} to {}...", local.display(), remote_path));
    let started = Instant::now();
    let bytes = session.upload(local, &remote_path, progress_checkpoint(reporter, cancel))?;
    let elapsed = started.elapsed();

    reporter.line(upload_summary(bytes, elapsed));
    info!("Uploaded {} bytes to {}", bytes, remote_path);

    Ok(UploadResult {
        remote_path,
        bytes,
        elapsed,
    })
}

/// Per-chunk callback: stop once `cancel` fires, otherwise report progress
pub fn progress_checkpoint<'a>(
    reporter: &'a Reporter,
    cancel: &'a CancellationToken,
) -> impl FnMut(u64, u64) -> ControlFlow<()> + 'a {
    move |sent, total| {
        if cancel.is_cancelled() {
            return ControlFlow::Break(());
        }
        reporter.progress(sent, total);
        ControlFlow::Continue(())
    }
}

/// `Upload complete (X MB in Ys, Z MB/s).`
pub fn upload_summary(bytes: u64, elapsed: Duration) -> String {
    let megabytes = bytes as f64 / (1024.0 * 1024.0);
    let seconds = elapsed.as_secs_f64();
    let speed = if seconds > 0.0 { megabytes / seconds } else { 0.0 };
    format!(
        "Upload complete ({:.2} MB in {:.2}s, {:.2} MB/s).",
        megabytes, seconds, speed
    )
}
