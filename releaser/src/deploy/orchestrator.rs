//! Build, upload and record, in that order

use std::error::Error as _;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::build::{self, runner::ProcessRunner};
use crate::deploy::events::{Reporter, RunOutcome};
use crate::deploy::fsm::{PipelineEvent, PipelineFsm, PipelineStage};
use crate::errors::ReleaseError;
use crate::models::release::ReleaseRecord;
use crate::models::request::DeployRequest;
use crate::store::{PgReleaseStore, ReleaseStore};
use crate::transfer::{remote_file_name, ArtifactUploader, RemoteTarget, SftpUploader};

/// Runs one deploy request through every stage
pub struct DeployOrchestrator {
    runner: ProcessRunner,
    uploader: Arc<dyn ArtifactUploader>,
    store: Arc<dyn ReleaseStore>,
}

impl DeployOrchestrator {
    pub fn new(
        runner: ProcessRunner,
        uploader: Arc<dyn ArtifactUploader>,
        store: Arc<dyn ReleaseStore>,
    ) -> Self {
        Self {
            runner,
            uploader,
            store,
        }
    }

    /// Orchestrator talking to the SFTP server and database named in `request`
    pub fn for_request(request: &DeployRequest) -> Self {
        Self::new(
            ProcessRunner::default(),
            Arc::new(SftpUploader::new(request.transfer.clone())),
            Arc::new(PgReleaseStore::new(request.database.clone())),
        )
    }

    /// Run the pipeline to a terminal stage.
    ///
    /// The request is validated first; a rejected request fails before the
    /// build starts. Never fails: every error ends up in the returned outcome, which is
    /// also the last event sent through `reporter`.
    pub async fn run(
        &self,
        request: &DeployRequest,
        reporter: &Reporter,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let mut fsm = PipelineFsm::new();

        let outcome = match self.execute(&mut fsm, request, reporter, cancel).await {
            Ok(message) => {
                reporter.line(format!("--- {} ---", message));
                RunOutcome::succeeded(message)
            }
            Err(ReleaseError::Cancelled) => {
                let interrupted = fsm.stage();
                advance(&mut fsm, reporter, PipelineEvent::Cancel);
                let message = match interrupted {
                    PipelineStage::Building => "Build cancelled.",
                    PipelineStage::Uploading => "Upload cancelled.",
                    _ => "Operation cancelled.",
                };
                reporter.line("--- Stop Requested ---");
                reporter.line(message);
                info!("Run cancelled during {}", interrupted);
                RunOutcome::cancelled(message)
            }
            Err(e) => {
                let failed_stage = fsm.stage();
                report_error(reporter, &e);
                advance(&mut fsm, reporter, PipelineEvent::Fail(e.to_string()));
                let message = format!("{} failed: {}", stage_subject(failed_stage), e);
                error!("{}", message);
                RunOutcome::failed(message, &e)
            }
        };

        reporter.finish(outcome.clone());
        outcome
    }

    async fn execute(
        &self,
        fsm: &mut PipelineFsm,
        request: &DeployRequest,
        reporter: &Reporter,
        cancel: &CancellationToken,
    ) -> Result<String, ReleaseError> {
        request.validate()?;
        checkpoint(cancel)?;
        advance(fsm, reporter, PipelineEvent::Start);
        reporter.line(format!(
            "--- Building {} v{} ({}) ---",
            request.target, request.version.name, request.version.code
        ));
        let built = build::run_build(&self.runner, request, reporter, cancel).await?;

        checkpoint(cancel)?;
        advance(fsm, reporter, PipelineEvent::BuildSucceeded);
        reporter.line("--- Uploading artifact ---");
        if request.needs_archive {
            warn!("{} artifacts need archiving, which is not implemented", request.target);
            reporter.line(format!(
                "Warning: {} artifacts need archiving, which is not implemented. Uploading as is.",
                request.target
            ));
        }
        let target = RemoteTarget::new(
            &request.transfer.remote_dir,
            remote_file_name(
                request.platform_id(),
                &request.version.name,
                request.version.code,
                &built.artifact,
            ),
        );
        let uploaded = self
            .uploader
            .upload(&built.artifact, &target, reporter, cancel)
            .await?;

        checkpoint(cancel)?;
        advance(fsm, reporter, PipelineEvent::UploadSucceeded);
        reporter.line("--- Recording release metadata ---");
        let record = ReleaseRecord::from_request(request, &uploaded, Utc::now());
        let summary = self.store.upsert_release(&record).await?;
        reporter.line(format!(
            "Deactivated {} older active version(s) for platform '{}'.",
            summary.deactivated, record.platform
        ));
        reporter.line(format!(
            "Release record upserted for {} v{} (code {}).",
            record.platform, record.version_name, record.version_code
        ));

        // Committed: nothing after this point is undone by a cancel
        advance(fsm, reporter, PipelineEvent::RecordSucceeded);
        Ok(format!(
            "Successfully deployed v{} for {}!",
            request.version.name, request.target
        ))
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<(), ReleaseError> {
    if cancel.is_cancelled() {
        Err(ReleaseError::Cancelled)
    } else {
        Ok(())
    }
}

fn advance(fsm: &mut PipelineFsm, reporter: &Reporter, event: PipelineEvent) {
    match fsm.process(event) {
        Ok(stage) => {
            info!("Pipeline stage: {}", stage);
            reporter.stage(stage);
        }
        Err(e) => error!("{}", e),
    }
}

fn stage_subject(stage: PipelineStage) -> &'static str {
    match stage {
        PipelineStage::Building => "Build",
        PipelineStage::Uploading => "Upload",
        PipelineStage::RecordingMetadata => "Database update",
        PipelineStage::Idle => "Validation",
        _ => "Deploy",
    }
}

fn report_error(reporter: &Reporter, err: &ReleaseError) {
    reporter.line(format!("Error: {}", err));
    if let Some(state) = err.sqlstate() {
        reporter.line(format!("  SQLSTATE: {}", state));
    }
    let mut source = err.source();
    while let Some(cause) = source {
        reporter.line(format!("  caused by: {}", cause));
        source = cause.source();
    }
}
