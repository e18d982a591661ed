//! Admission control for deploy runs and connection tests

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::deploy::events::{DeployEvent, PipelineStatus, Reporter, RunOutcome, StatusView};
use crate::deploy::orchestrator::DeployOrchestrator;
use crate::errors::ReleaseError;
use crate::models::request::DeployRequest;
use crate::probe::{self, ProbeTarget};

/// Holds at most one active deploy run and one active connection test
#[derive(Debug, Default, Clone)]
pub struct RunManager {
    run_slot: Arc<AtomicBool>,
    probe_slot: Arc<AtomicBool>,
}

/// Released when dropped
struct SlotGuard(Arc<AtomicBool>);

impl SlotGuard {
    fn acquire(slot: &Arc<AtomicBool>, what: &str) -> Result<Self, ReleaseError> {
        slot.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ReleaseError::Busy(format!("a {} is already in progress", what)))?;
        Ok(Self(slot.clone()))
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RunManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a deploy run is active
    pub fn is_running(&self) -> bool {
        self.run_slot.load(Ordering::Acquire)
    }

    /// Start `request` on its own task.
    ///
    /// Fails with the validation error for a malformed request and with
    /// `Busy` while another run is active. The slot frees up
    /// once the run task has finished, before [`RunHandle::wait`] returns.
    pub fn start_run(
        &self,
        request: DeployRequest,
        orchestrator: Arc<DeployOrchestrator>,
    ) -> Result<RunHandle, ReleaseError> {
        request.validate()?;
        let guard = SlotGuard::acquire(&self.run_slot, "deploy run")?;

        let id = Uuid::new_v4();
        let (reporter, events) = Reporter::channel();
        let cancel = CancellationToken::new();
        let span = info_span!("run", id = %id, platform = request.platform_id());

        info!(
            "Starting run {} for {} v{}",
            id, request.target, request.version.name
        );
        let status = reporter.watch();
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(
                async move {
                    let _guard = guard;
                    orchestrator.run(&request, &reporter, &cancel).await
                }
                .instrument(span),
            )
        };

        Ok(RunHandle {
            id,
            cancel,
            status,
            events,
            task,
        })
    }

    /// Run a connection test. Fails with `Busy` while another test is active.
    pub async fn test_connection(&self, target: ProbeTarget) -> Result<String, ReleaseError> {
        let _guard = SlotGuard::acquire(&self.probe_slot, "connection test")?;
        probe::run(target).await
    }
}

/// Caller's side of an active run
#[derive(Debug)]
pub struct RunHandle {
    id: Uuid,
    cancel: CancellationToken,
    status: StatusView,
    events: mpsc::UnboundedReceiver<DeployEvent>,
    task: JoinHandle<RunOutcome>,
}

impl RunHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Request cancellation. A no-op once the run has finished.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            debug!("Cancellation requested for run {}", self.id);
            self.cancel.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Current status snapshot
    pub fn status(&self) -> PipelineStatus {
        self.status.get()
    }

    /// Next notification, `None` once the run is over and all were delivered
    pub async fn next_event(&mut self) -> Option<DeployEvent> {
        self.events.recv().await
    }

    /// Wait for the terminal outcome
    pub async fn wait(self) -> Result<RunOutcome, ReleaseError> {
        Ok(self.task.await?)
    }
}
