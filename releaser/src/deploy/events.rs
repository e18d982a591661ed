//! Run notifications and status

use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::deploy::fsm::PipelineStage;
use crate::errors::ReleaseError;

/// Notification delivered to the caller, in production order
#[derive(Debug, Clone, PartialEq)]
pub enum DeployEvent {
    /// Human-readable output line
    Output(String),

    /// Pipeline moved to a new stage
    StageChanged(PipelineStage),

    /// Upload progress in bytes
    UploadProgress { sent: u64, total: u64 },

    /// Terminal result, always the last event of a run
    Finished(RunOutcome),
}

/// Terminal result of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    /// Succeeded, Failed or Cancelled
    pub stage: PipelineStage,
    pub message: String,
    /// [`ReleaseError::code`] of the failure, if any
    pub error_code: Option<&'static str>,
}

impl RunOutcome {
    pub fn succeeded(message: impl Into<String>) -> Self {
        Self {
            stage: PipelineStage::Succeeded,
            message: message.into(),
            error_code: None,
        }
    }

    pub fn failed(message: impl Into<String>, error: &ReleaseError) -> Self {
        Self {
            stage: PipelineStage::Failed,
            message: message.into(),
            error_code: Some(error.code()),
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self {
            stage: PipelineStage::Cancelled,
            message: message.into(),
            error_code: Some(ReleaseError::Cancelled.code()),
        }
    }

    pub fn success(&self) -> bool {
        self.stage == PipelineStage::Succeeded
    }

    pub fn is_cancelled(&self) -> bool {
        self.stage == PipelineStage::Cancelled
    }
}

/// Snapshot of a run, as seen by the caller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStatus {
    pub stage: PipelineStage,
    pub output: Vec<String>,
    /// Fraction of the active transfer completed, 0.0 to 1.0
    pub upload_progress: Option<f64>,
}

impl Default for PipelineStatus {
    fn default() -> Self {
        Self {
            stage: PipelineStage::Idle,
            output: Vec::new(),
            upload_progress: None,
        }
    }
}

/// Sending half of a run's notifications.
///
/// Cheap to clone and usable from blocking threads. Sends never fail: a
/// caller that dropped its receiver simply stops getting events.
#[derive(Debug, Clone)]
pub struct Reporter {
    tx: mpsc::UnboundedSender<DeployEvent>,
    status: Arc<RwLock<PipelineStatus>>,
}

impl Reporter {
    /// Create a reporter and the receiver for its events
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DeployEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let reporter = Self {
            tx,
            status: Arc::new(RwLock::new(PipelineStatus::default())),
        };
        (reporter, rx)
    }

    /// Emit an output line
    pub fn line(&self, line: impl Into<String>) {
        let line = line.into();
        self.status
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .output
            .push(line.clone());
        let _ = self.tx.send(DeployEvent::Output(line));
    }

    /// Emit upload progress
    pub fn progress(&self, sent: u64, total: u64) {
        let fraction = if total == 0 {
            1.0
        } else {
            sent as f64 / total as f64
        };
        self.status
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .upload_progress = Some(fraction);
        let _ = self.tx.send(DeployEvent::UploadProgress { sent, total });
    }

    /// Emit a stage change
    pub fn stage(&self, stage: PipelineStage) {
        {
            let mut status = self.status.write().unwrap_or_else(|e| e.into_inner());
            status.stage = stage;
            if stage != PipelineStage::Uploading {
                status.upload_progress = None;
            }
        }
        let _ = self.tx.send(DeployEvent::StageChanged(stage));
    }

    /// Emit the terminal result
    pub fn finish(&self, outcome: RunOutcome) {
        let _ = self.tx.send(DeployEvent::Finished(outcome));
    }

    /// Current status snapshot
    pub fn status(&self) -> PipelineStatus {
        self.status.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Read-only view of the status that does not keep the channel open
    pub fn watch(&self) -> StatusView {
        StatusView(self.status.clone())
    }
}

/// Status of a run, readable after the reporter is gone
#[derive(Debug, Clone)]
pub struct StatusView(Arc<RwLock<PipelineStatus>>);

impl StatusView {
    pub fn get(&self) -> PipelineStatus {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
