//! Finite State Machine for a deploy run

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ReleaseError;

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Not started
    Idle,

    /// Build tool running
    Building,

    /// Artifact being transferred
    Uploading,

    /// Release record being written
    RecordingMetadata,

    /// Every stage completed
    Succeeded,

    /// A stage failed
    Failed,

    /// Stopped on request
    Cancelled,
}

impl PipelineStage {
    /// Whether the run is over
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineStage::Succeeded | PipelineStage::Failed | PipelineStage::Cancelled
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            PipelineStage::Idle => "Idle",
            PipelineStage::Building => "Building",
            PipelineStage::Uploading => "Uploading",
            PipelineStage::RecordingMetadata => "Recording metadata",
            PipelineStage::Succeeded => "Succeeded",
            PipelineStage::Failed => "Failed",
            PipelineStage::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Pipeline event
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Run started
    Start,

    /// Build exited 0 and an artifact was found
    BuildSucceeded,

    /// Artifact uploaded
    UploadSucceeded,

    /// Release record committed
    RecordSucceeded,

    /// Current stage failed
    Fail(String),

    /// Cancellation observed
    Cancel,
}

/// Deploy run FSM
#[derive(Debug, Clone)]
pub struct PipelineFsm {
    stage: PipelineStage,
    error: Option<String>,
    /// Stage that was active when the run failed or was cancelled
    interrupted_at: Option<PipelineStage>,
}

impl PipelineFsm {
    /// Create a new FSM in idle state
    pub fn new() -> Self {
        Self {
            stage: PipelineStage::Idle,
            error: None,
            interrupted_at: None,
        }
    }

    /// Get current stage
    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Stage the run was in when it failed or was cancelled
    pub fn interrupted_at(&self) -> Option<PipelineStage> {
        self.interrupted_at
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: PipelineEvent) -> Result<PipelineStage, ReleaseError> {
        let new_stage = match (self.stage, &event) {
            (PipelineStage::Idle, PipelineEvent::Start) => PipelineStage::Building,
            (PipelineStage::Building, PipelineEvent::BuildSucceeded) => PipelineStage::Uploading,
            (PipelineStage::Uploading, PipelineEvent::UploadSucceeded) => {
                PipelineStage::RecordingMetadata
            }
            (PipelineStage::RecordingMetadata, PipelineEvent::RecordSucceeded) => {
                PipelineStage::Succeeded
            }

            // Idle fails when the request is rejected before the build
            (
                stage @ (PipelineStage::Idle
                | PipelineStage::Building
                | PipelineStage::Uploading
                | PipelineStage::RecordingMetadata),
                PipelineEvent::Fail(err),
            ) => {
                self.error = Some(err.clone());
                self.interrupted_at = Some(stage);
                PipelineStage::Failed
            }

            (
                stage @ (PipelineStage::Idle
                | PipelineStage::Building
                | PipelineStage::Uploading
                | PipelineStage::RecordingMetadata),
                PipelineEvent::Cancel,
            ) => {
                self.interrupted_at = Some(stage);
                PipelineStage::Cancelled
            }

            // Cancelling a finished run changes nothing
            (stage, PipelineEvent::Cancel) if stage.is_terminal() => stage,

            (stage, event) => {
                return Err(ReleaseError::Transition(format!(
                    "{:?} -> {:?}",
                    stage, event
                )));
            }
        };

        self.stage = new_stage;
        Ok(new_stage)
    }
}

impl Default for PipelineFsm {
    fn default() -> Self {
        Self::new()
    }
}
