//! Deploy pipeline: stage machine, notifications and run admission

pub mod events;
pub mod fsm;
pub mod manager;
pub mod orchestrator;

pub use events::{DeployEvent, PipelineStatus, Reporter, RunOutcome};
pub use fsm::PipelineStage;
pub use manager::{RunHandle, RunManager};
pub use orchestrator::DeployOrchestrator;
