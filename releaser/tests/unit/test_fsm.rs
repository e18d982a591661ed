//! FSM unit tests

use releaser::deploy::fsm::{PipelineEvent, PipelineFsm, PipelineStage};

#[test]
fn test_fsm_initial_state() {
    let fsm = PipelineFsm::new();
    assert_eq!(fsm.stage(), PipelineStage::Idle);
    assert!(fsm.error().is_none());
    assert!(fsm.interrupted_at().is_none());
}

#[test]
fn test_fsm_success_flow() {
    let mut fsm = PipelineFsm::new();

    // Idle -> Building -> Uploading -> RecordingMetadata -> Succeeded
    fsm.process(PipelineEvent::Start).unwrap();
    fsm.process(PipelineEvent::BuildSucceeded).unwrap();
    fsm.process(PipelineEvent::UploadSucceeded).unwrap();
    assert_eq!(fsm.stage(), PipelineStage::RecordingMetadata);

    fsm.process(PipelineEvent::RecordSucceeded).unwrap();
    assert_eq!(fsm.stage(), PipelineStage::Succeeded);
}

#[test]
fn test_fsm_upload_failure() {
    let mut fsm = PipelineFsm::new();

    fsm.process(PipelineEvent::Start).unwrap();
    fsm.process(PipelineEvent::BuildSucceeded).unwrap();
    fsm.process(PipelineEvent::Fail("connection reset".to_string()))
        .unwrap();

    assert_eq!(fsm.stage(), PipelineStage::Failed);
    assert_eq!(fsm.error(), Some("connection reset"));
    assert_eq!(fsm.interrupted_at(), Some(PipelineStage::Uploading));
}

#[test]
fn test_fsm_cancel_before_start() {
    let mut fsm = PipelineFsm::new();
    fsm.process(PipelineEvent::Cancel).unwrap();
    assert_eq!(fsm.stage(), PipelineStage::Cancelled);
    assert_eq!(fsm.interrupted_at(), Some(PipelineStage::Idle));
}

#[test]
fn test_fsm_cancel_after_finish_is_noop() {
    let mut fsm = PipelineFsm::new();
    fsm.process(PipelineEvent::Start).unwrap();
    fsm.process(PipelineEvent::Fail("exit code 1".to_string()))
        .unwrap();

    assert_eq!(fsm.process(PipelineEvent::Cancel).unwrap(), PipelineStage::Failed);
    assert_eq!(fsm.interrupted_at(), Some(PipelineStage::Building));
}

#[test]
fn test_fsm_terminal_states_are_final() {
    let mut fsm = PipelineFsm::new();
    fsm.process(PipelineEvent::Cancel).unwrap();

    assert!(fsm.process(PipelineEvent::Start).is_err());
    assert!(fsm.process(PipelineEvent::Fail("late".to_string())).is_err());
    assert_eq!(fsm.stage(), PipelineStage::Cancelled);
}

#[test]
fn test_fsm_invalid_transition() {
    let mut fsm = PipelineFsm::new();

    // Cannot skip the build
    let result = fsm.process(PipelineEvent::UploadSucceeded);
    assert!(result.is_err());
    assert_eq!(fsm.stage(), PipelineStage::Idle);
}

#[test]
fn test_fsm_rejected_request_fails_from_idle() {
    let mut fsm = PipelineFsm::new();
    fsm.process(PipelineEvent::Fail("version code must be positive".to_string()))
        .unwrap();

    assert_eq!(fsm.stage(), PipelineStage::Failed);
    assert_eq!(fsm.interrupted_at(), Some(PipelineStage::Idle));
    assert!(fsm.process(PipelineEvent::Start).is_err());
}
