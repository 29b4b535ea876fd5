//! FSM unit tests

use gameops::deploy::fsm::{CreationEvent, CreationFsm, CreationState};

#[test]
fn test_fsm_initial_state() {
    let fsm = CreationFsm::new();
    assert_eq!(fsm.state(), CreationState::Pending);
    assert!(fsm.error().is_none());
    assert!(fsm.failed_in().is_none());
}

#[test]
fn test_fsm_failure_records_stage() {
    let mut fsm = CreationFsm::new();

    fsm.process(CreationEvent::Provision).unwrap();
    fsm.process(CreationEvent::Provisioned).unwrap();
    fsm.process(CreationEvent::Fail("upload failed".to_string()))
        .unwrap();

    assert_eq!(fsm.state(), CreationState::Failed);
    assert_eq!(fsm.failed_in(), Some(CreationState::Deploying));
    assert_eq!(fsm.error(), Some("upload failed"));
}

#[test]
fn test_fsm_invalid_transition() {
    let mut fsm = CreationFsm::new();

    // Cannot skip provisioning
    assert!(fsm.process(CreationEvent::Deployed).is_err());
    assert_eq!(fsm.state(), CreationState::Pending);
}

#[test]
fn test_fsm_terminal_states_are_final() {
    let mut fsm = CreationFsm::new();
    fsm.process(CreationEvent::Provision).unwrap();
    fsm.process(CreationEvent::Fail("boom".to_string())).unwrap();

    assert!(fsm.process(CreationEvent::Fail("again".to_string())).is_err());
    assert!(fsm.process(CreationEvent::Provision).is_err());
    assert_eq!(fsm.error(), Some("boom"));
}

#[test]
fn test_fsm_state_display() {
    assert_eq!(CreationState::Registering.to_string(), "registering");
    assert_eq!(
        serde_json::to_string(&CreationState::Provisioning).unwrap(),
        "\"provisioning\""
    );
}
