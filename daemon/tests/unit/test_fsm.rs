//! FSM unit tests

use deploy_api::DeploymentStatus;
use deployd::deploy::fsm::{DeploymentEvent, DeploymentFsm};
use tokio_test::{assert_err, assert_ok};

fn fail() -> DeploymentEvent {
    DeploymentEvent::Fail("stage failed".to_string())
}

#[test]
fn test_fsm_initial_state() {
    let fsm = DeploymentFsm::new();
    assert_eq!(fsm.state(), DeploymentStatus::Initializing);
    assert!(fsm.error().is_none());
    assert!(!fsm.is_terminal());
}

#[test]
fn test_fsm_happy_path() {
    let mut fsm = DeploymentFsm::new();

    assert_eq!(assert_ok!(fsm.process(DeploymentEvent::Authenticate)), DeploymentStatus::Authenticating);
    assert_eq!(assert_ok!(fsm.process(DeploymentEvent::Authenticated)), DeploymentStatus::Preparing);
    assert_eq!(assert_ok!(fsm.process(DeploymentEvent::Prepared)), DeploymentStatus::Planning);
    assert_eq!(assert_ok!(fsm.process(DeploymentEvent::Planned)), DeploymentStatus::Applying);
    assert_eq!(assert_ok!(fsm.process(DeploymentEvent::Applied)), DeploymentStatus::Completed);
    assert!(fsm.error().is_none());
}

#[test]
fn test_fsm_failure_from_every_running_state() {
    let steps = [
        DeploymentEvent::Authenticate,
        DeploymentEvent::Authenticated,
        DeploymentEvent::Prepared,
        DeploymentEvent::Planned,
    ];

    for depth in 0..=steps.len() {
        let mut fsm = DeploymentFsm::new();
        for event in steps.iter().take(depth) {
            assert_ok!(fsm.process(event.clone()));
        }
        assert_ok!(fsm.process(fail()));
        assert_eq!(fsm.state(), DeploymentStatus::Failed);
        assert_eq!(fsm.error(), Some("stage failed"));
    }
}

#[test]
fn test_fsm_terminal_states_are_final() {
    let mut completed = DeploymentFsm::new();
    for event in [
        DeploymentEvent::Authenticate,
        DeploymentEvent::Authenticated,
        DeploymentEvent::Prepared,
        DeploymentEvent::Planned,
        DeploymentEvent::Applied,
    ] {
        assert_ok!(completed.process(event));
    }
    assert_err!(completed.process(fail()));
    assert_err!(completed.process(DeploymentEvent::Authenticate));
    assert_eq!(completed.state(), DeploymentStatus::Completed);

    let mut failed = DeploymentFsm::new();
    assert_ok!(failed.process(fail()));
    assert_err!(failed.process(DeploymentEvent::Authenticate));
    assert_eq!(failed.state(), DeploymentStatus::Failed);
}

#[test]
fn test_fsm_rejects_skipped_stages() {
    let mut fsm = DeploymentFsm::new();
    assert_err!(fsm.process(DeploymentEvent::Planned));
    assert_ok!(fsm.process(DeploymentEvent::Authenticate));
    assert_err!(fsm.process(DeploymentEvent::Applied));
    assert_eq!(fsm.state(), DeploymentStatus::Authenticating);
}
