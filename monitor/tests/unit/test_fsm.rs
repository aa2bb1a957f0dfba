//! Supervisor FSM tests

use servmon::supervisor::fsm::{SupervisorEvent, SupervisorFsm, SupervisorState};

#[test]
fn test_fsm_initial_state() {
    let fsm = SupervisorFsm::new();
    assert_eq!(fsm.state(), &SupervisorState::Idle);
    assert!(fsm.error().is_none());
    assert_eq!(fsm.spawn_count(), 0);
    assert!(!fsm.is_running());
}

#[test]
fn test_fsm_supervision_flow() {
    let mut fsm = SupervisorFsm::new();

    // Idle -> Running
    fsm.process(SupervisorEvent::Spawned).unwrap();
    assert_eq!(fsm.state(), &SupervisorState::Running);
    assert!(fsm.is_running());

    // Exit and respawn keep Running
    fsm.process(SupervisorEvent::Exited(Some(1))).unwrap();
    assert_eq!(fsm.state(), &SupervisorState::Running);
    assert_eq!(fsm.last_exit_code(), Some(1));
    fsm.process(SupervisorEvent::Spawned).unwrap();
    assert_eq!(fsm.spawn_count(), 2);

    // Running -> Stopping -> Stopped
    fsm.process(SupervisorEvent::StopRequested).unwrap();
    assert_eq!(fsm.state(), &SupervisorState::Stopping);
    assert!(!fsm.is_running());
    fsm.process(SupervisorEvent::Finished).unwrap();
    assert_eq!(fsm.state(), &SupervisorState::Stopped);
}

#[test]
fn test_fsm_spawn_failure_does_not_advance() {
    let mut fsm = SupervisorFsm::new();

    fsm.process(SupervisorEvent::SpawnFailed("No such file or directory".to_string()))
        .unwrap();
    assert_eq!(fsm.state(), &SupervisorState::Idle);
    assert_eq!(fsm.error(), Some("No such file or directory"));

    // A later successful spawn clears the error
    fsm.process(SupervisorEvent::Spawned).unwrap();
    assert!(fsm.error().is_none());
}

#[test]
fn test_fsm_stopped_is_terminal() {
    let mut fsm = SupervisorFsm::new();
    fsm.process(SupervisorEvent::StopRequested).unwrap();
    fsm.process(SupervisorEvent::Finished).unwrap();

    assert!(fsm.process(SupervisorEvent::Spawned).is_err());
    assert!(fsm.process(SupervisorEvent::StopRequested).is_err());
    assert!(fsm.process(SupervisorEvent::Exited(None)).is_err());
    assert_eq!(fsm.state(), &SupervisorState::Stopped);
}

#[test]
fn test_fsm_finished_requires_stop() {
    let mut fsm = SupervisorFsm::new();
    fsm.process(SupervisorEvent::Spawned).unwrap();
    assert!(fsm.process(SupervisorEvent::Finished).is_err());
    assert_eq!(fsm.state(), &SupervisorState::Running);
}
