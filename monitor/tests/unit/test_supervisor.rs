//! Process supervisor tests

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use servmon::errors::SupervisorError;
use servmon::supervisor::fsm::SupervisorState;
use servmon::supervisor::process::{LaunchCommand, ProcessSupervisor};

use crate::support::{eventually, Fixture};

/// Daemon that records SIGTERM in `mark` and exits cleanly
fn term_aware_daemon(mark: &std::path::Path) -> String {
    format!(
        "trap 'touch \"{}\"; exit 0' TERM\nwhile true; do sleep 0.05; done\n",
        mark.display()
    )
}

fn shell(script: &str) -> LaunchCommand {
    LaunchCommand {
        program: PathBuf::from("/bin/sh"),
        args: vec!["-c".to_string(), script.to_string()],
        working_dir: None,
    }
}

fn supervisor(script: &str, cooldown: Duration) -> Arc<ProcessSupervisor> {
    Arc::new(ProcessSupervisor::new("Main", shell(script), cooldown))
}

#[test]
fn test_launch_command_for_record() {
    let fixture = Fixture::new();
    let record = fixture.record("Main");

    let launch = LaunchCommand::for_record(&record);

    assert_eq!(launch.program, record.daemon_path());
    assert_eq!(
        launch.args,
        vec![
            fixture.game.join("baystation12.dmb").to_string_lossy().into_owned(),
            "-port".to_string(),
            "2506".to_string(),
            "-trusted".to_string(),
            "-public".to_string(),
            "-close".to_string(),
        ]
    );
    assert_eq!(launch.working_dir, Some(fixture.game.clone()));
}

#[tokio::test]
async fn test_exited_daemon_is_respawned_after_cooldown() {
    let sup = supervisor("exit 3", Duration::from_millis(50));

    sup.start().unwrap();
    assert!(eventually(Duration::from_secs(5), || sup.spawn_count() >= 3).await);
    assert_eq!(sup.state(), SupervisorState::Running);

    sup.request_stop().await.unwrap();
    assert_eq!(sup.state(), SupervisorState::Stopped);
}

#[tokio::test]
async fn test_request_stop_waits_for_loop_exit() {
    let sup = supervisor("exec sleep 30", Duration::from_secs(30));

    sup.start().unwrap();
    assert!(eventually(Duration::from_secs(5), || sup.is_running()).await);

    tokio::time::timeout(Duration::from_secs(5), sup.request_stop())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(sup.state(), SupervisorState::Stopped);
    assert!(!sup.is_running());
    assert_eq!(sup.spawn_count(), 1);

    assert_eq!(sup.request_stop().await, Err(SupervisorError::AlreadyStopped));
    assert_eq!(sup.force_restart(), Err(SupervisorError::AlreadyStopped));
}

#[tokio::test]
async fn test_stop_during_cooldown_does_not_respawn() {
    let sup = supervisor("exit 0", Duration::from_secs(30));

    sup.start().unwrap();
    assert!(eventually(Duration::from_secs(5), || sup.spawn_count() == 1).await);

    tokio::time::timeout(Duration::from_secs(5), sup.request_stop())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sup.spawn_count(), 1);
    assert_eq!(sup.state(), SupervisorState::Stopped);
}

#[tokio::test]
async fn test_force_restart_terminates_and_respawns() {
    let sup = supervisor("exec sleep 30", Duration::from_millis(50));

    sup.start().unwrap();
    assert!(eventually(Duration::from_secs(5), || sup.spawn_count() == 1).await);

    sup.force_restart().unwrap();
    assert!(eventually(Duration::from_secs(5), || sup.spawn_count() == 2).await);
    assert!(sup.is_running());

    sup.request_stop().await.unwrap();
}

#[tokio::test]
async fn test_supervisor_starts_once() {
    let sup = supervisor("exec sleep 30", Duration::from_secs(30));

    sup.start().unwrap();
    assert_eq!(sup.start(), Err(SupervisorError::AlreadyStarted));

    sup.request_stop().await.unwrap();
    assert_eq!(sup.start(), Err(SupervisorError::AlreadyStarted));
}

#[tokio::test]
async fn test_stop_before_start_finishes_immediately() {
    let sup = supervisor("exec sleep 30", Duration::from_secs(30));

    sup.request_stop().await.unwrap();
    assert_eq!(sup.state(), SupervisorState::Stopped);
    assert_eq!(sup.spawn_count(), 0);
}

#[tokio::test]
async fn test_spawn_failure_keeps_supervisor_idle() {
    let launch = LaunchCommand {
        program: PathBuf::from("/nonexistent/DreamDaemon"),
        args: Vec::new(),
        working_dir: None,
    };
    let sup = Arc::new(ProcessSupervisor::new("Main", launch, Duration::from_millis(50)));

    sup.start().unwrap();
    assert!(eventually(Duration::from_secs(5), || sup.last_error().is_some()).await);
    assert_eq!(sup.state(), SupervisorState::Idle);
    assert_eq!(sup.spawn_count(), 0);
    assert!(!sup.is_running());

    sup.request_stop().await.unwrap();
    assert_eq!(sup.state(), SupervisorState::Stopped);
}

#[tokio::test]
async fn test_stop_sends_sigterm_before_killing() {
    let tmp = tempfile::tempdir().unwrap();
    let mark = tmp.path().join("terminated");
    let sup = supervisor(&term_aware_daemon(&mark), Duration::from_secs(30));

    sup.start().unwrap();
    assert!(eventually(Duration::from_secs(5), || sup.is_running()).await);
    // Give the shell time to install its trap
    tokio::time::sleep(Duration::from_millis(200)).await;

    tokio::time::timeout(Duration::from_secs(5), sup.request_stop())
        .await
        .unwrap()
        .unwrap();

    assert!(mark.exists());
    assert_eq!(sup.state(), SupervisorState::Stopped);
}

#[tokio::test]
async fn test_restart_sends_sigterm_to_current_daemon() {
    let tmp = tempfile::tempdir().unwrap();
    let mark = tmp.path().join("terminated");
    let sup = supervisor(&term_aware_daemon(&mark), Duration::from_millis(50));

    sup.start().unwrap();
    assert!(eventually(Duration::from_secs(5), || sup.spawn_count() == 1).await);
    tokio::time::sleep(Duration::from_millis(200)).await;

    sup.force_restart().unwrap();
    assert!(eventually(Duration::from_secs(5), || sup.spawn_count() == 2).await);
    assert!(mark.exists());

    sup.request_stop().await.unwrap();
}

#[tokio::test]
async fn test_daemon_ignoring_sigterm_is_killed_after_grace() {
    let sup = Arc::new(
        ProcessSupervisor::new(
            "Main",
            shell("trap '' TERM\nwhile true; do sleep 0.05; done"),
            Duration::from_secs(30),
        )
        .with_terminate_grace(Duration::from_millis(200)),
    );

    sup.start().unwrap();
    assert!(eventually(Duration::from_secs(5), || sup.is_running()).await);
    tokio::time::sleep(Duration::from_millis(200)).await;

    tokio::time::timeout(Duration::from_secs(5), sup.request_stop())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sup.state(), SupervisorState::Stopped);
}
