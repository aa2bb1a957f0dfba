//! Daemon process supervisor
//!
//! Keeps one daemon process alive for a server. The supervision loop spawns
//! the daemon, waits for it to exit, sleeps a cooldown and respawns it until
//! a stop is requested. Stops and restarts send SIGTERM first and kill the
//! daemon only once the grace period runs out. Child handles are spawned with
//! `kill_on_drop` so the daemon never outlives its supervision task.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::errors::SupervisorError;
use crate::models::server::ServerRecord;
use crate::supervisor::fsm::{SupervisorEvent, SupervisorFsm, SupervisorState};

/// Default delay between a daemon exit and its respawn
pub const DEFAULT_RESTART_COOLDOWN: Duration = Duration::from_secs(30);

/// Default time a daemon gets to exit after SIGTERM before it is killed
pub const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(10);

/// Program and arguments used to launch a daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl LaunchCommand {
    /// The daemon launch line for a server record
    pub fn for_record(record: &ServerRecord) -> Self {
        Self {
            program: record.daemon_path(),
            args: vec![
                record.deployed_artifact_path().to_string_lossy().into_owned(),
                "-port".to_string(),
                record.port().to_string(),
                "-trusted".to_string(),
                record.visibility().as_flag().to_string(),
                "-close".to_string(),
            ],
            working_dir: Some(record.game_path().to_path_buf()),
        }
    }

    fn spawn(&self) -> std::io::Result<Child> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.spawn()
    }
}

enum Wake {
    Exited(std::io::Result<ExitStatus>),
    Stop,
    Restart,
}

/// Supervises one daemon process
pub struct ProcessSupervisor {
    name: String,
    launch: LaunchCommand,
    cooldown: Duration,
    terminate_grace: Duration,
    fsm: Mutex<SupervisorFsm>,
    stop_tx: watch::Sender<bool>,
    restart_tx: watch::Sender<u64>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl ProcessSupervisor {
    /// Create an idle supervisor
    pub fn new(name: impl Into<String>, launch: LaunchCommand, cooldown: Duration) -> Self {
        let (stop_tx, _) = watch::channel(false);
        let (restart_tx, _) = watch::channel(0);
        Self {
            name: name.into(),
            launch,
            cooldown,
            terminate_grace: DEFAULT_TERMINATE_GRACE,
            fsm: Mutex::new(SupervisorFsm::new()),
            stop_tx,
            restart_tx,
            handle: Mutex::new(None),
        }
    }

    /// Create an idle supervisor for a server record
    pub fn for_record(record: &ServerRecord, cooldown: Duration) -> Self {
        Self::new(record.name(), LaunchCommand::for_record(record), cooldown)
    }

    /// Override the time allowed between SIGTERM and a forced kill
    pub fn with_terminate_grace(mut self, grace: Duration) -> Self {
        self.terminate_grace = grace;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn launch_command(&self) -> &LaunchCommand {
        &self.launch
    }

    fn fsm(&self) -> MutexGuard<'_, SupervisorFsm> {
        self.fsm.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handle_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.handle.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> SupervisorState {
        self.fsm().state().clone()
    }

    /// True while a daemon has been spawned and no stop was requested
    pub fn is_running(&self) -> bool {
        self.fsm().is_running()
    }

    pub fn spawn_count(&self) -> u32 {
        self.fsm().spawn_count()
    }

    pub fn last_error(&self) -> Option<String> {
        self.fsm().error().map(str::to_string)
    }

    fn transition(&self, event: SupervisorEvent) {
        if let Err(e) = self.fsm().process(event) {
            warn!(server = %self.name, "{}", e);
        }
    }

    /// Start the supervision loop on its own task
    pub fn start(self: &Arc<Self>) -> Result<(), SupervisorError> {
        let mut handle = self.handle_slot();
        if handle.is_some() || self.state() != SupervisorState::Idle {
            return Err(SupervisorError::AlreadyStarted);
        }

        let this = self.clone();
        *handle = Some(tokio::spawn(async move { this.supervise().await }));
        Ok(())
    }

    async fn supervise(self: Arc<Self>) {
        let mut stop_rx = self.stop_tx.subscribe();
        let mut restart_rx = self.restart_tx.subscribe();

        info!(server = %self.name, "Supervision started");

        while !*stop_rx.borrow() {
            // Restart requests made while no daemon was up are stale
            drop(restart_rx.borrow_and_update());

            match self.launch.spawn() {
                Ok(mut child) => {
                    self.transition(SupervisorEvent::Spawned);
                    info!(server = %self.name, pid = ?child.id(), "Daemon started");

                    let wake = tokio::select! {
                        status = child.wait() => Wake::Exited(status),
                        _ = stop_rx.wait_for(|stop| *stop) => Wake::Stop,
                        _ = restart_rx.changed() => Wake::Restart,
                    };

                    let status = match wake {
                        Wake::Exited(status) => status,
                        Wake::Stop => {
                            warn!(server = %self.name, "Terminating daemon for shut down");
                            terminate(&mut child, self.terminate_grace).await
                        }
                        Wake::Restart => {
                            warn!(server = %self.name, "Terminating daemon for restart");
                            terminate(&mut child, self.terminate_grace).await
                        }
                    };

                    match status {
                        Ok(status) => {
                            self.transition(SupervisorEvent::Exited(status.code()));
                            warn!(server = %self.name, %status, "Daemon closed");
                        }
                        Err(e) => {
                            self.transition(SupervisorEvent::Exited(None));
                            error!(server = %self.name, "Failed to wait on daemon: {}", e);
                        }
                    }
                }
                Err(e) => {
                    error!(
                        server = %self.name,
                        program = %self.launch.program.display(),
                        "Failed to start daemon: {}", e
                    );
                    self.transition(SupervisorEvent::SpawnFailed(e.to_string()));
                }
            }

            if *stop_rx.borrow() {
                break;
            }

            info!(server = %self.name, cooldown = ?self.cooldown, "Waiting before respawn");
            tokio::select! {
                _ = tokio::time::sleep(self.cooldown) => {}
                _ = stop_rx.wait_for(|stop| *stop) => {}
            }
        }

        self.transition(SupervisorEvent::Finished);
        info!(server = %self.name, "Supervision stopped");
    }

    /// Stop the daemon for good and wait for the supervision loop to exit
    pub async fn request_stop(&self) -> Result<(), SupervisorError> {
        {
            let mut fsm = self.fsm();
            match fsm.state() {
                SupervisorState::Stopped => return Err(SupervisorError::AlreadyStopped),
                SupervisorState::Stopping => return Err(SupervisorError::AlreadyStopping),
                _ => {}
            }
            fsm.process(SupervisorEvent::StopRequested)
                .map_err(SupervisorError::InvalidTransition)?;
        }

        warn!(server = %self.name, "Force shut down initiated");
        self.stop_tx.send_replace(true);

        let handle = self.handle_slot().take();
        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    self.transition(SupervisorEvent::Finished);
                    return Err(SupervisorError::Join(e.to_string()));
                }
            }
            // Never started
            None => self.transition(SupervisorEvent::Finished),
        }

        Ok(())
    }

    /// Terminate the current daemon and let the loop respawn it
    pub fn force_restart(&self) -> Result<(), SupervisorError> {
        let state = self.state();
        match state {
            SupervisorState::Stopped => Err(SupervisorError::AlreadyStopped),
            SupervisorState::Stopping => Err(SupervisorError::AlreadyStopping),
            SupervisorState::Idle | SupervisorState::Running => {
                warn!(server = %self.name, "Force restart initiated");
                self.restart_tx.send_modify(|generation| *generation += 1);
                Ok(())
            }
        }
    }
}

/// Ask the daemon to exit with SIGTERM, then kill it once `grace` runs out
#[cfg(unix)]
async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        // Already reaped
        return child.wait().await;
    };

    match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => warn!(pid, error = ?e, "SIGTERM to daemon failed"),
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(pid, ?grace, "Daemon ignored SIGTERM, killing it");
            kill(child).await
        }
    }
}

#[cfg(not(unix))]
async fn terminate(child: &mut Child, _grace: Duration) -> std::io::Result<ExitStatus> {
    kill(child).await
}

async fn kill(child: &mut Child) -> std::io::Result<ExitStatus> {
    if let Err(e) = child.start_kill() {
        // Already exited
        warn!("Failed to kill daemon: {}", e);
    }
    child.wait().await
}
