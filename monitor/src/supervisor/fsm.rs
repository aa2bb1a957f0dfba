//! Finite State Machine for daemon supervision

use serde::{Deserialize, Serialize};

/// Supervisor state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorState {
    /// Created, no daemon has been spawned successfully yet
    Idle,

    /// Daemon is up, or waiting out the cooldown between restarts
    Running,

    /// Stop requested, waiting for the supervision loop to exit
    Stopping,

    /// Supervision loop has exited; terminal
    Stopped,
}

/// Supervisor event
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// Daemon process spawned
    Spawned,

    /// Daemon process could not be spawned
    SpawnFailed(String),

    /// Daemon process exited
    Exited(Option<i32>),

    /// Stop requested by a caller
    StopRequested,

    /// Supervision loop returned
    Finished,
}

/// Supervisor FSM
#[derive(Debug, Clone)]
pub struct SupervisorFsm {
    state: SupervisorState,
    error: Option<String>,
    spawn_count: u32,
    last_exit_code: Option<i32>,
}

impl SupervisorFsm {
    /// Create a new FSM in idle state
    pub fn new() -> Self {
        Self {
            state: SupervisorState::Idle,
            error: None,
            spawn_count: 0,
            last_exit_code: None,
        }
    }

    pub fn state(&self) -> &SupervisorState {
        &self.state
    }

    /// Last spawn error, cleared by a successful spawn
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Number of successful spawns
    pub fn spawn_count(&self) -> u32 {
        self.spawn_count
    }

    pub fn last_exit_code(&self) -> Option<i32> {
        self.last_exit_code
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: SupervisorEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            // Spawning
            (SupervisorState::Idle | SupervisorState::Running, SupervisorEvent::Spawned) => {
                self.error = None;
                self.spawn_count += 1;
                SupervisorState::Running
            }
            (SupervisorState::Stopping, SupervisorEvent::Spawned) => {
                self.spawn_count += 1;
                SupervisorState::Stopping
            }
            (state, SupervisorEvent::SpawnFailed(err)) if *state != SupervisorState::Stopped => {
                self.error = Some(err.clone());
                state.clone()
            }

            // Exits keep the current state; the loop decides whether to respawn
            (state, SupervisorEvent::Exited(code)) if *state != SupervisorState::Stopped => {
                self.last_exit_code = *code;
                state.clone()
            }

            // Stopping
            (SupervisorState::Idle | SupervisorState::Running, SupervisorEvent::StopRequested) => {
                SupervisorState::Stopping
            }
            (SupervisorState::Stopping, SupervisorEvent::Finished) => SupervisorState::Stopped,

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.state == SupervisorState::Running
    }
}

impl Default for SupervisorFsm {
    fn default() -> Self {
        Self::new()
    }
}
