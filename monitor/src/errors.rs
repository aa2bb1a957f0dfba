//! Error types for the server monitor

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config::settings::ConfigError;
use crate::deploy::git::GitError;

/// Main error type for the server monitor
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Logging error: {0}")]
    LoggingError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),
}

/// Errors raised by a process supervisor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("supervisor has already been started")]
    AlreadyStarted,

    #[error("supervisor is already shutting down")]
    AlreadyStopping,

    #[error("supervisor is already stopped")]
    AlreadyStopped,

    #[error("invalid supervisor transition: {0}")]
    InvalidTransition(String),

    #[error("supervision task failed: {0}")]
    Join(String),
}

/// Failure of a single deployment step
#[derive(Error, Debug)]
pub enum StepError {
    #[error("branch '{branch}' has diverged from origin and cannot be fast-forwarded")]
    MergeConflict { branch: String },

    #[error("compilation failed: {0}")]
    CompileFailed(String),

    #[error("build artifact not found at {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("git error: {0}")]
    Git(#[from] GitError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tool failed: {0}")]
    ToolFailed(String),

    #[error("step timed out after {0:?}")]
    TimedOut(Duration),
}

/// Errors produced while routing a command request
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Command is not valid.")]
    UnknownCommand(String),

    #[error("Not authorized to use this command.")]
    Unauthorized { command: String },

    #[error("Invalid arguments for {command}: {reason}")]
    InvalidArguments { command: String, reason: String },
}
