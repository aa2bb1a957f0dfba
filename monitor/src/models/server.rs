//! Managed server records

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::supervisor::process::ProcessSupervisor;

/// Default project base name for the game code
pub const DEFAULT_PROJECT: &str = "baystation12";

#[cfg(windows)]
pub const DAEMON_EXECUTABLE: &str = "dreamdaemon.exe";
#[cfg(not(windows))]
pub const DAEMON_EXECUTABLE: &str = "DreamDaemon";

#[cfg(windows)]
pub const COMPILER_EXECUTABLE: &str = "dreammaker.exe";
#[cfg(not(windows))]
pub const COMPILER_EXECUTABLE: &str = "DreamMaker";

/// Daemon visibility mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Invisible,
    Private,
}

impl Visibility {
    /// Launch flag passed to the daemon
    pub fn as_flag(&self) -> &'static str {
        match self {
            Visibility::Public => "-public",
            Visibility::Invisible => "-invisible",
            Visibility::Private => "-private",
        }
    }
}

impl std::str::FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim_start_matches('-').to_lowercase().as_str() {
            "public" => Ok(Visibility::Public),
            "invisible" => Ok(Visibility::Invisible),
            "private" => Ok(Visibility::Private),
            _ => Err(format!("Invalid visibility: {}", s)),
        }
    }
}

/// A server entry as it appears in the settings file
///
/// Hyphenated keys from older configuration files are accepted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerEntry {
    #[serde(default, alias = "game-path")]
    pub game_path: String,

    #[serde(default, alias = "git-path")]
    pub git_path: String,

    #[serde(default, alias = "git-branch")]
    pub git_branch: String,

    /// Directory holding the daemon and compiler executables
    #[serde(default, alias = "byond-path")]
    pub byond_path: String,

    #[serde(default)]
    pub port: u16,

    #[serde(default)]
    pub visibility: String,

    /// Start the daemon when the monitor boots
    #[serde(default)]
    pub start: bool,

    #[serde(default)]
    pub auths: Vec<String>,

    #[serde(default)]
    pub project: Option<String>,
}

/// Reasons a server entry is rejected at load time
#[derive(Error, Debug)]
pub enum RecordValidationError {
    #[error("server entry has no name")]
    MissingName,

    #[error("server {server}: malformed entry: {reason}")]
    Malformed { server: String, reason: String },

    #[error("server {server}: no {field} provided")]
    MissingField { server: String, field: &'static str },

    #[error("server {server}: invalid visibility '{value}'")]
    InvalidVisibility { server: String, value: String },

    #[error("server {server}: toolchain at {} does not contain the required executables", .path.display())]
    MissingToolchain { server: String, path: PathBuf },

    #[error("server {server}: source tree {} does not exist", .path.display())]
    MissingSourceTree { server: String, path: PathBuf },
}

/// Marker for the pipeline currently holding a record's pipeline slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineTicket {
    pub id: Uuid,
    pub attached_at: DateTime<Utc>,
}

/// State for one managed server
#[derive(Debug)]
pub struct ServerRecord {
    name: String,
    game_path: PathBuf,
    git_path: PathBuf,
    git_branch: String,
    byond_path: PathBuf,
    port: u16,
    visibility: Visibility,
    start_on_boot: bool,
    auths: HashSet<String>,
    project: String,
    supervisor: Mutex<Option<Arc<ProcessSupervisor>>>,
    pipeline: Mutex<Option<PipelineTicket>>,
}

impl ServerRecord {
    /// Validate a raw settings entry into a record
    pub fn from_value(name: &str, value: &serde_json::Value) -> Result<Self, RecordValidationError> {
        if name.is_empty() {
            return Err(RecordValidationError::MissingName);
        }

        let entry: ServerEntry =
            serde_json::from_value(value.clone()).map_err(|e| RecordValidationError::Malformed {
                server: name.to_string(),
                reason: e.to_string(),
            })?;

        Self::from_entry(name, entry)
    }

    /// Validate a typed settings entry into a record
    pub fn from_entry(name: &str, entry: ServerEntry) -> Result<Self, RecordValidationError> {
        if name.is_empty() {
            return Err(RecordValidationError::MissingName);
        }

        let missing = |field| RecordValidationError::MissingField {
            server: name.to_string(),
            field,
        };

        if entry.game_path.is_empty() {
            return Err(missing("game path"));
        }
        if entry.git_path.is_empty() {
            return Err(missing("git path"));
        }
        if entry.git_branch.is_empty() {
            return Err(missing("git branch"));
        }
        if entry.byond_path.is_empty() {
            return Err(missing("toolchain path"));
        }
        if entry.port == 0 {
            return Err(missing("port"));
        }

        let visibility = entry.visibility.parse::<Visibility>().map_err(|_| {
            RecordValidationError::InvalidVisibility {
                server: name.to_string(),
                value: entry.visibility.clone(),
            }
        })?;

        let byond_path = PathBuf::from(&entry.byond_path);
        if !byond_path.join(DAEMON_EXECUTABLE).exists() || !byond_path.join(COMPILER_EXECUTABLE).exists()
        {
            return Err(RecordValidationError::MissingToolchain {
                server: name.to_string(),
                path: byond_path,
            });
        }

        let git_path = PathBuf::from(&entry.git_path);
        if !git_path.is_dir() {
            return Err(RecordValidationError::MissingSourceTree {
                server: name.to_string(),
                path: git_path,
            });
        }

        Ok(Self {
            name: name.to_string(),
            game_path: PathBuf::from(&entry.game_path),
            git_path,
            git_branch: entry.git_branch,
            byond_path,
            port: entry.port,
            visibility,
            start_on_boot: entry.start,
            auths: entry.auths.into_iter().collect(),
            project: entry
                .project
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| DEFAULT_PROJECT.to_string()),
            supervisor: Mutex::new(None),
            pipeline: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn game_path(&self) -> &Path {
        &self.game_path
    }

    pub fn git_path(&self) -> &Path {
        &self.git_path
    }

    pub fn git_branch(&self) -> &str {
        &self.git_branch
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn start_on_boot(&self) -> bool {
        self.start_on_boot
    }

    pub fn auths(&self) -> &HashSet<String> {
        &self.auths
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// True if any of the caller's tokens may control this server
    pub fn is_authorized<S: AsRef<str>>(&self, tokens: &[S]) -> bool {
        tokens.iter().any(|t| self.auths.contains(t.as_ref()))
    }

    pub fn daemon_path(&self) -> PathBuf {
        self.byond_path.join(DAEMON_EXECUTABLE)
    }

    pub fn compiler_path(&self) -> PathBuf {
        self.byond_path.join(COMPILER_EXECUTABLE)
    }

    /// Project file consumed by the compiler
    pub fn source_project_path(&self) -> PathBuf {
        self.git_path.join(format!("{}.dme", self.project))
    }

    /// Artifact produced by the compiler inside the source tree
    pub fn compiled_artifact_path(&self) -> PathBuf {
        self.git_path.join(format!("{}.dmb", self.project))
    }

    /// Artifact the daemon runs, linked into the game tree by Install
    pub fn deployed_artifact_path(&self) -> PathBuf {
        self.game_path.join(format!("{}.dmb", self.project))
    }

    pub fn changelog_dir(&self) -> PathBuf {
        self.git_path.join("html").join("changelogs")
    }

    pub fn changelog_tool_path(&self) -> PathBuf {
        self.git_path
            .join("tools")
            .join("GenerateChangelog")
            .join("ss13_genchangelog.py")
    }

    /// Build artifact present in the game tree
    pub fn can_run(&self) -> bool {
        self.deployed_artifact_path().is_file()
    }

    /// Source project file present in the source tree
    pub fn can_compile(&self) -> bool {
        self.source_project_path().is_file()
    }

    // ============================== SUPERVISOR SLOT ================================= //

    fn supervisor_slot(&self) -> MutexGuard<'_, Option<Arc<ProcessSupervisor>>> {
        self.supervisor.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The attached supervisor, if any
    pub fn supervisor(&self) -> Option<Arc<ProcessSupervisor>> {
        self.supervisor_slot().clone()
    }

    /// Attach a supervisor built by `make` unless one is already attached.
    ///
    /// Returns the existing supervisor as the error when the slot is taken.
    pub fn attach_supervisor<F>(&self, make: F) -> Result<Arc<ProcessSupervisor>, Arc<ProcessSupervisor>>
    where
        F: FnOnce() -> Arc<ProcessSupervisor>,
    {
        let mut slot = self.supervisor_slot();
        if let Some(existing) = slot.as_ref() {
            return Err(existing.clone());
        }
        let supervisor = make();
        *slot = Some(supervisor.clone());
        debug!(server = %self.name, "Supervisor attached");
        Ok(supervisor)
    }

    /// Detach `supervisor` if it is the one currently attached
    pub fn detach_supervisor(&self, supervisor: &Arc<ProcessSupervisor>) -> bool {
        let mut slot = self.supervisor_slot();
        match slot.as_ref() {
            Some(current) if Arc::ptr_eq(current, supervisor) => {
                *slot = None;
                debug!(server = %self.name, "Supervisor detached");
                true
            }
            _ => false,
        }
    }

    // =============================== PIPELINE SLOT ================================== //

    fn pipeline_slot(&self) -> MutexGuard<'_, Option<PipelineTicket>> {
        self.pipeline.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The pipeline currently attached, if any
    pub fn attached_pipeline(&self) -> Option<PipelineTicket> {
        self.pipeline_slot().clone()
    }

    pub fn has_pipeline(&self) -> bool {
        self.pipeline_slot().is_some()
    }

    /// Claim the pipeline slot for `id`.
    ///
    /// The check and the claim happen under one lock. The returned guard
    /// releases the slot when dropped.
    pub fn try_attach_pipeline(self: &Arc<Self>, id: Uuid) -> Option<PipelineGuard> {
        let mut slot = self.pipeline_slot();
        if slot.is_some() {
            return None;
        }
        *slot = Some(PipelineTicket {
            id,
            attached_at: Utc::now(),
        });
        debug!(server = %self.name, pipeline = %id, "Pipeline attached");
        Some(PipelineGuard {
            record: self.clone(),
            id,
        })
    }
}

/// Holds a record's pipeline slot; detaches on drop
#[derive(Debug)]
pub struct PipelineGuard {
    record: Arc<ServerRecord>,
    id: Uuid,
}

impl PipelineGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn record(&self) -> &Arc<ServerRecord> {
        &self.record
    }
}

impl Drop for PipelineGuard {
    fn drop(&mut self) {
        let mut slot = self.record.pipeline_slot();
        if slot.as_ref().map(|t| t.id) == Some(self.id) {
            *slot = None;
            debug!(server = %self.record.name, pipeline = %self.id, "Pipeline detached");
        }
    }
}

/// Status snapshot reported by `get_servers`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStatus {
    pub running: bool,
    pub can_run: bool,
    pub can_compile: bool,
    pub task_active: bool,
    pub queued: usize,
}
