//! Shared fixtures for integration tests
//!
//! The game toolchain is replaced by `/bin/sh`: the daemon and compiler
//! executables are symlinks to the shell, so the build artifact and the
//! source project file are shell scripts.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use servmon::deploy::executor::{StepContext, StepExecutor};
use servmon::deploy::step::Step;
use servmon::errors::StepError;
use servmon::models::server::{ServerRecord, COMPILER_EXECUTABLE, DAEMON_EXECUTABLE};

/// Daemon that stays up until killed
pub const LONG_RUNNING_DAEMON: &str = "exec sleep 30\n";

/// Daemon that exits right away
pub const SHORT_LIVED_DAEMON: &str = "exit 0\n";

/// Compiler script producing a clean build
pub const CLEAN_BUILD: &str =
    "printf 'exec sleep 30\\n' > baystation12.dmb\necho 'baystation12.dmb - 0 errors, 0 warnings'\n";

/// Compiler script reporting errors
pub const BROKEN_BUILD: &str = "echo 'code/game.dm:12:error: undefined var' >&2\necho 'baystation12.dmb - 1 errors, 0 warnings'\n";

pub struct Fixture {
    _tmp: TempDir,
    pub root: PathBuf,
    pub game: PathBuf,
    pub git: PathBuf,
    pub byond: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().to_path_buf();
        let game = root.join("game");
        let git = root.join("git");
        let byond = root.join("byond");

        std::fs::create_dir_all(&git).unwrap();
        std::fs::create_dir_all(&byond).unwrap();
        install_toolchain(&byond);

        Self {
            _tmp: tmp,
            root,
            game,
            git,
            byond,
        }
    }

    pub fn entry(&self, port: u16, auths: &[&str]) -> serde_json::Value {
        json!({
            "game_path": self.game,
            "git_path": self.git,
            "git_branch": "master",
            "byond_path": self.byond,
            "port": port,
            "visibility": "public",
            "start": false,
            "auths": auths,
        })
    }

    pub fn record(&self, name: &str) -> ServerRecord {
        ServerRecord::from_value(name, &self.entry(2506, &["R_ADMIN", "R_SERVER"])).unwrap()
    }

    /// Put a runnable artifact straight into the game tree
    pub fn deploy_artifact(&self, script: &str) {
        std::fs::create_dir_all(&self.game).unwrap();
        std::fs::write(self.game.join("baystation12.dmb"), script).unwrap();
    }

    pub fn write_project(&self, script: &str) {
        std::fs::write(self.git.join("baystation12.dme"), script).unwrap();
    }
}

#[cfg(unix)]
fn install_toolchain(byond: &Path) {
    std::os::unix::fs::symlink("/bin/sh", byond.join(DAEMON_EXECUTABLE)).unwrap();
    std::os::unix::fs::symlink("/bin/sh", byond.join(COMPILER_EXECUTABLE)).unwrap();
}

#[cfg(not(unix))]
fn install_toolchain(byond: &Path) {
    std::fs::write(byond.join(DAEMON_EXECUTABLE), "").unwrap();
    std::fs::write(byond.join(COMPILER_EXECUTABLE), "").unwrap();
}

/// Run git synchronously with a fixed identity
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = std::process::Command::new("git")
        .args([
            "-c",
            "user.name=Test",
            "-c",
            "user.email=test@example.com",
            "-c",
            "commit.gpgsign=false",
            "-c",
            "init.defaultBranch=master",
        ])
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

pub fn commit_file(dir: &Path, name: &str, contents: &str, message: &str) -> String {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, contents).unwrap();
    git(dir, &["add", name]);
    git(dir, &["commit", "-q", "-m", message]);
    git(dir, &["rev-parse", "HEAD"])
}

/// A bare origin, a seed clone used to publish commits, and the working tree
pub struct Remote {
    pub origin: PathBuf,
    pub seed: PathBuf,
}

/// Create an origin with one commit on master and clone it into `work`
pub fn init_remote(root: &Path, work: &Path) -> Remote {
    let origin = root.join("origin.git");
    let seed = root.join("seed");

    std::fs::create_dir_all(&origin).unwrap();
    git(&origin, &["init", "-q", "--bare"]);

    std::fs::create_dir_all(&seed).unwrap();
    git(&seed, &["init", "-q"]);
    git(&seed, &["checkout", "-q", "-b", "master"]);
    commit_file(&seed, "README.md", "station code\n", "Initial commit");
    git(&seed, &["remote", "add", "origin", origin.to_str().unwrap()]);
    git(&seed, &["push", "-q", "origin", "master"]);

    if work.exists() {
        std::fs::remove_dir_all(work).unwrap();
    }
    git(
        root,
        &["clone", "-q", "-b", "master", origin.to_str().unwrap(), work.to_str().unwrap()],
    );

    Remote { origin, seed }
}

/// Poll `check` until it holds or `timeout` elapses
pub async fn eventually<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    check()
}

/// Step executor that records calls and fails on demand
#[derive(Default)]
pub struct RecordingExecutor {
    pub calls: Mutex<Vec<(String, Step)>>,
    pub fail_on: Vec<Step>,
    pub delay: Option<Duration>,
}

impl RecordingExecutor {
    pub fn failing_on(steps: &[Step]) -> Self {
        Self {
            fail_on: steps.to_vec(),
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn steps(&self) -> Vec<Step> {
        self.calls.lock().unwrap().iter().map(|(_, s)| *s).collect()
    }
}

#[async_trait]
impl StepExecutor for RecordingExecutor {
    async fn execute(
        &self,
        step: Step,
        record: &ServerRecord,
        _ctx: &StepContext,
    ) -> Result<(), StepError> {
        self.calls
            .lock()
            .unwrap()
            .push((record.name().to_string(), step));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_on.contains(&step) {
            return Err(StepError::CompileFailed("1 errors, 0 warnings".to_string()));
        }
        Ok(())
    }
}

pub fn arc_record(fixture: &Fixture, name: &str) -> Arc<ServerRecord> {
    Arc::new(fixture.record(name))
}
