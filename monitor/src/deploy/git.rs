//! Git operations for the deployment pipeline
//!
//! Wraps the `git` command line. Only fast-forward updates are performed;
//! diverged histories are reported instead of merged.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

/// Remote the pipeline pulls from and pushes to
pub const ORIGIN: &str = "origin";

/// Error type for git operations
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("remote '{0}' not found")]
    RemoteNotFound(String),

    #[error("reference '{0}' not found")]
    RefNotFound(String),

    #[error("branch '{0}' has diverged from its remote")]
    Diverged(String),

    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Commit identity used for automated commits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitAuthor {
    pub name: String,
    pub email: String,
}

impl Default for GitAuthor {
    fn default() -> Self {
        Self {
            name: "Server Monitor".to_string(),
            email: "monitor@localhost".to_string(),
        }
    }
}

/// Relationship between a local branch tip and a fetched target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAnalysis {
    /// Nothing to do: equal, or the target is already contained locally
    UpToDate,

    /// Local tip is a strict ancestor of the target, or the branch is unborn
    FastForward,

    /// Histories diverged; a merge commit would be required
    Normal,
}

/// Result of a pull
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    UpToDate,
    FastForwarded { from: Option<String>, to: String },
}

/// A git working tree
#[derive(Debug, Clone)]
pub struct Repository {
    dir: PathBuf,
}

impl Repository {
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("git");
        cmd.arg("-c")
            .arg(format!("safe.directory={}", self.dir.display()))
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run git with `args` and return trimmed stdout
    pub async fn run<I, S>(&self, args: I) -> Result<String, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = self.command();
        cmd.args(args);
        self.output(cmd).await
    }

    async fn output(&self, mut cmd: Command) -> Result<String, GitError> {
        debug!(command = ?cmd, "Running git");
        let output = cmd.output().await?;

        if !output.status.success() {
            return Err(GitError::CommandFailed {
                command: describe(&cmd),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    pub async fn remotes(&self) -> Result<Vec<String>, GitError> {
        let out = self.run(["remote"]).await?;
        Ok(out.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect())
    }

    pub async fn fetch(&self, remote: &str) -> Result<(), GitError> {
        self.run(["fetch", "--quiet", remote]).await?;
        Ok(())
    }

    /// Resolve `reference` to a commit id, `None` if it does not exist
    pub async fn resolve(&self, reference: &str) -> Result<Option<String>, GitError> {
        let mut cmd = self.command();
        cmd.args(["rev-parse", "--verify", "--quiet"])
            .arg(format!("{}^{{commit}}", reference));
        let output = cmd.output().await?;

        if output.status.success() {
            Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
        } else {
            Ok(None)
        }
    }

    /// True if `ancestor` is reachable from `descendant`
    pub async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool, GitError> {
        let mut cmd = self.command();
        cmd.args(["merge-base", "--is-ancestor", ancestor, descendant]);
        let output = cmd.output().await?;

        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(GitError::CommandFailed {
                command: describe(&cmd),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }

    /// Name of the branch HEAD points at, `None` when detached
    pub async fn current_branch(&self) -> Result<Option<String>, GitError> {
        let mut cmd = self.command();
        cmd.args(["symbolic-ref", "--quiet", "--short", "HEAD"]);
        let output = cmd.output().await?;

        if output.status.success() {
            Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
        } else {
            Ok(None)
        }
    }

    /// Classify how `local` relates to `target`
    pub async fn merge_analysis(
        &self,
        local: Option<&str>,
        target: &str,
    ) -> Result<MergeAnalysis, GitError> {
        let Some(local) = local else {
            return Ok(MergeAnalysis::FastForward);
        };

        if local == target || self.is_ancestor(target, local).await? {
            Ok(MergeAnalysis::UpToDate)
        } else if self.is_ancestor(local, target).await? {
            Ok(MergeAnalysis::FastForward)
        } else {
            Ok(MergeAnalysis::Normal)
        }
    }

    /// Stage paths relative to the working tree
    pub async fn add(&self, paths: &[PathBuf]) -> Result<(), GitError> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut cmd = self.command();
        cmd.args(["add", "--"]).args(paths);
        self.output(cmd).await?;
        Ok(())
    }

    /// Remove paths from the index and the working tree
    pub async fn remove(&self, paths: &[PathBuf]) -> Result<(), GitError> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut cmd = self.command();
        cmd.args(["rm", "--quiet", "--force", "--ignore-unmatch", "--"])
            .args(paths);
        self.output(cmd).await?;
        Ok(())
    }

    /// Commit the index and return the new commit id
    pub async fn commit(&self, message: &str, author: &GitAuthor) -> Result<String, GitError> {
        let mut cmd = self.command();
        cmd.arg("-c")
            .arg(format!("user.name={}", author.name))
            .arg("-c")
            .arg(format!("user.email={}", author.email))
            .args(["-c", "commit.gpgsign=false", "commit", "--quiet", "-m", message]);
        self.output(cmd).await?;

        self.resolve("HEAD")
            .await?
            .ok_or_else(|| GitError::RefNotFound("HEAD".to_string()))
    }

    /// Push `branch` to the same branch on `remote`
    pub async fn push(&self, remote: &str, branch: &str) -> Result<(), GitError> {
        let refspec = format!("refs/heads/{0}:refs/heads/{0}", branch);
        self.run(["push", "--quiet", remote, refspec.as_str()]).await?;
        Ok(())
    }

    /// Fetch `origin` and fast-forward `branch` to its remote tracking ref.
    ///
    /// Moves the working tree, the branch ref and HEAD together. Diverged
    /// histories are left untouched and reported as [`GitError::Diverged`].
    pub async fn pull(&self, branch: &str) -> Result<PullOutcome, GitError> {
        if !self.remotes().await?.iter().any(|r| r == ORIGIN) {
            return Err(GitError::RemoteNotFound(ORIGIN.to_string()));
        }

        self.fetch(ORIGIN).await?;

        let remote_ref = format!("refs/remotes/{}/{}", ORIGIN, branch);
        let target = self
            .resolve(&remote_ref)
            .await?
            .ok_or(GitError::RefNotFound(remote_ref))?;
        let local = self.resolve(&format!("refs/heads/{}", branch)).await?;

        match self.merge_analysis(local.as_deref(), &target).await? {
            MergeAnalysis::UpToDate => {
                info!(branch, "Already up to date");
                Ok(PullOutcome::UpToDate)
            }
            MergeAnalysis::FastForward => {
                let on_branch = self.current_branch().await?.as_deref() == Some(branch);
                if on_branch && local.is_some() {
                    self.run(["merge", "--ff-only", "--quiet", target.as_str()])
                        .await?;
                } else {
                    self.run(["checkout", "--quiet", "-B", branch, target.as_str()])
                        .await?;
                }
                info!(branch, from = ?local, to = %target, "Fast-forwarded");
                Ok(PullOutcome::FastForwarded { from: local, to: target })
            }
            MergeAnalysis::Normal => Err(GitError::Diverged(branch.to_string())),
        }
    }
}

fn describe(cmd: &Command) -> String {
    cmd.as_std()
        .get_args()
        .map(|a| a.to_string_lossy())
        .filter(|a| !a.starts_with("safe.directory=") && a != "-c")
        .collect::<Vec<_>>()
        .join(" ")
}
