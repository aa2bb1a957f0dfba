//! Changelog generation step

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::deploy::git::{GitAuthor, Repository, ORIGIN};
use crate::errors::StepError;
use crate::filesys::dir::Dir;
use crate::models::server::ServerRecord;

/// Files always present in the changelog directory
pub const BASELINE_FILES: usize = 3;

/// Aggregated changelog index kept under version control
pub const AGGREGATE_FILE: &str = ".all_changelog.yml";

/// Files in the changelog directory that are never removed
pub const PROTECTED_FILES: [&str; 4] = [AGGREGATE_FILE, "changelog.html", "example.yml", "README.txt"];

/// Outcome of the changelog step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangelogOutcome {
    /// Only the baseline files were present
    NothingToPublish { files: usize },

    /// A commit was created and pushed
    Published { commit: String, removed: usize },
}

/// Commit message for a changelog commit
pub fn commit_message(pr_number: Option<u64>) -> String {
    format!("Changelogs for PR #{}", pr_number.unwrap_or(0))
}

fn is_protected(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| PROTECTED_FILES.contains(&n))
        .unwrap_or(false)
}

/// Aggregate changelog fragments, commit the result and push it
pub async fn generate_changelogs(
    record: &ServerRecord,
    interpreter: &str,
    author: &GitAuthor,
    pr_number: Option<u64>,
) -> Result<ChangelogOutcome, StepError> {
    let changelog_dir = Dir::new(record.changelog_dir());
    let files = changelog_dir.list_files().await?;

    if files.len() <= BASELINE_FILES {
        debug!(server = %record.name(), files = files.len(), "No new changelogs");
        return Ok(ChangelogOutcome::NothingToPublish { files: files.len() });
    }

    let rendered = record.git_path().join("html").join("changelog.html");
    run_tool(record, interpreter, &rendered).await?;

    let relative_dir = PathBuf::from("html").join("changelogs");
    let repo = Repository::open(record.git_path());

    let mut staged = Vec::new();
    for path in [PathBuf::from("html").join("changelog.html"), relative_dir.join(AGGREGATE_FILE)] {
        if record.git_path().join(&path).exists() {
            staged.push(path);
        }
    }
    repo.add(&staged).await?;

    let fragments: Vec<PathBuf> = files
        .iter()
        .filter(|f| !is_protected(f))
        .filter_map(|f| f.file_name().map(|name| relative_dir.join(name)))
        .collect();
    repo.remove(&fragments).await?;

    // Fragments that were never tracked survive `git rm`
    for fragment in &fragments {
        let path = record.git_path().join(fragment);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tokio::fs::remove_file(&path).await?;
        }
    }

    let commit = repo.commit(&commit_message(pr_number), author).await?;
    info!(server = %record.name(), %commit, removed = fragments.len(), "Changelogs committed");

    repo.push(ORIGIN, record.git_branch()).await?;
    info!(server = %record.name(), branch = %record.git_branch(), "Changelogs pushed");

    Ok(ChangelogOutcome::Published {
        commit,
        removed: fragments.len(),
    })
}

async fn run_tool(record: &ServerRecord, interpreter: &str, rendered: &Path) -> Result<(), StepError> {
    let tool = record.changelog_tool_path();
    info!(server = %record.name(), tool = %tool.display(), "Running changelog tool");

    let output = Command::new(interpreter)
        .arg(&tool)
        .arg(rendered)
        .arg(record.changelog_dir())
        .current_dir(record.git_path())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| StepError::ToolFailed(format!("failed to run {}: {}", interpreter, e)))?;

    if !output.status.success() {
        return Err(StepError::ToolFailed(format!(
            "changelog tool exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(())
}
