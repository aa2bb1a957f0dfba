//! Install step
//!
//! Builds the game directory out of the source tree: fixed directories and
//! files are symlinked, configuration is copied. Existing links make the
//! step fail; a half-finished install has to be cleaned up by hand.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::errors::StepError;
use crate::filesys::dir::Dir;
use crate::models::server::ServerRecord;

/// Directories linked from the source tree into the game tree
pub const LINKED_DIRS: [&str; 9] = [
    "html",
    "ingame_manuals",
    "interface",
    "lib",
    "nano",
    "scripts",
    "sound",
    "tools",
    ".git",
];

/// Runtime libraries linked next to the build artifact
pub const LINKED_LIBRARIES: [&str; 4] = ["btime.dll", "ByondPOST.dll", "libcurl.dll", "libmysql.dll"];

/// Files linked from the source tree into the game tree
pub fn linked_files(project: &str) -> Vec<String> {
    let mut files = vec![format!("{}.dmb", project), format!("{}.rsc", project)];
    files.extend(LINKED_LIBRARIES.iter().map(|f| f.to_string()));
    files
}

/// What an install created
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub links: Vec<PathBuf>,
    pub copied: Vec<PathBuf>,
}

/// Install the compiled game into the server's game directory
pub async fn install(record: &ServerRecord) -> Result<InstallReport, StepError> {
    let artifact = record.compiled_artifact_path();
    if !tokio::fs::try_exists(&artifact).await.unwrap_or(false) {
        return Err(StepError::MissingArtifact(artifact));
    }

    let source = record.git_path();
    let game = Dir::new(record.game_path());
    if !game.exists().await {
        info!(server = %record.name(), path = %game.path().display(), "Creating game directory");
        game.create().await?;
    }

    let mut report = InstallReport::default();

    for dir in LINKED_DIRS {
        let dst = game.path().join(dir);
        link_dir(&source.join(dir), &dst).await?;
        report.links.push(dst);
    }

    for file in linked_files(record.project()) {
        let dst = game.path().join(&file);
        link_file(&source.join(&file), &dst).await?;
        report.links.push(dst);
    }

    let config = game.path().join("config");
    Dir::new(source.join("config").join("example"))
        .copy_to(&config)
        .await?;
    report.copied.push(config.clone());

    let names = config.join("names");
    Dir::new(source.join("config").join("names"))
        .copy_to(&names)
        .await?;
    report.copied.push(names);

    info!(
        server = %record.name(),
        links = report.links.len(),
        "Game directory installed"
    );
    Ok(report)
}

#[cfg(unix)]
async fn link_dir(src: &Path, dst: &Path) -> std::io::Result<()> {
    debug!(src = %src.display(), dst = %dst.display(), "Linking directory");
    tokio::fs::symlink(src, dst).await
}

#[cfg(unix)]
async fn link_file(src: &Path, dst: &Path) -> std::io::Result<()> {
    debug!(src = %src.display(), dst = %dst.display(), "Linking file");
    tokio::fs::symlink(src, dst).await
}

#[cfg(windows)]
async fn link_dir(src: &Path, dst: &Path) -> std::io::Result<()> {
    debug!(src = %src.display(), dst = %dst.display(), "Linking directory");
    tokio::fs::symlink_dir(src, dst).await
}

#[cfg(windows)]
async fn link_file(src: &Path, dst: &Path) -> std::io::Result<()> {
    debug!(src = %src.display(), dst = %dst.display(), "Linking file");
    tokio::fs::symlink_file(src, dst).await
}
