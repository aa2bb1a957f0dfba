//! Step executor

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::deploy::changelog::{self, ChangelogOutcome};
use crate::deploy::git::{GitAuthor, GitError, PullOutcome, Repository};
use crate::deploy::step::Step;
use crate::deploy::{compile, install};
use crate::errors::StepError;
use crate::models::server::ServerRecord;

/// Per-run information handed to each step
#[derive(Debug, Clone)]
pub struct StepContext {
    pub pipeline_id: Uuid,
    pub pr_number: Option<u64>,
}

/// Executes deployment steps against a server record
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(
        &self,
        step: Step,
        record: &ServerRecord,
        ctx: &StepContext,
    ) -> Result<(), StepError>;
}

/// Deployer options
#[derive(Debug, Clone)]
pub struct DeployerOptions {
    /// Interpreter used to run the changelog tool
    pub changelog_interpreter: String,

    /// Identity for changelog commits
    pub git_author: GitAuthor,
}

impl Default for DeployerOptions {
    fn default() -> Self {
        Self {
            changelog_interpreter: "python".to_string(),
            git_author: GitAuthor::default(),
        }
    }
}

/// Executes steps with git, the game compiler and the filesystem
#[derive(Debug, Clone, Default)]
pub struct Deployer {
    options: DeployerOptions,
}

impl Deployer {
    pub fn new(options: DeployerOptions) -> Self {
        Self { options }
    }

    pub async fn pull(&self, record: &ServerRecord) -> Result<PullOutcome, StepError> {
        let repo = Repository::open(record.git_path());
        match repo.pull(record.git_branch()).await {
            Ok(outcome) => Ok(outcome),
            Err(GitError::Diverged(branch)) => Err(StepError::MergeConflict { branch }),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn generate_changelogs(
        &self,
        record: &ServerRecord,
        pr_number: Option<u64>,
    ) -> Result<ChangelogOutcome, StepError> {
        changelog::generate_changelogs(
            record,
            &self.options.changelog_interpreter,
            &self.options.git_author,
            pr_number,
        )
        .await
    }
}

#[async_trait]
impl StepExecutor for Deployer {
    async fn execute(
        &self,
        step: Step,
        record: &ServerRecord,
        ctx: &StepContext,
    ) -> Result<(), StepError> {
        match step {
            Step::Pull => {
                let outcome = self.pull(record).await?;
                debug!(server = %record.name(), ?outcome, "Pull finished");
            }
            Step::Compile => compile::compile(record).await?,
            Step::Install => {
                install::install(record).await?;
            }
            Step::GenerateChangelogs => {
                let outcome = self.generate_changelogs(record, ctx.pr_number).await?;
                debug!(server = %record.name(), ?outcome, "Changelog step finished");
            }
        }
        Ok(())
    }
}
