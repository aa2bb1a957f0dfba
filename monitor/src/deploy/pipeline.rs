//! Deployment pipeline

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::deploy::executor::{StepContext, StepExecutor};
use crate::deploy::step::{Step, StepOrder, StepOutcome, StepStatus};
use crate::errors::StepError;
use crate::models::server::{PipelineGuard, ServerRecord};

/// An ordered queue of deployment steps for one server
#[derive(Debug)]
pub struct DeploymentPipeline {
    id: Uuid,
    record: Arc<ServerRecord>,
    steps: VecDeque<Step>,
    order: StepOrder,
    continue_on_error: bool,
    pr_number: Option<u64>,
    created_at: DateTime<Utc>,
}

/// Summary of a finished pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub id: Uuid,
    pub server: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<StepOutcome>,
}

impl PipelineReport {
    /// True if every step ran and succeeded
    pub fn succeeded(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| o.status == StepStatus::Succeeded)
    }

    /// Steps in the order they were executed, skipped steps excluded
    pub fn executed_steps(&self) -> Vec<Step> {
        self.outcomes
            .iter()
            .filter(|o| o.status != StepStatus::Skipped)
            .map(|o| o.step)
            .collect()
    }

    pub fn status_of(&self, step: Step) -> Option<&StepStatus> {
        self.outcomes.iter().find(|o| o.step == step).map(|o| &o.status)
    }
}

impl DeploymentPipeline {
    /// Create a pipeline running `steps` in listed order
    pub fn new(record: Arc<ServerRecord>, steps: Vec<Step>) -> Self {
        Self {
            id: Uuid::new_v4(),
            record,
            steps: steps.into(),
            order: StepOrder::default(),
            continue_on_error: false,
            pr_number: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_order(mut self, order: StepOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    pub fn with_pr_number(mut self, pr_number: Option<u64>) -> Self {
        self.pr_number = pr_number;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn record(&self) -> &Arc<ServerRecord> {
        &self.record
    }

    pub fn steps(&self) -> &VecDeque<Step> {
        &self.steps
    }

    pub fn order(&self) -> StepOrder {
        self.order
    }

    pub fn continue_on_error(&self) -> bool {
        self.continue_on_error
    }

    pub fn pr_number(&self) -> Option<u64> {
        self.pr_number
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Claim the target record's pipeline slot for this pipeline
    pub fn try_attach(&self) -> Option<PipelineGuard> {
        self.record.try_attach_pipeline(self.id)
    }

    fn next_step(&mut self) -> Option<Step> {
        match self.order {
            StepOrder::Fifo => self.steps.pop_front(),
            StepOrder::Lifo => self.steps.pop_back(),
        }
    }

    /// Run on a new task; the slot is released when the task ends
    pub fn spawn(
        self,
        guard: PipelineGuard,
        executor: Arc<dyn StepExecutor>,
        step_timeout: Option<Duration>,
    ) -> JoinHandle<PipelineReport> {
        tokio::spawn(self.run(guard, executor, step_timeout))
    }

    /// Execute every step, applying the continue-on-error policy
    pub async fn run(
        mut self,
        guard: PipelineGuard,
        executor: Arc<dyn StepExecutor>,
        step_timeout: Option<Duration>,
    ) -> PipelineReport {
        let started_at = Utc::now();
        let server = self.record.name().to_string();
        let ctx = StepContext {
            pipeline_id: self.id,
            pr_number: self.pr_number,
        };

        info!(
            server = %server,
            pipeline = %self.id,
            steps = self.steps.len(),
            "Pipeline started"
        );

        let mut outcomes = Vec::with_capacity(self.steps.len());
        let mut abandoned = false;

        while let Some(step) = self.next_step() {
            if abandoned {
                outcomes.push(StepOutcome {
                    step,
                    status: StepStatus::Skipped,
                });
                continue;
            }

            info!(server = %server, pipeline = %self.id, %step, "{}", step.description());

            let result = match step_timeout {
                Some(limit) => tokio::time::timeout(limit, executor.execute(step, &self.record, &ctx))
                    .await
                    .unwrap_or(Err(StepError::TimedOut(limit))),
                None => executor.execute(step, &self.record, &ctx).await,
            };

            let status = match result {
                Ok(()) => StepStatus::Succeeded,
                Err(e) => {
                    error!(
                        server = %server,
                        pipeline = %self.id,
                        %step,
                        "{} failed: {}", step.description(), e
                    );
                    if !self.continue_on_error {
                        abandoned = true;
                    }
                    StepStatus::Failed(e.to_string())
                }
            };

            outcomes.push(StepOutcome { step, status });
        }

        if abandoned {
            warn!(server = %server, pipeline = %self.id, "Pipeline abandoned after failure");
        }

        let report = PipelineReport {
            id: self.id,
            server,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };

        info!(
            server = %report.server,
            pipeline = %report.id,
            succeeded = report.succeeded(),
            "Pipeline finished"
        );

        drop(guard);
        report
    }
}
