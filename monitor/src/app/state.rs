//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::api::router::CommandRouter;
use crate::app::options::AppOptions;
use crate::deploy::executor::{Deployer, StepExecutor};
use crate::models::server::ServerRecord;
use crate::orchestrator::Orchestrator;

/// Main application state
pub struct AppState {
    /// Server records, supervisors and the pipeline queue
    pub orchestrator: Arc<Orchestrator>,

    /// Command router backed by the orchestrator
    pub router: Arc<CommandRouter>,
}

impl AppState {
    /// Build the state with the default step executor
    pub fn init(records: Vec<ServerRecord>, options: &AppOptions) -> Self {
        let executor: Arc<dyn StepExecutor> = Arc::new(Deployer::new(options.deployer.clone()));
        Self::with_executor(records, executor, options)
    }

    pub fn with_executor(
        records: Vec<ServerRecord>,
        executor: Arc<dyn StepExecutor>,
        options: &AppOptions,
    ) -> Self {
        let orchestrator = Arc::new(Orchestrator::new(
            records,
            executor,
            options.orchestrator.clone(),
        ));
        let router = Arc::new(
            CommandRouter::new(orchestrator.clone()).with_overrides(&options.command_auths),
        );

        info!(servers = orchestrator.servers().len(), "Application state initialized");
        Self { orchestrator, router }
    }

    /// Stop every supervised server
    pub async fn shutdown(&self) {
        self.orchestrator.shutdown().await;
    }
}
