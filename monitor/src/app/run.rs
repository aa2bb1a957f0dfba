//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::api::transport;
use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::errors::MonitorError;
use crate::models::server::ServerRecord;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::workers::scheduler;

/// Run the server monitor
pub async fn run(
    monitor_version: String,
    options: AppOptions,
    records: Vec<ServerRecord>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), MonitorError> {
    info!("Initializing server monitor v{}...", monitor_version);

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    let app_state = Arc::new(AppState::init(records, &options));
    shutdown_manager.with_app_state(app_state.clone())?;

    if let Err(e) = init(&options, app_state.clone(), shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start server monitor: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    if options.start_servers_on_boot {
        app_state.orchestrator.start_boot_servers();
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    // Shutdown
    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), MonitorError> {
    init_api_server(
        options.api.clone(),
        app_state.clone(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )
    .await?;

    if options.enable_status_server {
        init_status_server(
            options,
            app_state.clone(),
            shutdown_manager,
            shutdown_tx.subscribe(),
        )
        .await?;
    }

    init_scheduler_worker(
        options.scheduler.clone(),
        app_state,
        shutdown_manager,
        shutdown_tx.subscribe(),
    )
    .await
}

async fn init_api_server(
    options: transport::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), MonitorError> {
    info!("Initializing command API...");

    let listener = transport::bind(&options).await?;
    let api_handle = transport::serve(listener, options, app_state.router.clone(), async move {
        let _ = shutdown_rx.recv().await;
    });

    shutdown_manager.with_api_server_handle(api_handle)
}

async fn init_status_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), MonitorError> {
    info!("Initializing local HTTP status server...");

    let server_state = ServerState::new(app_state.orchestrator.clone());
    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_status_server_handle(server_handle)
}

async fn init_scheduler_worker(
    options: scheduler::Options,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), MonitorError> {
    info!("Initializing scheduler worker...");

    let orchestrator = app_state.orchestrator.clone();

    let scheduler_handle = tokio::spawn(async move {
        scheduler::run(
            &options,
            orchestrator.as_ref(),
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_scheduler_worker_handle(scheduler_handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    api_server_handle: Option<JoinHandle<Result<(), MonitorError>>>,
    status_server_handle: Option<JoinHandle<Result<(), MonitorError>>>,
    scheduler_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            api_server_handle: None,
            status_server_handle: None,
            scheduler_worker_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), MonitorError> {
        if self.app_state.is_some() {
            return Err(MonitorError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_api_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), MonitorError>>,
    ) -> Result<(), MonitorError> {
        if self.api_server_handle.is_some() {
            return Err(MonitorError::ShutdownError("api_server_handle already set".to_string()));
        }
        self.api_server_handle = Some(handle);
        Ok(())
    }

    pub fn with_status_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), MonitorError>>,
    ) -> Result<(), MonitorError> {
        if self.status_server_handle.is_some() {
            return Err(MonitorError::ShutdownError("status_server_handle already set".to_string()));
        }
        self.status_server_handle = Some(handle);
        Ok(())
    }

    pub fn with_scheduler_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), MonitorError> {
        if self.scheduler_worker_handle.is_some() {
            return Err(MonitorError::ShutdownError("scheduler_handle already set".to_string()));
        }
        self.scheduler_worker_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), MonitorError> {
        let _ = self.shutdown_tx.send(());

        let max_delay = self.lifecycle_options.max_shutdown_delay;
        match tokio::time::timeout(max_delay, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => {
                error!("Shutdown timed out after {:?}", max_delay);
                Err(MonitorError::ShutdownError(format!(
                    "shutdown timed out after {:?}",
                    max_delay
                )))
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), MonitorError> {
        info!("Shutting down server monitor...");

        // 1. Scheduler worker
        if let Some(handle) = self.scheduler_worker_handle.take() {
            handle.await.map_err(|e| MonitorError::ShutdownError(e.to_string()))?;
        }

        // 2. Command API
        if let Some(handle) = self.api_server_handle.take() {
            handle.await.map_err(|e| MonitorError::ShutdownError(e.to_string()))??;
        }

        // 3. Status server
        if let Some(handle) = self.status_server_handle.take() {
            handle.await.map_err(|e| MonitorError::ShutdownError(e.to_string()))??;
        }

        // 4. Supervised servers
        if let Some(app_state) = self.app_state.take() {
            app_state.shutdown().await;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
