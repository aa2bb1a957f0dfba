//! Orchestrator
//!
//! Owns the server records and the queue of pending pipelines, and exposes
//! the control operations used by the command handler.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::commands::{Command, Control, CreateTaskArgs, Response, ServerControlArgs};
use crate::api::router::CommandHandler;
use crate::deploy::executor::StepExecutor;
use crate::deploy::pipeline::{DeploymentPipeline, PipelineReport};
use crate::deploy::step::StepOrder;
use crate::errors::SupervisorError;
use crate::models::server::{ServerRecord, ServerStatus};
use crate::supervisor::fsm::SupervisorState;
use crate::supervisor::process::{ProcessSupervisor, DEFAULT_RESTART_COOLDOWN, DEFAULT_TERMINATE_GRACE};

/// Orchestrator options
#[derive(Debug, Clone)]
pub struct Options {
    /// Delay between a daemon exit and its respawn
    pub restart_cooldown: Duration,

    /// Time a daemon gets to exit after SIGTERM before it is killed
    pub terminate_grace: Duration,

    /// Limit on a single deployment step
    pub step_timeout: Option<Duration>,

    pub step_order: StepOrder,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            restart_cooldown: DEFAULT_RESTART_COOLDOWN,
            terminate_grace: DEFAULT_TERMINATE_GRACE,
            step_timeout: None,
            step_order: StepOrder::Fifo,
        }
    }
}

/// Result of a control operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    Started,
    AlreadyRunning,
    /// A supervisor is attached but no daemon has come up yet
    StartPending,
    NotReady,
    Restarting,
    StopInitiated,
    AlreadyStopping,
    NotRunning,
}

impl ControlOutcome {
    /// Response sent for `control`
    pub fn response(&self, control: Control) -> Response {
        match (self, control) {
            (ControlOutcome::Started, _) => {
                Response::ok("Server start event received. It should be up in 3 minutes.")
            }
            (ControlOutcome::AlreadyRunning, _) => Response::err("Server is already running."),
            (ControlOutcome::StartPending, _) => Response::err(
                "Server is starting but the daemon is not up yet. It will keep retrying.",
            ),
            (ControlOutcome::NotReady, _) => Response::err("Server is not compiled."),
            (ControlOutcome::Restarting, _) => Response::ok(
                "Server restart event received. It should close and start back up within 6 minutes.",
            ),
            (ControlOutcome::StopInitiated, _) => {
                Response::ok("Server shut down initiated. It should close within 3 minutes.")
            }
            (ControlOutcome::AlreadyStopping, _) => {
                Response::ok("Server is already shutting down. Please wait.")
            }
            (ControlOutcome::NotRunning, Control::Restart) => {
                Response::err("Server is not running. Restart impossible.")
            }
            (ControlOutcome::NotRunning, _) => {
                Response::err("Server is not running. Shut down impossible.")
            }
        }
    }
}

pub struct Orchestrator {
    servers: Vec<Arc<ServerRecord>>,
    pending: Mutex<Vec<DeploymentPipeline>>,
    executor: Arc<dyn StepExecutor>,
    options: Options,
}

impl Orchestrator {
    pub fn new(servers: Vec<ServerRecord>, executor: Arc<dyn StepExecutor>, options: Options) -> Self {
        Self {
            servers: servers.into_iter().map(Arc::new).collect(),
            pending: Mutex::new(Vec::new()),
            executor,
            options,
        }
    }

    pub fn servers(&self) -> &[Arc<ServerRecord>] {
        &self.servers
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Look up a record by name
    pub fn find(&self, name: &str) -> Option<&Arc<ServerRecord>> {
        self.servers.iter().find(|r| r.name() == name)
    }

    fn pending(&self) -> MutexGuard<'_, Vec<DeploymentPipeline>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ================================= SCHEDULING =================================== //

    /// Queue a pipeline for the next scheduling pass
    pub fn enqueue(&self, pipeline: DeploymentPipeline) -> Uuid {
        let id = pipeline.id();
        info!(
            server = %pipeline.record().name(),
            pipeline = %id,
            steps = ?pipeline.steps(),
            "Pipeline queued"
        );
        self.pending().push(pipeline);
        id
    }

    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    /// Number of queued pipelines targeting `record`
    pub fn queued_for(&self, record: &Arc<ServerRecord>) -> usize {
        self.pending()
            .iter()
            .filter(|p| Arc::ptr_eq(p.record(), record))
            .count()
    }

    /// Start every queued pipeline whose target has a free pipeline slot.
    ///
    /// Pipelines are considered in queue order; the rest stay queued.
    pub fn schedule(&self) -> Vec<JoinHandle<PipelineReport>> {
        let mut pending = self.pending();
        if pending.is_empty() {
            return Vec::new();
        }

        let mut started = Vec::new();
        let mut waiting = Vec::with_capacity(pending.len());

        for pipeline in pending.drain(..) {
            match pipeline.try_attach() {
                Some(guard) => {
                    debug!(server = %pipeline.record().name(), pipeline = %pipeline.id(), "Starting pipeline");
                    started.push(pipeline.spawn(
                        guard,
                        self.executor.clone(),
                        self.options.step_timeout,
                    ));
                }
                None => waiting.push(pipeline),
            }
        }

        *pending = waiting;
        started
    }

    // ================================== CONTROL ===================================== //

    /// Start supervising the record's daemon
    pub fn start_server(&self, record: &Arc<ServerRecord>) -> Result<ControlOutcome, SupervisorError> {
        if let Some(existing) = record.supervisor() {
            return Ok(match existing.state() {
                SupervisorState::Stopping | SupervisorState::Stopped => ControlOutcome::AlreadyStopping,
                SupervisorState::Idle => ControlOutcome::StartPending,
                SupervisorState::Running => ControlOutcome::AlreadyRunning,
            });
        }

        if !record.can_run() {
            return Ok(ControlOutcome::NotReady);
        }

        let cooldown = self.options.restart_cooldown;
        let grace = self.options.terminate_grace;
        let supervisor = match record.attach_supervisor(|| {
            Arc::new(ProcessSupervisor::for_record(record, cooldown).with_terminate_grace(grace))
        }) {
            Ok(supervisor) => supervisor,
            Err(_) => return Ok(ControlOutcome::AlreadyRunning),
        };

        if let Err(e) = supervisor.start() {
            record.detach_supervisor(&supervisor);
            return Err(e);
        }

        info!(server = %record.name(), "Server started");
        Ok(ControlOutcome::Started)
    }

    /// Stop the record's daemon and wait for its supervisor to exit
    pub async fn stop_server(&self, record: &Arc<ServerRecord>) -> Result<ControlOutcome, SupervisorError> {
        let Some(supervisor) = record.supervisor() else {
            return Ok(ControlOutcome::NotRunning);
        };

        match supervisor.request_stop().await {
            Ok(()) => {
                record.detach_supervisor(&supervisor);
                info!(server = %record.name(), "Server stopped");
                Ok(ControlOutcome::StopInitiated)
            }
            Err(SupervisorError::AlreadyStopping) => Ok(ControlOutcome::AlreadyStopping),
            Err(SupervisorError::AlreadyStopped) => {
                record.detach_supervisor(&supervisor);
                Ok(ControlOutcome::NotRunning)
            }
            Err(e) => {
                record.detach_supervisor(&supervisor);
                Err(e)
            }
        }
    }

    /// Terminate the record's daemon; its supervisor respawns it
    pub fn restart_server(&self, record: &Arc<ServerRecord>) -> Result<ControlOutcome, SupervisorError> {
        let Some(supervisor) = record.supervisor() else {
            return Ok(ControlOutcome::NotRunning);
        };

        match supervisor.force_restart() {
            Ok(()) => Ok(ControlOutcome::Restarting),
            Err(SupervisorError::AlreadyStopping) | Err(SupervisorError::AlreadyStopped) => {
                Ok(ControlOutcome::AlreadyStopping)
            }
            Err(e) => Err(e),
        }
    }

    /// Start every record flagged to start on boot
    pub fn start_boot_servers(&self) {
        for record in self.servers.iter().filter(|r| r.start_on_boot()) {
            match self.start_server(record) {
                Ok(ControlOutcome::Started) => {}
                Ok(outcome) => warn!(server = %record.name(), ?outcome, "Server not started on boot"),
                Err(e) => error!(server = %record.name(), "Failed to start server on boot: {}", e),
            }
        }
    }

    // =================================== STATUS ===================================== //

    pub fn status_of(&self, record: &Arc<ServerRecord>) -> ServerStatus {
        ServerStatus {
            running: record.supervisor().map(|s| s.is_running()).unwrap_or(false),
            can_run: record.can_run(),
            can_compile: record.can_compile(),
            task_active: record.has_pipeline(),
            queued: self.queued_for(record),
        }
    }

    /// Status of every record keyed by name
    pub fn status(&self) -> BTreeMap<String, ServerStatus> {
        self.servers
            .iter()
            .map(|r| (r.name().to_string(), self.status_of(r)))
            .collect()
    }

    // ================================== SHUTDOWN ==================================== //

    /// Stop every supervisor and drop queued pipelines
    pub async fn shutdown(&self) {
        let dropped = std::mem::take(&mut *self.pending());
        if !dropped.is_empty() {
            warn!(count = dropped.len(), "Discarding queued pipelines");
        }

        let stops = self
            .servers
            .iter()
            .filter(|r| r.supervisor().is_some())
            .map(|record| async move {
                if let Err(e) = self.stop_server(record).await {
                    error!(server = %record.name(), "Failed to stop server: {}", e);
                }
            });
        futures::future::join_all(stops).await;
    }

    // ================================== COMMANDS ==================================== //

    async fn control(&self, args: ServerControlArgs, auths: &[String]) -> Response {
        let Some(record) = self.find(&args.server) else {
            return Response::err("Invalid server name.");
        };

        if !record.is_authorized(auths) {
            return Response::err("Not authorized to control this specific server.");
        }

        let result = match args.control {
            Control::Start => self.start_server(record),
            Control::Restart => self.restart_server(record),
            Control::Stop => self.stop_server(record).await,
        };

        match result {
            Ok(outcome) => outcome.response(args.control),
            Err(e) => {
                error!(server = %record.name(), control = ?args.control, "Server control failed: {}", e);
                Response::err("Error caught while processing command.")
            }
        }
    }

    fn create_task(&self, args: CreateTaskArgs) -> Response {
        let Some(record) = self.find(&args.server) else {
            return Response::err("Invalid server name.");
        };

        if args.commands.is_empty() {
            return Response::err("Empty command list sent.");
        }

        let pipeline = DeploymentPipeline::new(record.clone(), args.commands)
            .with_order(self.options.step_order)
            .with_continue_on_error(args.continue_on_error)
            .with_pr_number(args.pr_num);
        self.enqueue(pipeline);

        Response::ok("Command successfully queued.")
    }

    fn get_servers(&self) -> Response {
        match serde_json::to_value(self.status()) {
            Ok(data) => Response::data(data),
            Err(e) => {
                error!("Failed to encode server status: {}", e);
                Response::err("Error caught while processing command.")
            }
        }
    }
}

#[async_trait]
impl CommandHandler for Orchestrator {
    async fn handle(&self, command: Command, auths: &[String]) -> Response {
        match command {
            Command::ServerControl(args) => self.control(args, auths).await,
            Command::GetServers => self.get_servers(),
            Command::CreateTask(args) => self.create_task(args),
        }
    }
}
