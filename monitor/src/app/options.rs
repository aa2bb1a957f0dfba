//! Application configuration options

use std::collections::HashMap;
use std::time::Duration;

use crate::api::transport;
use crate::deploy::executor::DeployerOptions;
use crate::orchestrator;
use crate::workers::scheduler;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Command API listener
    pub api: transport::Options,

    /// Required tokens per command, replacing the routing defaults
    pub command_auths: HashMap<String, Vec<String>>,

    /// Enable the local HTTP status server
    pub enable_status_server: bool,

    /// HTTP status server configuration
    pub server: ServerOptions,

    /// Scheduler worker options
    pub scheduler: scheduler::Options,

    /// Supervision and pipeline options
    pub orchestrator: orchestrator::Options,

    /// Deployment step options
    pub deployer: DeployerOptions,

    /// Start servers flagged to start on boot
    pub start_servers_on_boot: bool,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            api: transport::Options::default(),
            command_auths: HashMap::new(),
            enable_status_server: false,
            server: ServerOptions::default(),
            scheduler: scheduler::Options::default(),
            orchestrator: orchestrator::Options::default(),
            deployer: DeployerOptions::default(),
            start_servers_on_boot: true,
        }
    }
}

/// Lifecycle options for the monitor
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}
