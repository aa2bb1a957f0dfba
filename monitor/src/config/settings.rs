//! Settings file management

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::api::transport::{self, AllowList};
use crate::deploy::executor::DeployerOptions;
use crate::deploy::git::GitAuthor;
use crate::deploy::step::StepOrder;
use crate::filesys::file::File;
use crate::logs::{LogLevel, LogOptions};
use crate::models::server::ServerRecord;
use crate::orchestrator;
use crate::workers::scheduler;

/// Default settings file name
pub const DEFAULT_SETTINGS_FILE: &str = "monitor.json";

/// Fatal configuration problems
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unable to open configuration file {}", .0.display())]
    NotFound(PathBuf),

    #[error("unable to read configuration file: {0}")]
    Unreadable(String),

    #[error("API host is empty")]
    EmptyApiHost,

    #[error("{0}")]
    InvalidAllowList(String),
}

/// Monitor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_level: LogLevel,

    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,

    /// Emit JSON on stdout
    #[serde(default)]
    pub log_json: bool,

    #[serde(default, alias = "API")]
    pub api: ApiSettings,

    #[serde(default)]
    pub status_server: StatusServerSettings,

    /// Seconds between scheduling passes
    #[serde(default = "default_interval")]
    pub scheduler_interval_secs: u64,

    /// Seconds between a daemon exit and its respawn
    #[serde(default = "default_interval")]
    pub restart_cooldown_secs: u64,

    /// Seconds a daemon gets to exit after SIGTERM before it is killed
    #[serde(default = "default_terminate_grace")]
    pub terminate_grace_secs: u64,

    #[serde(default)]
    pub step_timeout_secs: Option<u64>,

    #[serde(default)]
    pub step_order: StepOrder,

    #[serde(default = "default_changelog_interpreter")]
    pub changelog_interpreter: String,

    #[serde(default)]
    pub git_author_name: Option<String>,

    #[serde(default)]
    pub git_author_email: Option<String>,

    /// Raw server entries, validated one by one
    #[serde(default)]
    pub servers: BTreeMap<String, serde_json::Value>,
}

fn default_log_file() -> PathBuf {
    PathBuf::from("monitor.log")
}

fn default_interval() -> u64 {
    30
}

fn default_terminate_grace() -> u64 {
    10
}

fn default_changelog_interpreter() -> String {
    "python".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_file: default_log_file(),
            log_json: false,
            api: ApiSettings::default(),
            status_server: StatusServerSettings::default(),
            scheduler_interval_secs: default_interval(),
            restart_cooldown_secs: default_interval(),
            terminate_grace_secs: default_terminate_grace(),
            step_timeout_secs: None,
            step_order: StepOrder::Fifo,
            changelog_interpreter: default_changelog_interpreter(),
            git_author_name: None,
            git_author_email: None,
            servers: BTreeMap::new(),
        }
    }
}

/// Command API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_localhost")]
    pub host: String,

    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Plain addresses or CIDR ranges
    #[serde(default = "default_allowed_hosts")]
    pub allowed_hosts: Vec<String>,

    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,

    /// Required tokens per command name, replacing the defaults
    #[serde(default)]
    pub command_auths: HashMap<String, Vec<String>>,
}

fn default_localhost() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    1337
}

fn default_allowed_hosts() -> Vec<String> {
    vec!["127.0.0.1".to_string()]
}

fn default_max_request_bytes() -> usize {
    64 * 1024
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            host: default_localhost(),
            port: default_api_port(),
            allowed_hosts: default_allowed_hosts(),
            max_request_bytes: default_max_request_bytes(),
            command_auths: HashMap::new(),
        }
    }
}

/// Local HTTP status server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusServerSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_localhost")]
    pub host: String,

    #[serde(default = "default_status_port")]
    pub port: u16,
}

fn default_status_port() -> u16 {
    8080
}

impl Default for StatusServerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_localhost(),
            port: default_status_port(),
        }
    }
}

impl Settings {
    /// Read and validate a settings file
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = File::new(path);
        if !file.exists().await {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let settings = file
            .read_json::<Settings>()
            .await
            .map_err(|e| ConfigError::Unreadable(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.host.trim().is_empty() {
            return Err(ConfigError::EmptyApiHost);
        }
        self.allow_list()?;
        Ok(())
    }

    pub fn allow_list(&self) -> Result<AllowList, ConfigError> {
        AllowList::parse(&self.api.allowed_hosts).map_err(ConfigError::InvalidAllowList)
    }

    /// Validate each server entry, skipping the ones that fail
    pub fn server_records(&self) -> Vec<ServerRecord> {
        let mut records = Vec::with_capacity(self.servers.len());
        for (name, value) in &self.servers {
            match ServerRecord::from_value(name, value) {
                Ok(record) => records.push(record),
                Err(e) => error!("Error adding a server to the pool: {}", e),
            }
        }
        records
    }

    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            log_level: self.log_level.clone(),
            log_file: Some(self.log_file.clone()),
            json_format: self.log_json,
            ..Default::default()
        }
    }

    pub fn api_options(&self) -> Result<transport::Options, ConfigError> {
        Ok(transport::Options {
            host: self.api.host.clone(),
            port: self.api.port,
            allowed_hosts: self.allow_list()?,
            max_request_bytes: self.api.max_request_bytes,
            ..Default::default()
        })
    }

    pub fn orchestrator_options(&self) -> orchestrator::Options {
        orchestrator::Options {
            restart_cooldown: Duration::from_secs(self.restart_cooldown_secs),
            terminate_grace: Duration::from_secs(self.terminate_grace_secs),
            step_timeout: self.step_timeout_secs.map(Duration::from_secs),
            step_order: self.step_order,
        }
    }

    pub fn scheduler_options(&self) -> scheduler::Options {
        scheduler::Options {
            interval: Duration::from_secs(self.scheduler_interval_secs),
        }
    }

    pub fn deployer_options(&self) -> DeployerOptions {
        let defaults = GitAuthor::default();
        DeployerOptions {
            changelog_interpreter: self.changelog_interpreter.clone(),
            git_author: GitAuthor {
                name: self.git_author_name.clone().unwrap_or(defaults.name),
                email: self.git_author_email.clone().unwrap_or(defaults.email),
            },
        }
    }
}
