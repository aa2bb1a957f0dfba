//! Command routing and authorization

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::api::commands::{Command, CommandKind, Request, Response};
use crate::errors::DispatchError;

/// Administrator role token
pub const R_ADMIN: &str = "R_ADMIN";

/// Developer role token
pub const R_DEV: &str = "R_DEV";

/// Executes authorized commands
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, command: Command, auths: &[String]) -> Response;
}

/// Routing table entry
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub kind: CommandKind,

    /// Tokens allowed to run the command; empty means public
    pub auths: HashSet<String>,

    /// Command places work on the scheduling queue
    pub needs_queue: bool,

    pub args: &'static [&'static str],
}

impl CommandSpec {
    fn new(kind: CommandKind, auths: &[&str], needs_queue: bool) -> Self {
        Self {
            kind,
            auths: auths.iter().map(|a| a.to_string()).collect(),
            needs_queue,
            args: kind.declared_args(),
        }
    }

    /// True if the caller may run this command
    pub fn permits<S: AsRef<str>>(&self, tokens: &[S]) -> bool {
        self.auths.is_empty() || tokens.iter().any(|t| self.auths.contains(t.as_ref()))
    }

    /// Declared argument check.
    ///
    /// Always passes; argument shape is enforced when the typed arguments
    /// are decoded.
    pub fn accepts_args(&self, _args: &serde_json::Value) -> bool {
        true
    }
}

/// Default routing table
pub fn default_table() -> HashMap<String, CommandSpec> {
    [
        CommandSpec::new(CommandKind::ServerControl, &[], false),
        CommandSpec::new(CommandKind::GetServers, &[R_ADMIN, R_DEV], false),
        CommandSpec::new(CommandKind::CreateTask, &[], true),
    ]
    .into_iter()
    .map(|spec| (spec.kind.name().to_string(), spec))
    .collect()
}

/// Authorizes requests and hands them to a handler
pub struct CommandRouter {
    table: HashMap<String, CommandSpec>,
    handler: Arc<dyn CommandHandler>,
}

impl CommandRouter {
    pub fn new(handler: Arc<dyn CommandHandler>) -> Self {
        Self {
            table: default_table(),
            handler,
        }
    }

    /// Replace the required tokens of the named commands
    pub fn with_overrides(mut self, overrides: &HashMap<String, Vec<String>>) -> Self {
        for (name, auths) in overrides {
            match self.table.get_mut(name) {
                Some(spec) => {
                    debug!(command = %name, ?auths, "Overriding command authorization");
                    spec.auths = auths.iter().cloned().collect();
                }
                None => warn!(command = %name, "Ignoring authorization override for unknown command"),
            }
        }
        self
    }

    pub fn spec(&self, name: &str) -> Option<&CommandSpec> {
        self.table.get(name)
    }

    /// Authorize, decode and run a request
    pub async fn dispatch(&self, request: &Request) -> Result<Response, DispatchError> {
        let spec = self
            .table
            .get(&request.cmd)
            .ok_or_else(|| DispatchError::UnknownCommand(request.cmd.clone()))?;

        if !spec.permits(&request.auths) {
            warn!(command = %request.cmd, "Unauthorized command request");
            return Err(DispatchError::Unauthorized {
                command: request.cmd.clone(),
            });
        }

        if !spec.accepts_args(&request.args) {
            return Err(DispatchError::InvalidArguments {
                command: request.cmd.clone(),
                reason: format!("expected {:?}", spec.args),
            });
        }

        let command = spec.kind.parse(&request.args)?;
        debug!(command = %request.cmd, queued = spec.needs_queue, "Dispatching command");

        Ok(self.handler.handle(command, &request.auths).await)
    }

    /// Like `dispatch`, with routing failures turned into error responses
    pub async fn respond(&self, request: &Request) -> Response {
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(e) => e.into(),
        }
    }
}
