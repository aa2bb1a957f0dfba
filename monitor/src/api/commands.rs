//! Wire messages and typed commands

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::deploy::step::Step;
use crate::errors::DispatchError;

/// A request as sent by a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub cmd: String,
    pub auths: Vec<String>,
    pub args: Value,
}

/// A response sent back to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub error: bool,
    pub msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Response {
    pub fn ok(msg: impl Into<String>) -> Self {
        Self {
            error: false,
            msg: Some(msg.into()),
            data: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            error: true,
            msg: Some(msg.into()),
            data: None,
        }
    }

    /// Successful response carrying only data
    pub fn data(data: Value) -> Self {
        Self {
            error: false,
            msg: None,
            data: Some(data),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<DispatchError> for Response {
    fn from(err: DispatchError) -> Self {
        Response::err(err.to_string())
    }
}

/// Server control action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Control {
    Start,
    Restart,
    Stop,
}

/// Arguments of `server_control`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerControlArgs {
    pub server: String,
    pub control: Control,
}

/// Arguments of `create_task`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTaskArgs {
    pub server: String,
    pub commands: Vec<Step>,
    #[serde(default)]
    pub pr_num: Option<u64>,
    #[serde(default)]
    pub continue_on_error: bool,
}

/// Command kinds known to the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    ServerControl,
    GetServers,
    CreateTask,
}

impl CommandKind {
    pub const ALL: [CommandKind; 3] = [
        CommandKind::ServerControl,
        CommandKind::GetServers,
        CommandKind::CreateTask,
    ];

    /// Name used in the `cmd` field
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::ServerControl => "server_control",
            CommandKind::GetServers => "get_servers",
            CommandKind::CreateTask => "create_task",
        }
    }

    /// Argument names the command declares
    pub fn declared_args(&self) -> &'static [&'static str] {
        match self {
            CommandKind::ServerControl => &["control", "server"],
            CommandKind::GetServers => &[],
            CommandKind::CreateTask => &["server", "commands"],
        }
    }

    /// Decode the request arguments into a typed command
    pub fn parse(&self, args: &Value) -> Result<Command, DispatchError> {
        let invalid = |e: serde_json::Error| DispatchError::InvalidArguments {
            command: self.name().to_string(),
            reason: e.to_string(),
        };

        match self {
            CommandKind::ServerControl => Ok(Command::ServerControl(
                ServerControlArgs::deserialize(args).map_err(invalid)?,
            )),
            CommandKind::GetServers => Ok(Command::GetServers),
            CommandKind::CreateTask => Ok(Command::CreateTask(
                CreateTaskArgs::deserialize(args).map_err(invalid)?,
            )),
        }
    }
}

/// A decoded command ready for a handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ServerControl(ServerControlArgs),
    GetServers,
    CreateTask(CreateTaskArgs),
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::ServerControl(_) => CommandKind::ServerControl,
            Command::GetServers => CommandKind::GetServers,
            Command::CreateTask(_) => CommandKind::CreateTask,
        }
    }
}
