//! Deployment step identifiers and outcomes

use serde::{Deserialize, Serialize};

/// A single deployment step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "StepId", into = "String")]
pub enum Step {
    Pull,
    Compile,
    Install,
    GenerateChangelogs,
}

impl Step {
    /// Numeric code accepted on the wire
    pub fn code(&self) -> u8 {
        match self {
            Step::Pull => 0,
            Step::Compile => 1,
            Step::Install => 2,
            Step::GenerateChangelogs => 3,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Step::Pull),
            1 => Some(Step::Compile),
            2 => Some(Step::Install),
            3 => Some(Step::GenerateChangelogs),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Pull => "pull",
            Step::Compile => "compile",
            Step::Install => "install",
            Step::GenerateChangelogs => "changelogs",
        }
    }

    /// Human readable description used in logs
    pub fn description(&self) -> &'static str {
        match self {
            Step::Pull => "Pulling latest code from origin",
            Step::Compile => "Compiling the game code",
            Step::Install => "Installing the game directory",
            Step::GenerateChangelogs => "Generating and publishing changelogs",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Step {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pull" => Ok(Step::Pull),
            "compile" | "build" => Ok(Step::Compile),
            "install" => Ok(Step::Install),
            "changelogs" | "changelog" | "generate_changelogs" => Ok(Step::GenerateChangelogs),
            _ => Err(format!("Unknown step: {}", s)),
        }
    }
}

/// Wire form of a step: a numeric code or a name
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StepId {
    Code(u64),
    Name(String),
}

impl TryFrom<StepId> for Step {
    type Error = String;

    fn try_from(id: StepId) -> Result<Self, Self::Error> {
        match id {
            StepId::Code(code) => {
                Step::from_code(code).ok_or_else(|| format!("Unknown step code: {}", code))
            }
            StepId::Name(name) => name.parse(),
        }
    }
}

impl From<Step> for String {
    fn from(step: Step) -> Self {
        step.as_str().to_string()
    }
}

/// End of the step queue that is consumed first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOrder {
    /// Steps run in the order they were listed
    #[default]
    Fifo,

    /// Steps run from the last listed to the first
    Lifo,
}

/// Result of one step within a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error", rename_all = "lowercase")]
pub enum StepStatus {
    Succeeded,
    Failed(String),
    Skipped,
}

/// A step paired with its result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub step: Step,
    #[serde(flatten)]
    pub status: StepStatus,
}
