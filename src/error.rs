use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No agents available for task {task} (requires: {})", capabilities.join(", "))]
    NoAgentAvailable {
        task: String,
        capabilities: Vec<String>,
    },

    #[error("Agent already registered: {0}")]
    AgentAlreadyRegistered(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Agent {0} is already running")]
    AgentBusy(String),

    #[error("Agent {agent} has unsatisfied dependency: {dependency}")]
    DependencyUnsatisfied { agent: String, dependency: String },

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Task {task} failed after {retries} retries: {source}")]
    RetriesExhausted {
        task: String,
        retries: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("Task scheduler is closed")]
    SchedulerClosed,

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Workflow '{workflow}' failed: {source}")]
    Workflow {
        workflow: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Workflow engine is not running")]
    WorkflowEngineStopped,

    #[error("Topic '{topic}' has reached its subscriber limit (max: {max})")]
    SubscriberLimit { topic: String, max: usize },
}

impl Error {
    /// Shorthand for agent implementations reporting a failed check.
    pub fn execution(msg: impl Into<String>) -> Self {
        Error::Execution(msg.into())
    }

    /// Walk through retry and workflow wrappers to the error that started it.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::RetriesExhausted { source, .. } | Error::Workflow { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
