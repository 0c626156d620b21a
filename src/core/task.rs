//! Task data model.
//!
//! A [`TaskDefinition`] is the immutable request submitted to the
//! coordinator; a [`TaskExecution`] is the mutable record that tracks one
//! submission through agent selection, execution and retries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Retry ceiling for critical tasks.
pub const CRITICAL_RETRY_CEILING: u32 = 5;

/// Retry ceiling for every other priority.
pub const DEFAULT_RETRY_CEILING: u32 = 3;

/// Importance of an agent or task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Numeric rank used for agent selection: higher is more important.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Critical => 4,
            Priority::High => 3,
            Priority::Medium => 2,
            Priority::Low => 1,
        }
    }

    /// Number of re-submissions the coordinator allows for a task of this priority.
    pub fn retry_ceiling(&self) -> u32 {
        match self {
            Priority::Critical => CRITICAL_RETRY_CEILING,
            _ => DEFAULT_RETRY_CEILING,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Critical => write!(f, "critical"),
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// Unique identifier for a task execution record.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
    /// Create a new unique execution identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ExecutionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Immutable description of a unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: String,
    pub name: String,
    /// Capabilities an agent must hold (all of them) to be eligible.
    #[serde(default)]
    pub required_capabilities: BTreeSet<String>,
    #[serde(default)]
    pub priority: Priority,
    /// Opaque payload handed to the agent's `execute`.
    #[serde(default)]
    pub config: serde_json::Value,
}

impl TaskDefinition {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            required_capabilities: BTreeSet::new(),
            priority: Priority::default(),
            config: serde_json::Value::Null,
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn retry_ceiling(&self) -> u32 {
        self.priority.retry_ceiling()
    }
}

/// Status of a task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Pending => write!(f, "pending"),
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Mutable record of one task submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub id: ExecutionId,
    pub task_id: String,
    /// Agent bound to the most recent attempt.
    pub agent_id: Option<String>,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    /// Number of re-submissions so far.
    pub retries: u32,
    /// 0-100.
    pub progress: u8,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl TaskExecution {
    /// Create a pending execution for the given task.
    pub fn new(task: &TaskDefinition) -> Self {
        Self {
            id: ExecutionId::new(),
            task_id: task.id.clone(),
            agent_id: None,
            status: ExecutionStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            retries: 0,
            progress: 0,
            result: None,
            error: None,
        }
    }

    /// Bind an agent and mark the execution running.
    pub fn start(&mut self, agent_id: &str) {
        self.agent_id = Some(agent_id.to_string());
        self.status = ExecutionStatus::Running;
        self.start_time = Utc::now();
        self.end_time = None;
        self.duration_ms = None;
        self.error = None;
    }

    pub fn complete(&mut self, result: serde_json::Value) {
        self.status = ExecutionStatus::Completed;
        self.progress = 100;
        self.result = Some(result);
        self.stamp_end();
    }

    pub fn fail(&mut self, error: &str) {
        self.status = ExecutionStatus::Failed;
        self.error = Some(error.to_string());
        self.stamp_end();
    }

    /// Count a retry and put the record back to pending.
    pub fn reset_for_retry(&mut self) {
        self.retries += 1;
        self.status = ExecutionStatus::Pending;
        self.progress = 0;
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            ExecutionStatus::Completed | ExecutionStatus::Failed
        )
    }

    fn stamp_end(&mut self) {
        let end = Utc::now();
        let elapsed = (end - self.start_time).num_milliseconds().max(0);
        self.end_time = Some(end);
        self.duration_ms = Some(elapsed as u64);
    }
}
