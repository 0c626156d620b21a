//! Lifecycle events emitted by agents and the coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AgentRegistered,
    AgentUnregistered,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    RecoveryAttempted,
    StatusChanged,
    CoordinatorStarted,
    CoordinatorStopped,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::AgentRegistered => "agent_registered",
            EventKind::AgentUnregistered => "agent_unregistered",
            EventKind::TaskStarted => "task_started",
            EventKind::TaskCompleted => "task_completed",
            EventKind::TaskFailed => "task_failed",
            EventKind::RecoveryAttempted => "recovery_attempted",
            EventKind::StatusChanged => "status_changed",
            EventKind::CoordinatorStarted => "coordinator_started",
            EventKind::CoordinatorStopped => "coordinator_stopped",
        }
    }

    /// Severity is derived from the event name: failures are errors.
    pub fn severity(&self) -> Severity {
        if self.as_str().contains("failed") || self.as_str().contains("error") {
            Severity::Error
        } else {
            Severity::Info
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    /// Agent the event concerns; `None` for coordinator-wide events.
    pub agent_id: Option<String>,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub severity: Severity,
}

impl Event {
    pub fn new(kind: EventKind, agent_id: Option<&str>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.map(str::to_string),
            kind,
            timestamp: Utc::now(),
            payload,
            severity: kind.severity(),
        }
    }

    pub fn for_agent(kind: EventKind, agent_id: &str, payload: serde_json::Value) -> Self {
        Self::new(kind, Some(agent_id), payload)
    }

    pub fn system(kind: EventKind, payload: serde_json::Value) -> Self {
        Self::new(kind, None, payload)
    }
}
