//! Agent state, health, metrics and configuration records.

use crate::core::task::Priority;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Success rate (percent) an agent must exceed to count as healthy.
pub const HEALTHY_SUCCESS_RATE: f64 = 80.0;

/// Error count at which an agent stops counting as healthy.
pub const UNHEALTHY_ERROR_COUNT: u32 = 5;

/// Lifecycle state of an agent.
///
/// `idle -> running -> completed|failed -> idle`, `running -> paused`,
/// `failed -> recovering -> idle`. There is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
    Recovering,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Running => "running",
            AgentStatus::Paused => "paused",
            AgentStatus::Completed => "completed",
            AgentStatus::Failed => "failed",
            AgentStatus::Recovering => "recovering",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHealth {
    pub is_healthy: bool,
    pub last_check: DateTime<Utc>,
    /// Seconds since creation or the last restart.
    pub uptime_secs: u64,
    pub error_count: u32,
    /// Percentage of executions that succeeded.
    pub success_rate: f64,
    /// Duration of the most recent execution.
    pub response_time_ms: u64,
}

impl AgentHealth {
    /// `success_rate > 80 && error_count < 5`.
    pub fn evaluate(success_rate: f64, error_count: u32) -> bool {
        success_rate > HEALTHY_SUCCESS_RATE && error_count < UNHEALTHY_ERROR_COUNT
    }
}

impl Default for AgentHealth {
    fn default() -> Self {
        Self {
            is_healthy: true,
            last_check: Utc::now(),
            uptime_secs: 0,
            error_count: 0,
            success_rate: 100.0,
            response_time_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    /// Running mean over successful executions.
    pub average_execution_time_ms: f64,
    pub last_execution_time_ms: u64,
    /// Megabytes.
    pub memory_usage: f64,
    /// Percent.
    pub cpu_usage: f64,
}

impl AgentMetrics {
    pub fn success_rate(&self) -> f64 {
        if self.total_executions == 0 {
            return 100.0;
        }
        self.successful_executions as f64 / self.total_executions as f64 * 100.0
    }
}

pub const DEFAULT_AGENT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_AGENT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_RECOVERY_COOLDOWN_MS: u64 = 5_000;
pub const DEFAULT_RESTART_DELAY_MS: u64 = 1_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Failures tolerated before the agent stops recovering on its own.
    pub max_retries: u32,
    /// Upper bound on a single `execute` call.
    pub timeout_ms: u64,
    pub auto_restart: bool,
    pub notifications: bool,
    pub recovery_cooldown_ms: u64,
    pub restart_delay_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_AGENT_MAX_RETRIES,
            timeout_ms: DEFAULT_AGENT_TIMEOUT_MS,
            auto_restart: true,
            notifications: true,
            recovery_cooldown_ms: DEFAULT_RECOVERY_COOLDOWN_MS,
            restart_delay_ms: DEFAULT_RESTART_DELAY_MS,
        }
    }
}

impl AgentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn recovery_cooldown(&self) -> Duration {
        Duration::from_millis(self.recovery_cooldown_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

/// Immutable copy of an agent's public fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: String,
    pub name: String,
    pub category: String,
    pub priority: Priority,
    pub status: AgentStatus,
    pub capabilities: BTreeSet<String>,
    pub dependencies: BTreeSet<String>,
    pub health: AgentHealth,
    pub metrics: AgentMetrics,
    pub config: AgentConfig,
}

impl AgentSnapshot {
    pub fn is_running(&self) -> bool {
        self.status == AgentStatus::Running
    }
}
