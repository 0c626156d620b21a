//! Health monitoring for agents.
//!
//! The `HealthMonitor` aggregates per-agent health into a system-wide
//! score and resource figures. It is observational: it never restarts an
//! agent itself, it only reports which agents qualify for a restart. The
//! coordinator's supervision loop acts on that list.

use crate::agent::{Agent, AgentSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Score at or above which the system counts as healthy.
pub const HEALTHY_THRESHOLD: f64 = 80.0;

/// Score at or above which the system counts as degraded rather than critical.
pub const DEGRADED_THRESHOLD: f64 = 50.0;

const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(1);

pub type AgentRegistry = Arc<RwLock<HashMap<String, Arc<Agent>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemStatus {
    Healthy,
    Degraded,
    Critical,
}

impl SystemStatus {
    pub fn from_score(score: f64) -> Self {
        if score >= HEALTHY_THRESHOLD {
            SystemStatus::Healthy
        } else if score >= DEGRADED_THRESHOLD {
            SystemStatus::Degraded
        } else {
            SystemStatus::Critical
        }
    }
}

impl fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SystemStatus::Healthy => "healthy",
            SystemStatus::Degraded => "degraded",
            SystemStatus::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Average resource figures across registered agents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUtilization {
    /// Megabytes.
    pub memory: f64,
    /// Percent.
    pub cpu: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Percentage of agents that are healthy; 100 with no agents.
    pub system_health: f64,
    pub status: SystemStatus,
    pub healthy_agents: usize,
    pub unhealthy_agents: usize,
    pub resource_utilization: ResourceUtilization,
    /// Unhealthy agents with `auto_restart` enabled.
    pub agents_needing_restart: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Aggregate a set of agent snapshots.
    pub fn from_snapshots(snapshots: &[AgentSnapshot]) -> Self {
        let total = snapshots.len();
        let healthy = snapshots.iter().filter(|s| s.health.is_healthy).count();
        let system_health = if total == 0 {
            100.0
        } else {
            healthy as f64 / total as f64 * 100.0
        };

        let resource_utilization = if total == 0 {
            ResourceUtilization::default()
        } else {
            let (memory, cpu) = snapshots.iter().fold((0.0, 0.0), |(m, c), s| {
                (m + s.metrics.memory_usage, c + s.metrics.cpu_usage)
            });
            ResourceUtilization {
                memory: memory / total as f64,
                cpu: cpu / total as f64,
            }
        };

        let mut agents_needing_restart: Vec<String> = snapshots
            .iter()
            .filter(|s| !s.health.is_healthy && s.config.auto_restart)
            .map(|s| s.id.clone())
            .collect();
        agents_needing_restart.sort();

        Self {
            system_health,
            status: SystemStatus::from_score(system_health),
            healthy_agents: healthy,
            unhealthy_agents: total - healthy,
            resource_utilization,
            agents_needing_restart,
            checked_at: Utc::now(),
        }
    }
}

pub struct HealthMonitor {
    agents: AgentRegistry,
    interval: Duration,
    latest: Arc<RwLock<Option<HealthReport>>>,
    cancel: parking_lot::Mutex<Option<CancellationToken>>,
}

impl HealthMonitor {
    /// `interval` is raised to at least one millisecond.
    pub fn new(agents: AgentRegistry, interval: Duration) -> Self {
        Self {
            agents,
            interval: interval.max(MIN_REFRESH_INTERVAL),
            latest: Arc::new(RwLock::new(None)),
            cancel: parking_lot::Mutex::new(None),
        }
    }

    /// Recompute the report from the current registry and remember it.
    pub async fn check(&self) -> HealthReport {
        refresh(&self.agents, &self.latest).await
    }

    /// The report from the most recent check, if any.
    pub async fn latest(&self) -> Option<HealthReport> {
        self.latest.read().await.clone()
    }

    pub fn is_running(&self) -> bool {
        self.cancel.lock().is_some()
    }

    /// Spawn the periodic refresh. Returns `false` if already running.
    pub fn start(&self) -> bool {
        let mut slot = self.cancel.lock();
        if slot.is_some() {
            warn!("Health monitor already running");
            return false;
        }
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let agents = Arc::clone(&self.agents);
        let latest = Arc::clone(&self.latest);
        let period = self.interval;

        debug!("HealthMonitor::start ({:?})", period);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel_clone.cancelled() => {
                        debug!("HealthMonitor cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        let report = refresh(&agents, &latest).await;
                        trace!(
                            "HealthMonitor: system health {:.1}% ({})",
                            report.system_health,
                            report.status
                        );
                    }
                }
            }
        });

        *slot = Some(cancel);
        true
    }

    /// Cancel the periodic refresh. Returns `false` if it was not running.
    pub fn stop(&self) -> bool {
        match self.cancel.lock().take() {
            Some(cancel) => {
                cancel.cancel();
                true
            }
            None => false,
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.get_mut().take() {
            cancel.cancel();
        }
    }
}

impl fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}

async fn refresh(
    agents: &AgentRegistry,
    latest: &RwLock<Option<HealthReport>>,
) -> HealthReport {
    let snapshots: Vec<AgentSnapshot> = agents.read().await.values().map(|a| a.state()).collect();
    let report = HealthReport::from_snapshots(&snapshots);
    *latest.write().await = Some(report.clone());
    report
}
