//! Agent lifecycle wrapper.
//!
//! [`Agent`] wraps an [`AgentBehavior`] with the state machine, metrics,
//! health record and event stream shared by every agent category. A run
//! is guarded against re-entrancy: an agent never executes two tasks at
//! once.

use crate::agent::behavior::{AgentBehavior, DependencyResolver, NoDependencies};
use crate::agent::probe::{ResourceProbe, SimulatedProbe};
use crate::agent::types::{AgentConfig, AgentHealth, AgentMetrics, AgentSnapshot, AgentStatus};
use crate::config::DEFAULT_EVENT_CAPACITY;
use crate::core::event::{Event, EventKind};
use crate::core::task::{Priority, TaskDefinition};
use crate::error::{Error, Result};
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

struct AgentState {
    status: AgentStatus,
    health: AgentHealth,
    metrics: AgentMetrics,
    started_at: Instant,
}

/// Releases the run slot when a run ends, however it ends.
///
/// Only the run that still owns the slot releases it: after `stop()` a
/// newer run may hold it.
struct RunGuard<'a> {
    slot: &'a AtomicU64,
    run: u64,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let _ = self
            .slot
            .compare_exchange(self.run, IDLE_SLOT, Ordering::AcqRel, Ordering::Acquire);
    }
}

/// Slot value while no run is in flight.
const IDLE_SLOT: u64 = 0;

pub struct Agent {
    id: String,
    name: String,
    category: String,
    priority: Priority,
    capabilities: BTreeSet<String>,
    dependencies: BTreeSet<String>,
    config: AgentConfig,
    behavior: Arc<dyn AgentBehavior>,
    probe: Arc<dyn ResourceProbe>,
    resolver: RwLock<Option<Arc<dyn DependencyResolver>>>,
    state: RwLock<AgentState>,
    /// Id of the run holding the re-entrancy slot, or `IDLE_SLOT`.
    current_run: AtomicU64,
    next_run: AtomicU64,
    events: broadcast::Sender<Event>,
}

impl Agent {
    pub fn new(
        id: &str,
        name: &str,
        category: &str,
        priority: Priority,
        behavior: Arc<dyn AgentBehavior>,
    ) -> Self {
        let (events, _) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        let probe: Arc<dyn ResourceProbe> = Arc::new(SimulatedProbe::default());
        let initial = probe.sample();
        Self {
            id: id.to_string(),
            name: name.to_string(),
            category: category.to_string(),
            priority,
            capabilities: BTreeSet::new(),
            dependencies: BTreeSet::new(),
            config: AgentConfig::default(),
            behavior,
            probe,
            resolver: RwLock::new(None),
            state: RwLock::new(AgentState {
                status: AgentStatus::Idle,
                health: AgentHealth::default(),
                metrics: AgentMetrics {
                    memory_usage: initial.memory,
                    cpu_usage: initial.cpu,
                    ..Default::default()
                },
                started_at: Instant::now(),
            }),
            current_run: AtomicU64::new(IDLE_SLOT),
            next_run: AtomicU64::new(IDLE_SLOT),
            events,
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Agent categories that must be available before this agent runs.
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        let sample = probe.sample();
        self.probe = probe;
        self.with_resources(sample.memory, sample.cpu)
    }

    /// Override the resource figures reported before the first run.
    pub fn with_resources(self, memory: f64, cpu: f64) -> Self {
        {
            let mut state = self.state.write();
            state.metrics.memory_usage = memory;
            state.metrics.cpu_usage = cpu;
        }
        self
    }

    pub fn with_dependency_resolver(self, resolver: Arc<dyn DependencyResolver>) -> Self {
        *self.resolver.write() = Some(resolver);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn capabilities(&self) -> &BTreeSet<String> {
        &self.capabilities
    }

    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn status(&self) -> AgentStatus {
        self.state.read().status
    }

    pub fn is_healthy(&self) -> bool {
        self.state.read().health.is_healthy
    }

    /// Whether a run is in flight.
    pub fn is_executing(&self) -> bool {
        self.current_run.load(Ordering::Acquire) != IDLE_SLOT
    }

    fn owns_slot(&self, run: u64) -> bool {
        self.current_run.load(Ordering::Acquire) == run
    }

    /// Subscribe to this agent's lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Install a resolver unless one was supplied explicitly.
    ///
    /// Returns `true` if the resolver was installed.
    pub fn install_resolver_if_absent(&self, resolver: Arc<dyn DependencyResolver>) -> bool {
        let mut slot = self.resolver.write();
        if slot.is_some() {
            return false;
        }
        *slot = Some(resolver);
        true
    }

    /// Capability superset check plus the behaviour's own veto.
    pub fn can_execute(&self, task: &TaskDefinition) -> bool {
        task.required_capabilities.is_subset(&self.capabilities) && self.behavior.can_execute(task)
    }

    pub fn info(&self) -> Map<String, Value> {
        let mut info = Map::new();
        info.insert("id".to_string(), json!(self.id));
        info.insert("name".to_string(), json!(self.name));
        info.insert("category".to_string(), json!(self.category));
        info.insert("priority".to_string(), json!(self.priority));
        info.insert("capabilities".to_string(), json!(self.capabilities));
        for (key, value) in self.behavior.info() {
            info.entry(key).or_insert(value);
        }
        info
    }

    /// Immutable snapshot of all public fields.
    pub fn state(&self) -> AgentSnapshot {
        let state = self.state.read();
        let mut health = state.health.clone();
        health.uptime_secs = state.started_at.elapsed().as_secs();
        AgentSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            category: self.category.clone(),
            priority: self.priority,
            status: state.status,
            capabilities: self.capabilities.clone(),
            dependencies: self.dependencies.clone(),
            health,
            metrics: state.metrics.clone(),
            config: self.config.clone(),
        }
    }

    /// Execute one task through the lifecycle.
    ///
    /// # Errors
    ///
    /// - `Error::AgentBusy` if a run is already in flight; nothing is mutated.
    /// - The dependency or execution error otherwise. When the agent recovers
    ///   on its own, the cooldown completes before the error is returned.
    ///
    /// A run superseded by `stop()` still records its metrics but leaves
    /// the status to whichever run owns the agent now.
    pub async fn run(&self, input: &Value) -> Result<Value> {
        let run = self.next_run.fetch_add(1, Ordering::AcqRel) + 1;
        if self
            .current_run
            .compare_exchange(IDLE_SLOT, run, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::AgentBusy(self.id.clone()));
        }
        let _guard = RunGuard {
            slot: &self.current_run,
            run,
        };

        self.set_status(AgentStatus::Running);
        self.state.write().metrics.total_executions += 1;
        self.emit(EventKind::TaskStarted, json!({ "input": input }));

        let started = Instant::now();
        let outcome = match self.check_dependencies().await {
            Ok(()) => self.execute_with_timeout(input).await,
            Err(e) => Err(e),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                self.record_success(elapsed_ms);
                let owner = self.owns_slot(run);
                if owner {
                    self.set_status(AgentStatus::Completed);
                }
                self.emit(
                    EventKind::TaskCompleted,
                    json!({ "duration_ms": elapsed_ms, "result": result }),
                );
                self.refresh_health();
                if owner {
                    self.set_status(AgentStatus::Idle);
                }
                Ok(result)
            }
            Err(e) => {
                let failed = self.record_failure(elapsed_ms);
                let owner = self.owns_slot(run);
                if owner {
                    self.set_status(AgentStatus::Failed);
                }
                self.emit(EventKind::TaskFailed, json!({ "error": e.to_string() }));
                self.refresh_health();
                warn!("Agent {} failed ({} failures): {}", self.id, failed, e);

                if owner && self.config.auto_restart && failed < u64::from(self.config.max_retries) {
                    self.attempt_recovery(run).await;
                }
                Err(e)
            }
        }
    }

    /// `running -> paused`. Returns whether the transition happened.
    pub fn pause(&self) -> bool {
        self.transition_from(AgentStatus::Running, AgentStatus::Paused)
    }

    /// `paused -> running`. Returns whether the transition happened.
    pub fn resume(&self) -> bool {
        self.transition_from(AgentStatus::Paused, AgentStatus::Running)
    }

    /// Force `idle` and clear the re-entrancy guard.
    ///
    /// An in-flight `execute` is not interrupted; it finishes and records
    /// its metrics, but no longer owns the agent's status.
    pub fn stop(&self) {
        self.current_run.store(IDLE_SLOT, Ordering::Release);
        self.set_status(AgentStatus::Idle);
        debug!("Agent {} stopped", self.id);
    }

    /// `stop()`, wait the restart delay, then come back `idle` with a fresh uptime.
    pub async fn restart(&self) {
        info!("Restarting agent {}", self.id);
        self.stop();
        tokio::time::sleep(self.config.restart_delay()).await;
        self.state.write().started_at = Instant::now();
        // A run admitted during the delay owns the status.
        if !self.is_executing() {
            self.set_status(AgentStatus::Idle);
        }
    }

    async fn check_dependencies(&self) -> Result<()> {
        if self.dependencies.is_empty() {
            return Ok(());
        }
        let resolver = self.resolver.read().clone();
        match resolver {
            Some(resolver) => resolver.check(&self.id, &self.dependencies).await,
            None => NoDependencies.check(&self.id, &self.dependencies).await,
        }
    }

    async fn execute_with_timeout(&self, input: &Value) -> Result<Value> {
        let limit = self.config.timeout();
        match tokio::time::timeout(limit, self.behavior.execute(input)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(limit)),
        }
    }

    async fn attempt_recovery(&self, run: u64) {
        self.set_status(AgentStatus::Recovering);
        self.emit(
            EventKind::RecoveryAttempted,
            json!({ "cooldown_ms": self.config.recovery_cooldown_ms }),
        );
        tokio::time::sleep(self.config.recovery_cooldown()).await;
        if self.owns_slot(run) {
            self.set_status(AgentStatus::Idle);
            info!("Agent {} recovered", self.id);
        }
    }

    fn record_success(&self, elapsed_ms: u64) {
        let mut state = self.state.write();
        let metrics = &mut state.metrics;
        metrics.successful_executions += 1;
        metrics.last_execution_time_ms = elapsed_ms;
        let n = metrics.successful_executions as f64;
        metrics.average_execution_time_ms += (elapsed_ms as f64 - metrics.average_execution_time_ms) / n;
        let rate = metrics.success_rate();
        state.health.success_rate = rate;
        state.health.response_time_ms = elapsed_ms;
    }

    /// Returns the updated failure count.
    fn record_failure(&self, elapsed_ms: u64) -> u64 {
        let mut state = self.state.write();
        state.metrics.failed_executions += 1;
        state.metrics.last_execution_time_ms = elapsed_ms;
        state.health.error_count += 1;
        state.health.success_rate = state.metrics.success_rate();
        state.health.response_time_ms = elapsed_ms;
        state.metrics.failed_executions
    }

    fn refresh_health(&self) {
        let sample = self.probe.sample();
        let mut state = self.state.write();
        state.health.is_healthy =
            AgentHealth::evaluate(state.health.success_rate, state.health.error_count);
        state.health.last_check = Utc::now();
        state.metrics.memory_usage = sample.memory;
        state.metrics.cpu_usage = sample.cpu;
    }

    fn transition_from(&self, from: AgentStatus, to: AgentStatus) -> bool {
        {
            let mut state = self.state.write();
            if state.status != from {
                warn!(
                    "Agent {}: cannot go {} -> {} while {}",
                    self.id, from, to, state.status
                );
                return false;
            }
            state.status = to;
        }
        self.emit_status_change(from, to);
        true
    }

    fn set_status(&self, to: AgentStatus) {
        let from = std::mem::replace(&mut self.state.write().status, to);
        if from != to {
            self.emit_status_change(from, to);
        }
    }

    fn emit_status_change(&self, from: AgentStatus, to: AgentStatus) {
        debug!("Agent {}: {} -> {}", self.id, from, to);
        self.emit(EventKind::StatusChanged, json!({ "from": from, "to": to }));
    }

    fn emit(&self, kind: EventKind, payload: Value) {
        if !self.config.notifications {
            return;
        }
        // No receivers is fine.
        let _ = self.events.send(Event::for_agent(kind, &self.id, payload));
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("priority", &self.priority)
            .field("status", &self.status())
            .finish()
    }
}
