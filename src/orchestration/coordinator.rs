//! Agent coordinator.
//!
//! The [`Coordinator`] owns the agent registry, the node map and every
//! task execution record. It admits tasks through the [`TaskScheduler`],
//! picks an agent for each one, retries failures with a linear backoff and
//! hands workflows to the [`WorkflowEngine`].
//!
//! ## Agent selection
//!
//! Candidates must be idle, healthy, able to execute the task and not
//! already reserved by another in-flight submission. Among those the
//! highest priority rank wins, ties going to the lowest memory usage.
//! This is a greedy pick, not a globally optimal assignment.
//!
//! ## Retries
//!
//! A failed attempt is retried on the same [`TaskExecution`] record after
//! `retry_base_delay * retries`. Critical tasks are retried up to 5 times,
//! everything else up to 3. The scheduler slot is released while waiting.

use crate::agent::{Agent, AgentSnapshot, AgentStatus, DependencyResolver};
use crate::config::Config;
use crate::core::dag::WorkflowDefinition;
use crate::core::event::{Event, EventKind};
use crate::core::task::{ExecutionId, ExecutionStatus, TaskDefinition, TaskExecution};
use crate::error::{Error, Result};
use crate::orchestration::bus::{BusMessage, MessageBus};
use crate::orchestration::health::{AgentRegistry, HealthMonitor, ResourceUtilization};
use crate::orchestration::node::Node;
use crate::orchestration::scheduler::TaskScheduler;
use crate::orchestration::workflow::{TaskRunner, WorkflowEngine, WorkflowRun};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Agent counts over the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentTotals {
    pub total: usize,
    /// Agents currently running a task.
    pub active: usize,
    pub failed: usize,
}

/// Execution counts over every retained record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskTotals {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub agents: AgentTotals,
    pub tasks: TaskTotals,
    /// Mean duration over executions that recorded one.
    pub average_execution_time_ms: f64,
    /// Executions holding a scheduler slot.
    pub active_tasks: usize,
    pub system_health: f64,
    pub resource_utilization: ResourceUtilization,
}

/// Satisfies an agent's category dependencies from the live registry.
///
/// Holds the registry weakly: agents keep their resolver alive, and the
/// registry keeps the agents alive.
struct RegistryResolver {
    agents: Weak<RwLock<HashMap<String, Arc<Agent>>>>,
}

#[async_trait]
impl DependencyResolver for RegistryResolver {
    async fn check(&self, agent_id: &str, dependencies: &BTreeSet<String>) -> Result<()> {
        let Some(agents) = self.agents.upgrade() else {
            return Err(Error::AgentNotFound(agent_id.to_string()));
        };
        let agents = agents.read().await;
        for dependency in dependencies {
            let satisfied = agents
                .values()
                .any(|a| a.id() != agent_id && a.category() == dependency && a.is_healthy());
            if !satisfied {
                return Err(Error::DependencyUnsatisfied {
                    agent: agent_id.to_string(),
                    dependency: dependency.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Removes an agent from the reserved set when the attempt ends.
struct Reservation<'a> {
    reserved: &'a parking_lot::Mutex<HashSet<String>>,
    agent_id: String,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.reserved.lock().remove(&self.agent_id);
    }
}

/// Why one attempt did not complete.
enum AttemptError {
    /// No agent could take the task; not retried.
    Admission(Error),
    /// The bound agent failed the run.
    Run(Error),
}

pub struct Coordinator {
    config: Config,
    agents: AgentRegistry,
    nodes: RwLock<HashMap<String, Node>>,
    executions: RwLock<HashMap<ExecutionId, TaskExecution>>,
    workflows: RwLock<HashMap<String, WorkflowDefinition>>,
    reserved: parking_lot::Mutex<HashSet<String>>,
    scheduler: TaskScheduler,
    bus: Arc<MessageBus>,
    health: HealthMonitor,
    engine: WorkflowEngine,
    events: broadcast::Sender<Event>,
    supervisor: parking_lot::Mutex<Option<CancellationToken>>,
}

impl Coordinator {
    /// # Errors
    ///
    /// `Error::Validation` if `config` fails [`Config::validate`].
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: Config) -> Self {
        let agents: AgentRegistry = Arc::new(RwLock::new(HashMap::new()));
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            scheduler: TaskScheduler::new(config.max_concurrent_tasks),
            bus: Arc::new(MessageBus::new(config.max_subscribers_per_topic)),
            health: HealthMonitor::new(Arc::clone(&agents), config.monitor_interval()),
            engine: WorkflowEngine::new(),
            agents,
            nodes: RwLock::new(HashMap::new()),
            executions: RwLock::new(HashMap::new()),
            workflows: RwLock::new(HashMap::new()),
            reserved: parking_lot::Mutex::new(HashSet::new()),
            events,
            supervisor: parking_lot::Mutex::new(None),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn health_monitor(&self) -> &HealthMonitor {
        &self.health
    }

    pub fn workflow_engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    /// Coordinator-level events (registration, task outcomes, start/stop).
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.supervisor.lock().is_some()
    }

    // -- Registry ---------------------------------------------------------

    /// Add an agent to the registry and to `node_id` (the default node if `None`).
    ///
    /// # Errors
    ///
    /// `Error::AgentAlreadyRegistered` if an agent with the same id exists;
    /// the registry is left unchanged.
    pub async fn register_agent(&self, agent: Arc<Agent>, node_id: Option<&str>) -> Result<()> {
        let node_id = node_id.unwrap_or(&self.config.default_node).to_string();
        // Registry guard is held across the node insert; lock order is agents then nodes.
        let mut agents = self.agents.write().await;
        if agents.contains_key(agent.id()) {
            warn!("Agent {} is already registered", agent.id());
            return Err(Error::AgentAlreadyRegistered(agent.id().to_string()));
        }
        agent.install_resolver_if_absent(Arc::new(RegistryResolver {
            agents: Arc::downgrade(&self.agents),
        }));
        agents.insert(agent.id().to_string(), Arc::clone(&agent));
        self.nodes
            .write()
            .await
            .entry(node_id.clone())
            .or_insert_with(|| {
                debug!("Creating node {}", node_id);
                Node::new(&node_id, self.config.node_capacity)
            })
            .add_agent(agent.state());
        drop(agents);

        info!("Registered agent {} on node {}", agent.id(), node_id);
        self.emit(Event::for_agent(
            EventKind::AgentRegistered,
            agent.id(),
            json!({ "node": node_id, "category": agent.category() }),
        ));
        Ok(())
    }

    /// Remove an agent from the registry and every node.
    ///
    /// Returns the removed agent, or `None` (with a warning) if unknown.
    pub async fn unregister_agent(&self, agent_id: &str) -> Option<Arc<Agent>> {
        let mut agents = self.agents.write().await;
        let Some(agent) = agents.remove(agent_id) else {
            warn!("Cannot unregister unknown agent {}", agent_id);
            return None;
        };
        for node in self.nodes.write().await.values_mut() {
            node.remove_agent(agent_id);
        }
        drop(agents);
        info!("Unregistered agent {}", agent_id);
        self.emit(Event::for_agent(
            EventKind::AgentUnregistered,
            agent_id,
            Value::Null,
        ));
        Some(agent)
    }

    pub async fn get_agent(&self, agent_id: &str) -> Option<Arc<Agent>> {
        self.agents.read().await.get(agent_id).cloned()
    }

    /// Snapshots of every registered agent, ordered by id.
    pub async fn get_agents_status(&self) -> Vec<AgentSnapshot> {
        let mut snapshots: Vec<AgentSnapshot> =
            self.agents.read().await.values().map(|a| a.state()).collect();
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }

    /// Every node with freshly computed load, ordered by id.
    pub async fn get_nodes_status(&self) -> Vec<Node> {
        self.update_node_loads().await;
        let mut nodes: Vec<Node> = self.nodes.read().await.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// Refresh member snapshots and recompute `load` and `status` for every node.
    pub async fn update_node_loads(&self) {
        let snapshots: Vec<AgentSnapshot> =
            self.agents.read().await.values().map(|a| a.state()).collect();
        for node in self.nodes.write().await.values_mut() {
            node.refresh(&snapshots);
        }
    }

    // -- Task execution ---------------------------------------------------

    /// Run a task to completion, retrying failures.
    ///
    /// # Errors
    ///
    /// - `Error::NoAgentAvailable` if no agent qualifies; the execution
    ///   record stays `pending` when this happens on the first attempt.
    /// - `Error::RetriesExhausted` wrapping the last failure once the
    ///   priority's retry ceiling is reached.
    pub async fn execute_task(&self, task: TaskDefinition) -> Result<TaskExecution> {
        let mut execution = TaskExecution::new(&task);
        self.store_execution(&execution).await;
        let ceiling = task.retry_ceiling();

        loop {
            let outcome = self.attempt(&task, &mut execution).await;
            self.update_node_loads().await;

            match outcome {
                Ok(()) => return Ok(execution),
                Err(AttemptError::Admission(e)) => {
                    if execution.retries > 0 {
                        execution.fail(&e.to_string());
                        self.store_execution(&execution).await;
                    }
                    return Err(e);
                }
                Err(AttemptError::Run(e)) if execution.retries < ceiling => {
                    execution.reset_for_retry();
                    self.store_execution(&execution).await;
                    let delay = self.config.retry_base_delay() * execution.retries;
                    warn!(
                        "Task {} failed ({}), retry {}/{} in {:?}",
                        task.id, e, execution.retries, ceiling, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(AttemptError::Run(e)) => {
                    error!(
                        "Task {} failed after {} retries: {}",
                        task.id, execution.retries, e
                    );
                    return Err(Error::RetriesExhausted {
                        task: task.id.clone(),
                        retries: execution.retries,
                        source: Box::new(e),
                    });
                }
            }
        }
    }

    /// One admission, selection and run. The scheduler slot and the agent
    /// reservation are both released when this returns.
    async fn attempt(
        &self,
        task: &TaskDefinition,
        execution: &mut TaskExecution,
    ) -> std::result::Result<(), AttemptError> {
        let _permit = self
            .scheduler
            .acquire()
            .await
            .map_err(AttemptError::Admission)?;

        let (agent, _reservation) = self.reserve_agent(task).await.ok_or_else(|| {
            AttemptError::Admission(Error::NoAgentAvailable {
                task: task.id.clone(),
                capabilities: task.required_capabilities.iter().cloned().collect(),
            })
        })?;

        execution.start(agent.id());
        self.store_execution(execution).await;
        self.bus.publish(BusMessage::TaskAssignment {
            execution_id: execution.id,
            task_id: task.id.clone(),
            agent_id: agent.id().to_string(),
        });
        debug!(
            "Task {} assigned to agent {} (execution {})",
            task.id,
            agent.id(),
            execution.id.short()
        );

        let result = agent.run(&task.config).await;

        let outcome = match result {
            Ok(value) => {
                execution.complete(value);
                Ok(())
            }
            Err(e) => {
                execution.fail(&e.to_string());
                Err(e)
            }
        };
        self.store_execution(execution).await;

        self.bus.publish(BusMessage::TaskCompletion {
            execution_id: execution.id,
            task_id: task.id.clone(),
            agent_id: execution.agent_id.clone(),
            status: execution.status,
            duration_ms: execution.duration_ms,
            error: execution.error.clone(),
        });
        let kind = if outcome.is_ok() {
            EventKind::TaskCompleted
        } else {
            EventKind::TaskFailed
        };
        self.emit(Event::for_agent(
            kind,
            agent.id(),
            json!({
                "execution_id": execution.id,
                "task_id": task.id,
                "duration_ms": execution.duration_ms,
                "retries": execution.retries,
                "error": execution.error,
            }),
        ));

        outcome.map_err(AttemptError::Run)
    }

    /// Pick the best eligible agent and reserve it.
    async fn reserve_agent(&self, task: &TaskDefinition) -> Option<(Arc<Agent>, Reservation<'_>)> {
        let agents: Vec<Arc<Agent>> = self.agents.read().await.values().cloned().collect();

        let mut reserved = self.reserved.lock();
        let mut candidates: Vec<(Arc<Agent>, AgentSnapshot)> = agents
            .into_iter()
            .filter(|a| !reserved.contains(a.id()))
            .map(|a| {
                let snapshot = a.state();
                (a, snapshot)
            })
            .filter(|(a, s)| {
                s.status == AgentStatus::Idle && s.health.is_healthy && a.can_execute(task)
            })
            .collect();

        if candidates.is_empty() {
            warn!(
                "No agent available for task {} (requires: {:?})",
                task.id, task.required_capabilities
            );
            return None;
        }

        candidates.sort_by(|(_, a), (_, b)| {
            b.priority
                .rank()
                .cmp(&a.priority.rank())
                .then(a.metrics.memory_usage.total_cmp(&b.metrics.memory_usage))
        });
        let (agent, _) = candidates.swap_remove(0);
        reserved.insert(agent.id().to_string());
        drop(reserved);

        let reservation = Reservation {
            reserved: &self.reserved,
            agent_id: agent.id().to_string(),
        };
        Some((agent, reservation))
    }

    async fn store_execution(&self, execution: &TaskExecution) {
        self.executions
            .write()
            .await
            .insert(execution.id, execution.clone());
    }

    pub async fn get_task_execution(&self, id: ExecutionId) -> Option<TaskExecution> {
        self.executions.read().await.get(&id).cloned()
    }

    /// Every retained execution record, oldest first.
    pub async fn get_task_executions(&self) -> Vec<TaskExecution> {
        let mut executions: Vec<TaskExecution> =
            self.executions.read().await.values().cloned().collect();
        executions.sort_by_key(|e| e.start_time);
        executions
    }

    // -- Workflows --------------------------------------------------------

    /// Register a workflow after validating its step graph.
    ///
    /// A workflow with the same id is replaced.
    pub async fn add_workflow(&self, workflow: WorkflowDefinition) -> Result<()> {
        workflow.validate()?;
        info!("Added workflow {} ({})", workflow.id, workflow.name);
        self.workflows
            .write()
            .await
            .insert(workflow.id.clone(), workflow);
        Ok(())
    }

    pub async fn remove_workflow(&self, workflow_id: &str) -> Option<WorkflowDefinition> {
        let removed = self.workflows.write().await.remove(workflow_id);
        if removed.is_none() {
            warn!("Cannot remove unknown workflow {}", workflow_id);
        }
        removed
    }

    /// Registered workflows, ordered by id.
    pub async fn get_workflows(&self) -> Vec<WorkflowDefinition> {
        let mut workflows: Vec<WorkflowDefinition> =
            self.workflows.read().await.values().cloned().collect();
        workflows.sort_by(|a, b| a.id.cmp(&b.id));
        workflows
    }

    /// Run a registered workflow with `params` merged into every step.
    ///
    /// # Errors
    ///
    /// `Error::WorkflowNotFound` if no workflow has that id, otherwise
    /// whatever the workflow engine reports.
    pub async fn execute_workflow(&self, workflow_id: &str, params: Value) -> Result<WorkflowRun> {
        let workflow = self
            .workflows
            .read()
            .await
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| Error::WorkflowNotFound(workflow_id.to_string()))?;
        self.engine.execute(&workflow, &params, self).await
    }

    // -- Metrics and supervision ------------------------------------------

    pub async fn get_system_metrics(&self) -> SystemMetrics {
        let mut agents = AgentTotals::default();
        for snapshot in self.agents.read().await.values().map(|a| a.state()) {
            agents.total += 1;
            match snapshot.status {
                AgentStatus::Running => agents.active += 1,
                AgentStatus::Failed => agents.failed += 1,
                _ => {}
            }
        }

        let mut tasks = TaskTotals::default();
        let mut duration_sum = 0u64;
        let mut timed = 0usize;
        for execution in self.executions.read().await.values() {
            tasks.total += 1;
            match execution.status {
                ExecutionStatus::Pending => tasks.pending += 1,
                ExecutionStatus::Running => tasks.running += 1,
                ExecutionStatus::Completed => tasks.completed += 1,
                ExecutionStatus::Failed => tasks.failed += 1,
            }
            if let Some(ms) = execution.duration_ms {
                duration_sum += ms;
                timed += 1;
            }
        }
        let average_execution_time_ms = if timed == 0 {
            0.0
        } else {
            duration_sum as f64 / timed as f64
        };

        let report = self.health.check().await;
        SystemMetrics {
            agents,
            tasks,
            average_execution_time_ms,
            active_tasks: self.scheduler.active_count(),
            system_health: report.system_health,
            resource_utilization: report.resource_utilization,
        }
    }

    /// One supervision pass: restart unhealthy agents that allow it,
    /// recompute node loads and publish a health-check message.
    ///
    /// Returns the ids of the restarted agents.
    pub async fn run_health_check(&self) -> Vec<String> {
        let report = self.health.check().await;
        let targets: Vec<Arc<Agent>> = {
            let agents = self.agents.read().await;
            report
                .agents_needing_restart
                .iter()
                .filter_map(|id| agents.get(id).cloned())
                .collect()
        };

        if !targets.is_empty() {
            info!("Restarting {} unhealthy agents", targets.len());
        }
        join_all(targets.iter().map(|agent| agent.restart())).await;
        let restarted: Vec<String> = targets.iter().map(|a| a.id().to_string()).collect();

        self.update_node_loads().await;
        self.bus.publish(BusMessage::HealthCheck {
            system_health: report.system_health,
            restarted: restarted.clone(),
        });
        restarted
    }

    /// Bring up the bus, health monitor, workflow engine and supervision loop.
    ///
    /// Returns `false` (with a warning) if already started.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut slot = self.supervisor.lock();
        if slot.is_some() {
            warn!("Coordinator already started");
            return false;
        }

        self.bus.start();
        self.health.start();
        self.engine.start();

        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let coordinator = Arc::downgrade(self);
        let period = self.config.health_check_interval();

        tokio::spawn(async move {
            let first = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(first, period);
            loop {
                tokio::select! {
                    _ = cancel_clone.cancelled() => {
                        debug!("Coordinator supervision loop cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        let Some(coordinator) = coordinator.upgrade() else {
                            break;
                        };
                        coordinator.run_health_check().await;
                    }
                }
            }
        });

        *slot = Some(cancel);
        drop(slot);

        info!("Coordinator started");
        self.emit(Event::system(EventKind::CoordinatorStarted, Value::Null));
        true
    }

    /// Tear down the background components and force every agent idle.
    ///
    /// Returns `false` (with a warning) if not started.
    pub async fn stop(&self) -> bool {
        let Some(cancel) = self.supervisor.lock().take() else {
            warn!("Coordinator is not running");
            return false;
        };
        cancel.cancel();
        self.engine.stop();
        self.health.stop();
        self.bus.stop();

        for agent in self.agents.read().await.values() {
            agent.stop();
        }
        self.update_node_loads().await;

        info!("Coordinator stopped");
        self.emit(Event::system(EventKind::CoordinatorStopped, Value::Null));
        true
    }

    fn emit(&self, event: Event) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::build(Config::default())
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if let Some(cancel) = self.supervisor.get_mut().take() {
            cancel.cancel();
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("running", &self.is_running())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

#[async_trait]
impl TaskRunner for Coordinator {
    async fn execute_task(&self, task: TaskDefinition) -> Result<TaskExecution> {
        Coordinator::execute_task(self, task).await
    }
}
