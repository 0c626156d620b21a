//! Workflow execution.
//!
//! The engine walks a workflow's step graph in topological order and
//! submits each step through a [`TaskRunner`] (the coordinator). Steps run
//! one at a time; the first step whose execution fails ends the run.

use crate::core::dag::{StepGraph, WorkflowDefinition};
use crate::core::task::{TaskDefinition, TaskExecution};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info};

/// Something that can execute a single task to completion, retries included.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn execute_task(&self, task: TaskDefinition) -> Result<TaskExecution>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Pending => write!(f, "pending"),
            WorkflowStatus::Running => write!(f, "running"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Record of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    /// Executions of the steps that finished, in execution order.
    pub executions: Vec<TaskExecution>,
    /// Step that ended the run, if it failed.
    pub failed_step: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    fn new(workflow_id: &str) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            status: WorkflowStatus::Running,
            executions: Vec::new(),
            failed_step: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    fn finish(&mut self, status: WorkflowStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}

#[derive(Debug, Default)]
pub struct WorkflowEngine {
    running: AtomicBool,
    last_runs: RwLock<HashMap<String, WorkflowRun>>,
}

impl WorkflowEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if already running.
    pub fn start(&self) -> bool {
        !self.running.swap(true, Ordering::SeqCst)
    }

    /// Returns `false` if already stopped.
    pub fn stop(&self) -> bool {
        self.running.swap(false, Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The most recent run of a workflow, successful or not.
    pub fn last_run(&self, workflow_id: &str) -> Option<WorkflowRun> {
        self.last_runs.read().get(workflow_id).cloned()
    }

    /// Run every step of `workflow` through `runner`.
    ///
    /// `params` is merged into each step's config before submission.
    ///
    /// # Errors
    ///
    /// - `Error::WorkflowEngineStopped` if the engine is not running.
    /// - `Error::Validation` if the step graph is malformed.
    /// - `Error::Workflow` wrapping the first step failure.
    pub async fn execute(
        &self,
        workflow: &WorkflowDefinition,
        params: &Value,
        runner: &dyn TaskRunner,
    ) -> Result<WorkflowRun> {
        if !self.is_running() {
            return Err(Error::WorkflowEngineStopped);
        }
        let graph = StepGraph::build(workflow)?;
        let order = graph.execution_order();

        info!(
            "Executing workflow {} ({} steps)",
            workflow.name,
            order.len()
        );
        let mut run = WorkflowRun::new(&workflow.id);

        for step in order {
            let task = TaskDefinition {
                config: merge_params(&step.task.config, params),
                ..step.task.clone()
            };
            debug!("Workflow {}: running step {}", workflow.name, step.id());

            match runner.execute_task(task).await {
                Ok(execution) => run.executions.push(execution),
                Err(e) => {
                    error!("Workflow {} failed at step {}: {}", workflow.name, step.id(), e);
                    run.failed_step = Some(step.id().to_string());
                    run.finish(WorkflowStatus::Failed);
                    self.last_runs.write().insert(workflow.id.clone(), run);
                    return Err(Error::Workflow {
                        workflow: workflow.name.clone(),
                        source: Box::new(e),
                    });
                }
            }
        }

        run.finish(WorkflowStatus::Completed);
        info!("Workflow {} completed", workflow.name);
        self.last_runs.write().insert(workflow.id.clone(), run.clone());
        Ok(run)
    }
}

/// Shallow-merge `params` under a step's own config. Step keys win.
///
/// Non-object configs are left alone; a null config takes `params` as is.
fn merge_params(config: &Value, params: &Value) -> Value {
    match (config, params) {
        (Value::Object(own), Value::Object(shared)) => {
            let mut merged = shared.clone();
            for (k, v) in own {
                merged.insert(k.clone(), v.clone());
            }
            Value::Object(merged)
        }
        (Value::Null, Value::Object(_)) => params.clone(),
        _ => config.clone(),
    }
}
