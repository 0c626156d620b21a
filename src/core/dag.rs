//! Workflow definitions and their step dependency graph.
//!
//! A [`WorkflowDefinition`] is an ordered list of steps, each wrapping a
//! [`TaskDefinition`] and naming the steps it depends on. [`StepGraph`]
//! turns that list into a petgraph `DiGraph`, rejects malformed graphs,
//! and yields a stable execution order.

use crate::core::task::TaskDefinition;
use crate::error::{Error, Result};
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// One step of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub task: TaskDefinition,
    /// Task ids of steps that must complete before this one starts.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl WorkflowStep {
    pub fn new(task: TaskDefinition) -> Self {
        Self {
            task,
            depends_on: Vec::new(),
        }
    }

    pub fn after<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn id(&self) -> &str {
        &self.task.id
    }
}

/// A named collection of steps executed as a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowDefinition {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            steps: Vec::new(),
        }
    }

    /// Append a step.
    pub fn step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Append a list of tasks that run strictly one after another.
    pub fn sequence(mut self, tasks: Vec<TaskDefinition>) -> Self {
        for task in tasks {
            let step = match self.steps.last() {
                Some(prev) => WorkflowStep::new(task).after([prev.id().to_string()]),
                None => WorkflowStep::new(task),
            };
            self.steps.push(step);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        StepGraph::build(self).map(|_| ())
    }
}

/// Dependency graph over the steps of one workflow.
///
/// Nodes carry the step's position in the definition; an edge `a -> b`
/// means step `a` must finish before step `b`.
pub struct StepGraph<'a> {
    definition: &'a WorkflowDefinition,
    graph: DiGraph<usize, ()>,
    step_index: HashMap<&'a str, NodeIndex>,
}

impl<'a> StepGraph<'a> {
    /// Build and validate the graph.
    ///
    /// # Errors
    /// Returns `Error::Validation` if a step id is duplicated, a dependency
    /// names an unknown step, or the dependencies form a cycle.
    pub fn build(definition: &'a WorkflowDefinition) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut step_index = HashMap::new();

        for (position, step) in definition.steps.iter().enumerate() {
            if step_index.contains_key(step.id()) {
                return Err(Error::Validation(format!(
                    "Workflow {} has duplicate step {}",
                    definition.id,
                    step.id()
                )));
            }
            let node = graph.add_node(position);
            step_index.insert(step.id(), node);
        }

        for step in &definition.steps {
            let to = step_index[step.id()];
            for dep in &step.depends_on {
                let from = step_index.get(dep.as_str()).ok_or_else(|| {
                    Error::Validation(format!(
                        "Step {} depends on unknown step {}",
                        step.id(),
                        dep
                    ))
                })?;
                graph.add_edge(*from, to, ());
            }
        }

        if is_cyclic_directed(&graph) {
            return Err(Error::Validation(format!(
                "Workflow {} contains a dependency cycle",
                definition.id
            )));
        }

        Ok(Self {
            definition,
            graph,
            step_index,
        })
    }

    pub fn step_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Steps that `id` directly depends on.
    pub fn dependencies_of(&self, id: &str) -> Vec<&'a WorkflowStep> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Steps that directly depend on `id`.
    pub fn dependents_of(&self, id: &str) -> Vec<&'a WorkflowStep> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<&'a WorkflowStep> {
        let steps = &self.definition.steps;
        match self.step_index.get(id) {
            Some(&index) => {
                let mut found: Vec<usize> = self
                    .graph
                    .neighbors_directed(index, direction)
                    .map(|n| self.graph[n])
                    .collect();
                found.sort_unstable();
                found.into_iter().map(|p| &steps[p]).collect()
            }
            None => Vec::new(),
        }
    }

    /// Topological order; among steps that are ready at the same time the
    /// one declared first runs first.
    pub fn execution_order(&self) -> Vec<&'a WorkflowStep> {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|n| {
                (
                    n,
                    self.graph.neighbors_directed(n, Direction::Incoming).count(),
                )
            })
            .collect();

        let mut ready: BinaryHeap<Reverse<(usize, NodeIndex)>> = in_degree
            .iter()
            .filter(|&(_, &deg)| deg == 0)
            .map(|(&n, _)| Reverse((self.graph[n], n)))
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse((position, node))) = ready.pop() {
            order.push(&self.definition.steps[position]);
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if let Some(deg) = in_degree.get_mut(&next) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.push(Reverse((self.graph[next], next)));
                    }
                }
            }
        }
        order
    }
}

impl std::fmt::Debug for StepGraph<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepGraph")
            .field("workflow", &self.definition.id)
            .field("steps", &self.step_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}
