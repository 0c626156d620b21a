//! Logical nodes used for load accounting.

use crate::agent::AgentSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Load above which a node counts as overloaded.
pub const OVERLOAD_THRESHOLD: f64 = 80.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Active,
    Overloaded,
    #[default]
    Inactive,
}

impl NodeStatus {
    pub fn from_load(load: f64) -> Self {
        if load > OVERLOAD_THRESHOLD {
            NodeStatus::Overloaded
        } else if load > 0.0 {
            NodeStatus::Active
        } else {
            NodeStatus::Inactive
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Active => "active",
            NodeStatus::Overloaded => "overloaded",
            NodeStatus::Inactive => "inactive",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub status: NodeStatus,
    /// Percentage of member agents currently running.
    pub load: f64,
    pub capacity: usize,
    /// Member snapshots in registration order.
    pub agents: Vec<AgentSnapshot>,
}

impl Node {
    pub fn new(id: &str, capacity: usize) -> Self {
        Self {
            id: id.to_string(),
            name: format!("Node {}", id),
            status: NodeStatus::Inactive,
            load: 0.0,
            capacity,
            agents: Vec::new(),
        }
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.agents.iter().any(|a| a.id == agent_id)
    }

    pub fn add_agent(&mut self, snapshot: AgentSnapshot) {
        self.agents.push(snapshot);
        self.recompute_load();
    }

    /// Returns whether the agent was a member.
    pub fn remove_agent(&mut self, agent_id: &str) -> bool {
        let before = self.agents.len();
        self.agents.retain(|a| a.id != agent_id);
        let removed = self.agents.len() != before;
        if removed {
            self.recompute_load();
        }
        removed
    }

    /// Replace member snapshots with fresher ones, matched by id.
    ///
    /// Members without a fresh snapshot keep their old one.
    pub fn refresh<'a, I>(&mut self, fresh: I)
    where
        I: IntoIterator<Item = &'a AgentSnapshot>,
    {
        for snapshot in fresh {
            if let Some(slot) = self.agents.iter_mut().find(|a| a.id == snapshot.id) {
                *slot = snapshot.clone();
            }
        }
        self.recompute_load();
    }

    pub fn running_agents(&self) -> usize {
        self.agents.iter().filter(|a| a.is_running()).count()
    }

    /// `load = running / total * 100`; an empty node has load 0.
    pub fn recompute_load(&mut self) {
        let total = self.agents.len();
        self.load = if total == 0 {
            0.0
        } else {
            self.running_agents() as f64 / total as f64 * 100.0
        };
        self.status = NodeStatus::from_load(self.load);
    }
}
