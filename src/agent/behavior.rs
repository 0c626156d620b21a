//! Seams between the lifecycle wrapper and category-specific agents.

use crate::core::task::TaskDefinition;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Category-specific work performed by an agent.
///
/// The lifecycle wrapper ([`crate::agent::Agent`]) owns state, metrics and
/// events; implementors only supply the check or transform itself.
#[async_trait]
pub trait AgentBehavior: Send + Sync {
    /// Run the work for one task and return an opaque result.
    async fn execute(&self, params: &Value) -> Result<Value>;

    /// Additional veto on top of the capability match. Accepts everything by default.
    fn can_execute(&self, _task: &TaskDefinition) -> bool {
        true
    }

    /// Implementation-specific description merged into `Agent::info`.
    fn info(&self) -> Map<String, Value> {
        Map::new()
    }
}

/// Decides whether an agent's declared dependencies can be met right now.
#[async_trait]
pub trait DependencyResolver: Send + Sync {
    /// Return `Err(Error::DependencyUnsatisfied { .. })` for the first dependency that cannot be met.
    async fn check(&self, agent_id: &str, dependencies: &BTreeSet<String>) -> Result<()>;
}

/// Resolver used before an agent joins a coordinator.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDependencies;

#[async_trait]
impl DependencyResolver for NoDependencies {
    async fn check(&self, _agent_id: &str, _dependencies: &BTreeSet<String>) -> Result<()> {
        Ok(())
    }
}
