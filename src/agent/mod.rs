//! Agents: stateful units of work with a lifecycle state machine.
//!
//! The lifecycle wrapper ([`Agent`]) is shared by every agent category;
//! category-specific work plugs in through [`AgentBehavior`].

mod behavior;
mod lifecycle;
mod probe;
mod types;

pub use behavior::{AgentBehavior, DependencyResolver, NoDependencies};
pub use lifecycle::Agent;
pub use probe::{FixedProbe, ResourceProbe, ResourceSample, SimulatedProbe};
pub use types::{
    AgentConfig, AgentHealth, AgentMetrics, AgentSnapshot, AgentStatus, HEALTHY_SUCCESS_RATE,
    UNHEALTHY_ERROR_COUNT,
};
