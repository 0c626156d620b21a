//! Orchestration layer.
//!
//! Everything that sits above a single agent: the message bus, admission
//! control, health aggregation, node accounting, workflow execution and
//! the coordinator that composes them.

mod bus;
mod coordinator;
mod health;
mod node;
mod scheduler;
mod workflow;

pub use bus::{
    BusMessage, MessageBus, SubscriptionId, TOPIC_HEALTH_CHECK, TOPIC_TASK_ASSIGNMENT,
    TOPIC_TASK_COMPLETION,
};
pub use coordinator::{AgentTotals, Coordinator, SystemMetrics, TaskTotals};
pub use health::{AgentRegistry, HealthMonitor, HealthReport, ResourceUtilization, SystemStatus};
pub use node::{Node, NodeStatus, OVERLOAD_THRESHOLD};
pub use scheduler::{SchedulerPermit, TaskScheduler};
pub use workflow::{TaskRunner, WorkflowEngine, WorkflowRun, WorkflowStatus};
