pub mod agent;
pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;

pub use agent::{Agent, AgentBehavior, AgentConfig, AgentStatus};
pub use config::Config;
pub use crate::core::{Priority, TaskDefinition, TaskExecution, WorkflowDefinition, WorkflowStep};
pub use error::{Error, Result};
pub use orchestration::{Coordinator, MessageBus, TaskScheduler, WorkflowEngine};
