//! Core domain models for the orchestration engine.
//!
//! This module contains the data structures shared by agents, the
//! coordinator and the workflow engine: task definitions and execution
//! records, lifecycle events, and the workflow step graph.

pub mod dag;
pub mod event;
pub mod task;

pub use dag::{StepGraph, WorkflowDefinition, WorkflowStep};
pub use event::{Event, EventKind, Severity};
pub use task::{ExecutionId, ExecutionStatus, Priority, TaskDefinition, TaskExecution};
