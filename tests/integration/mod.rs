//! Integration test suite for conductor.
//!
//! These tests drive the coordinator end to end through its public API:
//! registration, agent selection, retries, workflows and supervision.
//!
//! # Test Categories
//!
//! - `task_flow`: Single task submission and agent selection
//! - `retry`: Retry ceilings and backoff
//! - `parallel_agents`: Concurrency ceiling and agent reservation
//! - `workflow_e2e`: Workflow registration and execution
//! - `recovery`: Agent self-recovery and coordinator auto-restart
//!
//! Backoff and cooldown timers run on a paused tokio clock, so the suite
//! finishes quickly.

mod fixtures;

mod retry;
mod parallel_agents;
mod recovery;
