//! Retry ceiling and backoff tests.
//!
//! A failing agent becomes unhealthy after its first failure and is not
//! selected again, so each test registers one always-failing agent per
//! expected attempt.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use conductor::core::ExecutionStatus;
use conductor::{Error, Priority, TaskDefinition};

use crate::fixtures::{agent, coordinator, echo_agent, AlwaysFail, Flaky};

async fn register_failing(
    c: &conductor::Coordinator,
    count: usize,
) -> Vec<Arc<AlwaysFail>> {
    let mut behaviors = Vec::new();
    for i in 0..count {
        let behavior = Arc::new(AlwaysFail::default());
        c.register_agent(
            agent(&format!("fail-{i}"), Priority::Medium, i as f64, &[], behavior.clone()),
            None,
        )
        .await
        .unwrap();
        behaviors.push(behavior);
    }
    behaviors
}

fn total_calls(behaviors: &[Arc<AlwaysFail>]) -> usize {
    behaviors.iter().map(|b| b.calls.load(Ordering::SeqCst)).sum()
}

/// Test: Critical ceiling
/// Given a critical task and agents that always fail
/// When the task is submitted
/// Then it is retried exactly 5 times before the error surfaces
#[tokio::test(start_paused = true)]
async fn test_critical_task_retried_five_times() {
    let c = coordinator();
    let behaviors = register_failing(&c, 8).await;

    let task = TaskDefinition::new("deploy", "Deploy").with_priority(Priority::Critical);
    let err = c.execute_task(task).await.unwrap_err();

    match &err {
        Error::RetriesExhausted { task, retries, source } => {
            assert_eq!(task, "deploy");
            assert_eq!(*retries, 5);
            assert!(matches!(**source, Error::Execution(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(total_calls(&behaviors), 6);

    let executions = c.get_task_executions().await;
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].retries, 5);
    assert_eq!(executions[0].status, ExecutionStatus::Failed);
    c.stop().await;
}

/// Test: Non-critical ceiling
/// Given high, medium and low tasks with agents that always fail
/// When each task is submitted
/// Then each is retried exactly 3 times
#[tokio::test(start_paused = true)]
async fn test_other_priorities_retried_three_times() {
    for priority in [Priority::High, Priority::Medium, Priority::Low] {
        let c = coordinator();
        let behaviors = register_failing(&c, 8).await;

        let task = TaskDefinition::new("lint", "Lint").with_priority(priority);
        let err = c.execute_task(task).await.unwrap_err();
        assert!(
            matches!(err, Error::RetriesExhausted { retries: 3, .. }),
            "{priority}: {err}"
        );
        assert_eq!(total_calls(&behaviors), 4, "{priority}");
        c.stop().await;
    }
}

/// Test: Linear backoff
/// Given a task that fails three times before succeeding
/// When the task is submitted
/// Then the waits add up to base * (1 + 2 + 3)
#[tokio::test(start_paused = true)]
async fn test_backoff_is_linear() {
    let c = coordinator();
    let behaviors = register_failing(&c, 3).await;
    // Low priority: only picked once every failing agent has dropped out.
    c.register_agent(echo_agent("fallback", Priority::Low, 500.0, &[]), None)
        .await
        .unwrap();

    let started = tokio::time::Instant::now();
    let execution = c
        .execute_task(TaskDefinition::new("t", "t").with_priority(Priority::High))
        .await
        .unwrap();
    assert_eq!(total_calls(&behaviors), 3);
    assert_eq!(execution.retries, 3);
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.agent_id.as_deref(), Some("fallback"));
    assert!(started.elapsed() >= Duration::from_millis(10 * (1 + 2 + 3)));
    c.stop().await;
}

/// Test: Admission failure during retry
/// Given a single agent that fails once
/// When the task is submitted
/// Then the retry finds no healthy agent and the chain ends there
#[tokio::test(start_paused = true)]
async fn test_unhealthy_after_failure_ends_chain() {
    let c = coordinator();
    let flaky = Arc::new(Flaky::new(1));
    c.register_agent(agent("flaky", Priority::High, 1.0, &[], flaky.clone()), None)
        .await
        .unwrap();

    let err = c.execute_task(TaskDefinition::new("t", "t")).await.unwrap_err();
    assert!(matches!(err, Error::NoAgentAvailable { .. }));
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);

    let executions = c.get_task_executions().await;
    assert_eq!(executions[0].retries, 1);
    assert_eq!(executions[0].status, ExecutionStatus::Failed);
    c.stop().await;
}
