//! Parallel execution tests.
//!
//! Verify the scheduler ceiling across many submissions and that two
//! concurrent submissions never share an agent.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use conductor::core::ExecutionStatus;
use conductor::{Config, Error, Priority, TaskDefinition};

use crate::fixtures::{agent, coordinator, coordinator_with, Slow};

/// Test: Concurrency ceiling
/// Given a ceiling of 2 and four slow agents
/// When four tasks are submitted at once
/// Then at most two run at any moment and all complete
#[tokio::test(start_paused = true)]
async fn test_scheduler_ceiling_bounds_running_tasks() {
    let c = coordinator_with(Config {
        max_concurrent_tasks: 2,
        ..Default::default()
    });
    let slow = Arc::new(Slow::new(Duration::from_millis(100)));
    for i in 0..4 {
        c.register_agent(
            agent(&format!("w{i}"), Priority::Medium, i as f64, &[], slow.clone()),
            None,
        )
        .await
        .unwrap();
    }

    let tasks = (0..4).map(|i| {
        let c = Arc::clone(&c);
        tokio::spawn(async move {
            c.execute_task(TaskDefinition::new(&format!("t{i}"), "t")).await
        })
    });
    let results = join_all(tasks).await;

    for result in results {
        assert_eq!(result.unwrap().unwrap().status, ExecutionStatus::Completed);
    }
    assert_eq!(slow.peak.load(Ordering::SeqCst), 2);
    assert_eq!(c.scheduler().active_count(), 0);
    c.stop().await;
}

/// Test: No double binding
/// Given three idle agents
/// When three tasks are submitted concurrently
/// Then each task lands on a different agent
#[tokio::test(start_paused = true)]
async fn test_concurrent_submissions_use_distinct_agents() {
    let c = coordinator();
    let slow = Arc::new(Slow::new(Duration::from_millis(50)));
    for i in 0..3 {
        c.register_agent(
            agent(&format!("w{i}"), Priority::High, 10.0, &["build"], slow.clone()),
            None,
        )
        .await
        .unwrap();
    }

    let tasks = (0..3).map(|i| {
        let c = Arc::clone(&c);
        tokio::spawn(async move {
            let task = TaskDefinition::new(&format!("t{i}"), "t").with_capabilities(["build"]);
            c.execute_task(task).await
        })
    });
    let agents: HashSet<String> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap().agent_id.unwrap())
        .collect();

    assert_eq!(agents.len(), 3);
    assert_eq!(slow.peak.load(Ordering::SeqCst), 3);
    c.stop().await;
}

/// Test: Busy agents are not eligible
/// Given a single agent already running a task
/// When a second task is submitted
/// Then it fails with NoAgentAvailable instead of waiting
#[tokio::test(start_paused = true)]
async fn test_running_agent_is_not_selected() {
    let c = coordinator();
    let slow = Arc::new(Slow::new(Duration::from_millis(100)));
    c.register_agent(agent("only", Priority::High, 1.0, &[], slow), None)
        .await
        .unwrap();

    let first = {
        let c = Arc::clone(&c);
        tokio::spawn(async move { c.execute_task(TaskDefinition::new("first", "t")).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let metrics = c.get_system_metrics().await;
    assert_eq!(metrics.agents.active, 1);
    assert_eq!(metrics.active_tasks, 1);
    assert_eq!(metrics.tasks.running, 1);

    let err = c
        .execute_task(TaskDefinition::new("second", "t"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoAgentAvailable { .. }));

    assert_eq!(
        first.await.unwrap().unwrap().status,
        ExecutionStatus::Completed
    );
    c.stop().await;
}

/// Test: System metrics
/// Given a mix of completed and rejected submissions
/// When metrics are read
/// Then task totals and the average duration reflect the records
#[tokio::test]
async fn test_system_metrics_aggregate_executions() {
    let c = coordinator();
    c.register_agent(
        agent("a", Priority::High, 40.0, &["api"], Arc::new(crate::fixtures::Echo)),
        None,
    )
    .await
    .unwrap();
    c.register_agent(
        agent("b", Priority::High, 60.0, &["web"], Arc::new(crate::fixtures::Echo)),
        None,
    )
    .await
    .unwrap();

    c.execute_task(TaskDefinition::new("t1", "t").with_capabilities(["api"]))
        .await
        .unwrap();
    c.execute_task(TaskDefinition::new("t2", "t").with_capabilities(["web"]))
        .await
        .unwrap();
    let _ = c
        .execute_task(TaskDefinition::new("t3", "t").with_capabilities(["gpu"]))
        .await;

    let metrics = c.get_system_metrics().await;
    assert_eq!(metrics.agents.total, 2);
    assert_eq!(metrics.agents.active, 0);
    assert_eq!(metrics.agents.failed, 0);
    assert_eq!(metrics.tasks.total, 3);
    assert_eq!(metrics.tasks.completed, 2);
    assert_eq!(metrics.tasks.pending, 1);
    assert!(metrics.average_execution_time_ms >= 0.0);
    assert_eq!(metrics.system_health, 100.0);
    assert_eq!(metrics.resource_utilization.memory, 50.0);
    assert_eq!(metrics.resource_utilization.cpu, 10.0);
    c.stop().await;
}
