//! Agent self-recovery and coordinator auto-restart tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use conductor::agent::{Agent, AgentBehavior, AgentConfig, AgentStatus};
use conductor::core::EventKind;
use conductor::orchestration::{SystemStatus, TOPIC_HEALTH_CHECK};
use conductor::{Config, Error, Priority, Result};

use crate::fixtures::{coordinator_with, echo_agent, quick_config, AlwaysFail};

/// Succeeds or fails depending on a switch.
#[derive(Default)]
struct Switch {
    failing: AtomicBool,
}

#[async_trait]
impl AgentBehavior for Switch {
    async fn execute(&self, _params: &Value) -> Result<Value> {
        if self.failing.load(Ordering::SeqCst) {
            Err(Error::execution("switched off"))
        } else {
            Ok(Value::Null)
        }
    }
}

/// Test: Self-recovery gate
/// Given an agent with max_retries=3 and auto_restart whose execute always fails
/// When it is run three times
/// Then the first two failures pass through recovering back to idle
/// And the third leaves it failed and unhealthy
#[tokio::test(start_paused = true)]
async fn test_agent_recovers_until_max_retries() {
    let config = AgentConfig {
        max_retries: 3,
        auto_restart: true,
        recovery_cooldown_ms: 5_000,
        ..Default::default()
    };
    let agent = Agent::new("flaky", "Flaky", "check", Priority::High, Arc::new(AlwaysFail::default()))
        .with_config(config);
    let mut events = agent.subscribe();

    for _ in 0..2 {
        let started = tokio::time::Instant::now();
        assert!(agent.run(&Value::Null).await.is_err());
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(agent.status(), AgentStatus::Idle);
    }
    assert!(agent.run(&Value::Null).await.is_err());
    assert_eq!(agent.status(), AgentStatus::Failed);

    let state = agent.state();
    assert_eq!(state.metrics.total_executions, 3);
    assert_eq!(state.metrics.failed_executions, 3);
    assert_eq!(state.health.error_count, 3);
    assert!(!state.health.is_healthy);

    let mut recoveries = 0;
    while let Ok(event) = events.try_recv() {
        if event.kind == EventKind::RecoveryAttempted {
            recoveries += 1;
        }
    }
    assert_eq!(recoveries, 2);
}

/// Test: Error-count threshold
/// Given an agent with a high success rate
/// When its error count reaches 5
/// Then it turns unhealthy even though the success rate stays above 80
#[tokio::test(start_paused = true)]
async fn test_error_count_threshold_flips_health() {
    let switch = Arc::new(Switch::default());
    let agent = Agent::new("a", "a", "check", Priority::Medium, switch.clone()).with_config(
        AgentConfig {
            max_retries: 100,
            ..quick_config()
        },
    );

    for _ in 0..30 {
        agent.run(&Value::Null).await.unwrap();
    }
    switch.failing.store(true, Ordering::SeqCst);
    for expected_errors in 1..=5u32 {
        let _ = agent.run(&Value::Null).await;
        let health = agent.state().health;
        assert_eq!(health.error_count, expected_errors);
        assert!(health.success_rate > 80.0);
        // Health is exactly the two-threshold rule after every run.
        assert_eq!(health.is_healthy, expected_errors < 5);
    }
}

/// Test: Coordinator auto-restart
/// Given a started coordinator and an unhealthy agent with auto_restart
/// When the supervision interval elapses
/// Then the agent is restarted and a health-check message is published
#[tokio::test(start_paused = true)]
async fn test_supervision_loop_restarts_unhealthy_agents() {
    let c = coordinator_with(Config {
        health_check_interval_ms: 1_000,
        ..Default::default()
    });
    let restarted = Arc::new(parking_lot::Mutex::new(Vec::new()));
    {
        let restarted = Arc::clone(&restarted);
        c.bus()
            .subscribe(TOPIC_HEALTH_CHECK, move |msg| {
                if let conductor::orchestration::BusMessage::HealthCheck { restarted: ids, .. } = msg {
                    restarted.lock().extend(ids.iter().cloned());
                }
            })
            .unwrap();
    }

    let broken = Arc::new(
        Agent::new("broken", "broken", "check", Priority::Low, Arc::new(AlwaysFail::default()))
            .with_config(AgentConfig {
                max_retries: 1,
                ..quick_config()
            }),
    );
    c.register_agent(Arc::clone(&broken), None).await.unwrap();
    c.register_agent(echo_agent("fine", Priority::Low, 1.0, &[]), None)
        .await
        .unwrap();

    let _ = broken.run(&Value::Null).await;
    assert_eq!(broken.status(), AgentStatus::Failed);

    let report = c.health_monitor().check().await;
    assert_eq!(report.status, SystemStatus::Degraded);
    assert_eq!(report.agents_needing_restart, vec!["broken".to_string()]);

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(broken.status(), AgentStatus::Idle);
    assert!(restarted.lock().contains(&"broken".to_string()));
    c.stop().await;
}

/// Test: No auto-restart
/// Given an unhealthy agent with auto_restart disabled
/// When a health check runs
/// Then it is left alone
#[tokio::test(start_paused = true)]
async fn test_agents_without_auto_restart_are_left_failed() {
    let c = coordinator_with(Config::default());
    let stubborn = Arc::new(
        Agent::new("stubborn", "stubborn", "check", Priority::Low, Arc::new(AlwaysFail::default()))
            .with_config(AgentConfig {
                auto_restart: false,
                ..quick_config()
            }),
    );
    c.register_agent(Arc::clone(&stubborn), None).await.unwrap();
    let _ = stubborn.run(&Value::Null).await;

    assert!(c.run_health_check().await.is_empty());
    assert_eq!(stubborn.status(), AgentStatus::Failed);
    c.stop().await;
}

/// Test: Stop forces agents idle
/// Given an agent left failed
/// When the coordinator stops
/// Then every agent is idle
#[tokio::test(start_paused = true)]
async fn test_stop_forces_agents_idle() {
    let c = coordinator_with(Config::default());
    let broken = Arc::new(
        Agent::new("broken", "broken", "check", Priority::Low, Arc::new(AlwaysFail::default()))
            .with_config(AgentConfig {
                auto_restart: false,
                ..quick_config()
            }),
    );
    c.register_agent(Arc::clone(&broken), None).await.unwrap();
    let _ = broken.run(&Value::Null).await;
    assert_eq!(broken.status(), AgentStatus::Failed);

    assert!(c.stop().await);
    assert!(c
        .get_agents_status()
        .await
        .iter()
        .all(|a| a.status == AgentStatus::Idle));
}
