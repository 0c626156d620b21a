//! Test fixtures for integration tests.
//!
//! Provides:
//! - Agent behaviours (echo, always-fail, flaky, slow)
//! - Agent and coordinator builders with short timers

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use conductor::agent::{Agent, AgentBehavior, AgentConfig, FixedProbe};
use conductor::{Config, Coordinator, Error, Priority, Result};

/// Returns its input.
pub struct Echo;

#[async_trait]
impl AgentBehavior for Echo {
    async fn execute(&self, params: &Value) -> Result<Value> {
        Ok(params.clone())
    }
}

/// Always fails, counting attempts.
#[derive(Default)]
pub struct AlwaysFail {
    pub calls: AtomicUsize,
}

#[async_trait]
impl AgentBehavior for AlwaysFail {
    async fn execute(&self, _params: &Value) -> Result<Value> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Err(Error::execution(format!("attempt {} failed", n)))
    }
}

/// Fails the first `failures` calls, then succeeds.
pub struct Flaky {
    pub failures: usize,
    pub calls: AtomicUsize,
}

impl Flaky {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AgentBehavior for Flaky {
    async fn execute(&self, _params: &Value) -> Result<Value> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            Err(Error::execution("transient"))
        } else {
            Ok(json!({ "attempt": n + 1 }))
        }
    }
}

/// Sleeps before echoing; tracks how many calls overlap.
pub struct Slow {
    pub delay: Duration,
    pub in_flight: AtomicUsize,
    pub peak: AtomicUsize,
}

impl Slow {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl AgentBehavior for Slow {
    async fn execute(&self, params: &Value) -> Result<Value> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(params.clone())
    }
}

/// Agent config with no cooldown or restart delay.
pub fn quick_config() -> AgentConfig {
    AgentConfig {
        recovery_cooldown_ms: 0,
        restart_delay_ms: 0,
        ..Default::default()
    }
}

/// Build an agent with fixed resource figures.
pub fn agent(
    id: &str,
    priority: Priority,
    memory: f64,
    capabilities: &[&str],
    behavior: Arc<dyn AgentBehavior>,
) -> Arc<Agent> {
    Arc::new(
        Agent::new(id, id, "check", priority, behavior)
            .with_capabilities(capabilities.iter().copied())
            .with_config(quick_config())
            .with_probe(Arc::new(FixedProbe::new(memory, 10.0))),
    )
}

pub fn echo_agent(id: &str, priority: Priority, memory: f64, capabilities: &[&str]) -> Arc<Agent> {
    agent(id, priority, memory, capabilities, Arc::new(Echo))
}

/// A started coordinator with a 10ms retry unit.
pub fn coordinator() -> Arc<Coordinator> {
    coordinator_with(Config {
        retry_base_delay_ms: 10,
        ..Default::default()
    })
}

pub fn coordinator_with(config: Config) -> Arc<Coordinator> {
    let coordinator = Arc::new(Coordinator::new(config).unwrap());
    coordinator.start();
    coordinator
}
