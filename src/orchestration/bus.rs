//! In-process message bus.
//!
//! Named topics with synchronous delivery: every handler subscribed to a
//! topic runs inside the `publish` call, in subscription order. The bus
//! decouples coordinator-internal notifications (task assignment,
//! completion, health checks) from whoever wants to react to them.

use crate::config::DEFAULT_MAX_SUBSCRIBERS;
use crate::core::task::{ExecutionId, ExecutionStatus};
use crate::error::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

pub const TOPIC_TASK_ASSIGNMENT: &str = "task_assignment";
pub const TOPIC_TASK_COMPLETION: &str = "task_completion";
pub const TOPIC_HEALTH_CHECK: &str = "health_check";

/// Messages carried by the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum BusMessage {
    TaskAssignment {
        execution_id: ExecutionId,
        task_id: String,
        agent_id: String,
    },
    TaskCompletion {
        execution_id: ExecutionId,
        task_id: String,
        agent_id: Option<String>,
        status: ExecutionStatus,
        duration_ms: Option<u64>,
        error: Option<String>,
    },
    HealthCheck {
        system_health: f64,
        restarted: Vec<String>,
    },
    Custom {
        topic: String,
        payload: serde_json::Value,
    },
}

impl BusMessage {
    pub fn topic(&self) -> &str {
        match self {
            BusMessage::TaskAssignment { .. } => TOPIC_TASK_ASSIGNMENT,
            BusMessage::TaskCompletion { .. } => TOPIC_TASK_COMPLETION,
            BusMessage::HealthCheck { .. } => TOPIC_HEALTH_CHECK,
            BusMessage::Custom { topic, .. } => topic,
        }
    }
}

/// Handle returned by [`MessageBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&BusMessage) + Send + Sync>;

pub struct MessageBus {
    topics: RwLock<HashMap<String, Vec<(SubscriptionId, Handler)>>>,
    max_subscribers: usize,
    next_id: AtomicU64,
    running: AtomicBool,
}

impl MessageBus {
    pub fn new(max_subscribers: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            max_subscribers,
            next_id: AtomicU64::new(1),
            running: AtomicBool::new(false),
        }
    }

    /// Accept publications from now on. Returns `false` if already running.
    pub fn start(&self) -> bool {
        !self.running.swap(true, Ordering::SeqCst)
    }

    /// Drop publications from now on. Subscriptions are kept.
    pub fn stop(&self) -> bool {
        self.running.swap(false, Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Register a handler for a topic.
    ///
    /// # Errors
    /// Returns `Error::SubscriberLimit` if the topic already has the
    /// maximum number of subscribers.
    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Result<SubscriptionId>
    where
        F: Fn(&BusMessage) + Send + Sync + 'static,
    {
        let mut topics = self.topics.write();
        let subscribers = topics.entry(topic.to_string()).or_default();
        if subscribers.len() >= self.max_subscribers {
            return Err(Error::SubscriberLimit {
                topic: topic.to_string(),
                max: self.max_subscribers,
            });
        }
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        subscribers.push((id, Arc::new(handler)));
        debug!("Bus: subscribed {:?} to {}", id, topic);
        Ok(id)
    }

    /// Returns whether the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut topics = self.topics.write();
        for subscribers in topics.values_mut() {
            if let Some(pos) = subscribers.iter().position(|(sid, _)| *sid == id) {
                subscribers.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.read().get(topic).map(Vec::len).unwrap_or(0)
    }

    /// Deliver a message to every subscriber of its topic.
    ///
    /// Returns the number of handlers invoked; 0 while the bus is stopped.
    pub fn publish(&self, message: BusMessage) -> usize {
        if !self.is_running() {
            trace!("Bus stopped, dropping {} message", message.topic());
            return 0;
        }
        // Snapshot the handlers so they may themselves publish or subscribe.
        let handlers: Vec<Handler> = self
            .topics
            .read()
            .get(message.topic())
            .map(|subs| subs.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        for handler in &handlers {
            handler(&message);
        }
        trace!(
            "Bus: delivered {} message to {} subscribers",
            message.topic(),
            handlers.len()
        );
        handlers.len()
    }

    /// Remove every subscription.
    pub fn clear(&self) {
        self.topics.write().clear();
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SUBSCRIBERS)
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("topics", &self.topics.read().len())
            .field("running", &self.is_running())
            .finish()
    }
}
