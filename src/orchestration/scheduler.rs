//! Admission control for task executions.
//!
//! The `TaskScheduler` is a counting semaphore around task admission: at
//! most `max_concurrent` executions hold a slot at once, and further
//! requests wait until a slot frees up. Waiters are not ordered by
//! priority; agent selection happens after admission.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

use crate::config::DEFAULT_MAX_CONCURRENT_TASKS;
use crate::error::{Error, Result};

/// A held execution slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct SchedulerPermit {
    _permit: OwnedSemaphorePermit,
    active: Arc<AtomicUsize>,
}

impl Drop for SchedulerPermit {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct TaskScheduler {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    active: Arc<AtomicUsize>,
    waiting: Arc<AtomicUsize>,
}

impl TaskScheduler {
    /// Create a scheduler with the given ceiling (at least 1).
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            active: Arc::new(AtomicUsize::new(0)),
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<SchedulerPermit> {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let permit = Arc::clone(&self.semaphore).acquire_owned().await;
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        let permit = permit.map_err(|_| Error::SchedulerClosed)?;
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        trace!("Scheduler: slot acquired ({}/{})", active, self.max_concurrent);
        Ok(SchedulerPermit {
            _permit: permit,
            active: Arc::clone(&self.active),
        })
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<SchedulerPermit> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        self.active.fetch_add(1, Ordering::SeqCst);
        Some(SchedulerPermit {
            _permit: permit,
            active: Arc::clone(&self.active),
        })
    }

    /// Number of executions currently holding a slot.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Number of callers blocked in `acquire`.
    pub fn waiting_count(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn has_capacity(&self) -> bool {
        self.available_slots() > 0
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_TASKS)
    }
}
