use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

use crate::queue::OutboundQueue;
use crate::quota::QuotaTracker;

/// Mutable relay state shared between the main loop and timer tasks.
#[derive(Debug, Default)]
pub struct RelayState {
    /// Downstream messages waiting for quota.
    pub queue: OutboundQueue,
    /// Credits for unacknowledged in-flight messages.
    pub quota: QuotaTracker,
}

impl RelayState {
    pub fn new(quota: QuotaTracker) -> Self {
        Self {
            queue: OutboundQueue::default(),
            quota,
        }
    }
}

/// Cloneable handle used to queue downstream messages.
///
/// Every access goes through the same mutex as the main loop's drain and
/// quota updates.
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    state: Arc<Mutex<RelayState>>,
}

impl Outbox {
    pub fn new(state: RelayState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Queues `data` for `recipient` and returns the generated message id.
    pub fn send(&self, recipient: impl Into<String>, data: Value) -> String {
        self.lock().queue.enqueue(recipient, data)
    }

    /// Number of queued, not yet transmitted messages.
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn lock(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
