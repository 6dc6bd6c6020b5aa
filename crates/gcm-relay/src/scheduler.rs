use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;

/// Runs one-shot delayed actions on a tokio runtime.
///
/// Actions never block the caller; they fire on the runtime's worker
/// threads once their delay elapses.
#[derive(Debug, Clone)]
pub struct DelayScheduler {
    handle: Handle,
}

/// Handle to a scheduled action.
///
/// Dropping the handle does not cancel the action.
#[derive(Debug)]
pub struct ScheduledTask {
    abort: AbortHandle,
}

impl ScheduledTask {
    /// Cancels the action if it has not fired yet.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    /// Whether the action has fired or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

impl DelayScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Scheduler bound to the runtime the caller is running on.
    ///
    /// Panics outside a tokio runtime, like `Handle::current`.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    pub fn schedule<F>(&self, delay: Duration, action: F) -> ScheduledTask
    where
        F: FnOnce() + Send + 'static,
    {
        let task = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            action();
        });
        ScheduledTask {
            abort: task.abort_handle(),
        }
    }
}
