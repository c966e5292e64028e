//! Background Execution and Task Scheduling
//!
//! Countdown ticks and periodic token refreshes are both "run this every N"
//! jobs. The core never owns a timer directly; it asks a [`TaskScheduler`] and
//! keeps the returned [`CancelHandle`].

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A repeatable unit of scheduled work.
///
/// Called once per tick; each call produces a fresh future.
pub type ScheduledTask = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Cancels a schedule created by [`TaskScheduler::schedule_repeating`].
///
/// Cancelling is idempotent. Dropping the handle cancels the schedule, so
/// replacing a stored handle stops the previous schedule.
pub struct CancelHandle {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl CancelHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// A handle with nothing behind it.
    pub fn noop() -> Self {
        Self {
            cancel: Mutex::new(None),
        }
    }

    pub fn cancel(&self) {
        if let Some(cancel) = self.cancel.lock().take() {
            cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.lock().is_none()
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Repeating task scheduler
///
/// Implementations:
/// - **Desktop**: tokio interval + cancellation token (`bridge-desktop`)
/// - **Tests**: a manual scheduler that fires ticks on demand
///
/// # Contract
///
/// - The first tick fires after one full `interval`, never immediately.
/// - A tick does not start while the previous tick's future is still running.
/// - After [`CancelHandle::cancel`] no new tick starts.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::background::{TaskScheduler, ScheduledTask};
///
/// let task: ScheduledTask = Arc::new(|| Box::pin(async { tracing::info!("tick") }));
/// let handle = scheduler.schedule_repeating(Duration::from_secs(1), task);
/// // ...
/// handle.cancel();
/// ```
pub trait TaskScheduler: Send + Sync {
    fn schedule_repeating(&self, interval: Duration, task: ScheduledTask) -> CancelHandle;
}
