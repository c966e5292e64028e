//! Repeating task scheduler on the Tokio runtime

use bridge_traits::background::{CancelHandle, ScheduledTask, TaskScheduler};
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Tokio-based scheduler for desktop.
///
/// Each schedule is a spawned task driven by `tokio::time::interval`. Ticks
/// that fall behind are delayed rather than bunched up. Must be used from
/// within a Tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct TokioScheduler;

impl TokioScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl TaskScheduler for TokioScheduler {
    fn schedule_repeating(&self, interval: Duration, task: ScheduledTask) -> CancelHandle {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        trace!(interval_ms = interval.as_millis() as u64, "Scheduled tick");
                        task().await;
                    }
                }
            }

            trace!("Schedule cancelled");
        });

        CancelHandle::new(move || token.cancel())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_task(counter: Arc<AtomicUsize>) -> ScheduledTask {
        Arc::new(move || {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_full_interval() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let _handle = TokioScheduler::new()
            .schedule_repeating(Duration::from_secs(60), counting_task(ticks.clone()));

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_ticks() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let handle = TokioScheduler::new()
            .schedule_repeating(Duration::from_secs(1), counting_task(ticks.clone()));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);

        handle.cancel();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_cancels() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let handle = TokioScheduler::new()
            .schedule_repeating(Duration::from_secs(1), counting_task(ticks.clone()));
        drop(handle);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }
}
