//! Cancellable scheduled tasks.
//!
//! Billing ticks, reconnection retries, and the startup deadline are each
//! one scheduled task per session, parented to the session's cancellation
//! token. A task delivers its message into the session actor's mailbox, so
//! the timing decision and the state mutation stay on one serialized path.
//!
//! Dropping a `ScheduledTask` cancels it: a timer cannot outlive the state
//! it was scheduled against.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Handle to a single cancellable scheduled task.
#[derive(Debug)]
pub struct ScheduledTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Fire `message` once after `delay`, unless cancelled first.
    pub fn once<T: Send + 'static>(
        delay: Duration,
        tx: mpsc::Sender<T>,
        message: T,
        parent: &CancellationToken,
    ) -> Self {
        let token = parent.child_token();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                () = task_token.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = tx.send(message).await;
                }
            }
        });

        Self { token, handle }
    }

    /// Fire `make()` every `period` (first fire one full period from now)
    /// until cancelled or the receiver is gone.
    pub fn interval<T, F>(
        period: Duration,
        tx: mpsc::Sender<T>,
        make: F,
        parent: &CancellationToken,
    ) -> Self
    where
        T: Send + 'static,
        F: Fn() -> T + Send + 'static,
    {
        let token = parent.child_token();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        if tx.send(make()).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Self { token, handle }
    }

    /// Cancel the task. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the task has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether the underlying tokio task has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_once_fires_after_delay() {
        let (tx, mut rx) = mpsc::channel(4);
        let parent = CancellationToken::new();
        let _task = ScheduledTask::once(Duration::from_secs(5), tx, 42u32, &parent);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(rx.recv().await, Some(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_once_cancelled_never_fires() {
        let (tx, mut rx) = mpsc::channel::<u32>(4);
        let parent = CancellationToken::new();
        let task = ScheduledTask::once(Duration::from_secs(5), tx, 42u32, &parent);

        task.cancel();
        tokio::time::advance(Duration::from_secs(10)).await;
        // Sender dropped without sending.
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_fires_each_period() {
        let (tx, mut rx) = mpsc::channel(16);
        let parent = CancellationToken::new();
        let _task = ScheduledTask::interval(Duration::from_secs(60), tx, || 1u32, &parent);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(rx.recv().await, Some(1));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(rx.recv().await, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancellation_propagates() {
        let (tx, mut rx) = mpsc::channel::<u32>(4);
        let parent = CancellationToken::new();
        let _task = ScheduledTask::interval(Duration::from_secs(1), tx, || 1u32, &parent);

        parent.cancel();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let (tx, mut rx) = mpsc::channel::<u32>(4);
        let parent = CancellationToken::new();
        let task = ScheduledTask::once(Duration::from_secs(1), tx, 7u32, &parent);

        drop(task);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(rx.recv().await, None);
    }
}
