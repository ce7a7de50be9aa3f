use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::Instant;

use super::{FrameDeadline, HandleTable, IdleCallback, IdleHandle, IdleScheduler};

/// Idle scheduling bound to the Tokio runtime itself.
///
/// A request yields once so every task that is already runnable goes first,
/// then invokes the callback with a `frame_budget` deadline. If the yield
/// took longer than the requested timeout the deadline reports
/// `did_timeout() == true`.
#[derive(Debug, Clone)]
pub struct RuntimeIdleScheduler {
    frame_budget: Duration,
    table: HandleTable,
    runtime: Handle,
}

impl RuntimeIdleScheduler {
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(frame_budget: Duration) -> Self {
        Self::with_handle(frame_budget, Handle::current())
    }

    pub fn with_handle(frame_budget: Duration, runtime: Handle) -> Self {
        Self {
            frame_budget,
            table: HandleTable::default(),
            runtime,
        }
    }
}

impl IdleScheduler for RuntimeIdleScheduler {
    fn request_idle_callback(&self, callback: IdleCallback, timeout: Duration) -> IdleHandle {
        let budget = self.frame_budget;
        let table = self.table.clone();
        let runtime = self.runtime.clone();
        let requested = Instant::now();

        self.table.register(move |id| {
            runtime
                .spawn(async move {
                    tokio::task::yield_now().await;
                    if !table.claim(id) {
                        return;
                    }
                    let did_timeout = requested.elapsed() >= timeout;
                    let deadline = FrameDeadline::new(Instant::now(), budget, did_timeout);
                    callback(&deadline);
                })
                .abort_handle()
        })
    }

    fn cancel_idle_callback(&self, handle: IdleHandle) {
        self.table.cancel(handle);
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::oneshot;

    use super::*;
    use crate::idle::IdleDeadline;

    #[tokio::test]
    async fn test_runs_after_ready_tasks() {
        let scheduler = RuntimeIdleScheduler::new(Duration::from_millis(50));
        let (tx, rx) = oneshot::channel();

        scheduler.request_idle_callback(
            Box::new(move |deadline: &dyn IdleDeadline| {
                let _ = tx.send((deadline.did_timeout(), deadline.time_remaining()));
            }),
            Duration::from_secs(5),
        );

        let (did_timeout, remaining) = rx.await.unwrap();
        assert!(!did_timeout);
        assert!(remaining <= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_zero_timeout_reports_did_timeout() {
        let scheduler = RuntimeIdleScheduler::new(Duration::from_millis(50));
        let (tx, rx) = oneshot::channel();

        scheduler.request_idle_callback(
            Box::new(move |deadline: &dyn IdleDeadline| {
                let _ = tx.send(deadline.did_timeout());
            }),
            Duration::ZERO,
        );

        assert!(rx.await.unwrap());
    }
}
