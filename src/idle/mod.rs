//! "Run when idle" scheduling.
//!
//! The bridge never flushes inline. It asks an [`IdleScheduler`] for a
//! callback and receives an [`IdleDeadline`] describing how much of the
//! current slice it may spend. Two schedulers ship with the crate:
//!
//! - [`RuntimeIdleScheduler`]: runs the callback at the async runtime's next
//!   idle point (after every task that is already ready has had its turn).
//! - [`TimerIdleScheduler`]: timer-driven approximation whose delay backs off
//!   with the measured cost of the previous callback.

mod runtime;
mod timer;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::Instant;

pub use runtime::RuntimeIdleScheduler;
pub use timer::TimerIdleScheduler;

/// Budget for one idle slice.
pub trait IdleDeadline {
    /// Time left in the slice. Re-sampled on every call.
    fn time_remaining(&self) -> Duration;

    /// True when the callback runs because its timeout elapsed rather than
    /// because the host went idle.
    fn did_timeout(&self) -> bool;
}

pub type IdleCallback = Box<dyn FnOnce(&dyn IdleDeadline) + Send + 'static>;

/// Token returned by `request_idle_callback`, used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdleHandle(u64);

impl IdleHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

pub trait IdleScheduler: Send + Sync {
    /// Run `callback` once the host is idle, or after `timeout` at the latest
    /// (schedulers that cannot observe idleness may ignore the timeout).
    ///
    /// Must not invoke `callback` before returning: the bridge holds its
    /// state lock while requesting.
    fn request_idle_callback(&self, callback: IdleCallback, timeout: Duration) -> IdleHandle;

    /// Cancel a request that has not started running. Unknown or already
    /// fired handles are ignored.
    fn cancel_idle_callback(&self, handle: IdleHandle);
}

/// Deadline measured against a fixed start instant.
#[derive(Debug, Clone, Copy)]
pub struct FrameDeadline {
    ends_at: Instant,
    did_timeout: bool,
}

impl FrameDeadline {
    pub fn new(started_at: Instant, budget: Duration, did_timeout: bool) -> Self {
        Self {
            ends_at: started_at + budget,
            did_timeout,
        }
    }
}

impl IdleDeadline for FrameDeadline {
    fn time_remaining(&self) -> Duration {
        self.ends_at.saturating_duration_since(Instant::now())
    }

    fn did_timeout(&self) -> bool {
        self.did_timeout
    }
}

/// Outstanding spawned callbacks, keyed by handle.
#[derive(Debug, Default, Clone)]
struct HandleTable {
    next_id: Arc<AtomicU64>,
    tasks: Arc<Mutex<HashMap<u64, AbortHandle>>>,
}

impl HandleTable {
    /// Register the task produced by `spawn` under a fresh handle.
    ///
    /// The table stays locked across `spawn`, so a task can never try to
    /// claim its entry before it has been inserted.
    fn register(&self, spawn: impl FnOnce(u64) -> AbortHandle) -> IdleHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut tasks = self.tasks.lock().expect("idle handle table mutex poisoned");
        let abort = spawn(id);
        tasks.insert(id, abort);
        IdleHandle(id)
    }

    /// Called by the task right before it runs its callback. Returns false if
    /// the request was cancelled in the meantime.
    fn claim(&self, id: u64) -> bool {
        self.tasks
            .lock()
            .expect("idle handle table mutex poisoned")
            .remove(&id)
            .is_some()
    }

    fn cancel(&self, handle: IdleHandle) {
        let removed = self
            .tasks
            .lock()
            .expect("idle handle table mutex poisoned")
            .remove(&handle.0);
        if let Some(abort) = removed {
            abort.abort();
        }
    }

    fn len(&self) -> usize {
        self.tasks
            .lock()
            .expect("idle handle table mutex poisoned")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_deadline_counts_down() {
        let deadline = FrameDeadline::new(Instant::now(), Duration::from_millis(50), false);
        let remaining = deadline.time_remaining();
        assert!(remaining <= Duration::from_millis(50));
        assert!(!deadline.did_timeout());
    }

    #[tokio::test]
    async fn test_expired_frame_deadline_saturates_at_zero() {
        let started = Instant::now() - Duration::from_millis(80);
        let deadline = FrameDeadline::new(started, Duration::from_millis(50), true);
        assert_eq!(deadline.time_remaining(), Duration::ZERO);
        assert!(deadline.did_timeout());
    }

    #[tokio::test]
    async fn test_handle_table_claim_and_cancel() {
        let table = HandleTable::default();
        let first = table.register(|_| tokio::spawn(std::future::pending::<()>()).abort_handle());
        let second = table.register(|_| tokio::spawn(std::future::pending::<()>()).abort_handle());
        assert_ne!(first, second);
        assert_eq!(table.len(), 2);

        table.cancel(first);
        assert!(!table.claim(first.0));
        assert!(table.claim(second.0));
        assert_eq!(table.len(), 0);
    }
}
