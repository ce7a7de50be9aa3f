use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::Instant;

use super::{FrameDeadline, HandleTable, IdleCallback, IdleHandle, IdleScheduler};
use crate::config::PolyfillConfig;

/// Timer-based stand-in for a native idle callback.
///
/// Each request sleeps for `min(max_delay, backoff_factor * D)`, where `D` is
/// the wall-clock duration of the most recent callback (seeded from
/// `initial_run`). Cheap callbacks are rescheduled quickly; expensive ones
/// back off, never beyond `max_delay`. Deadlines always report
/// `did_timeout() == false` and a fresh `frame_budget` starting when the
/// callback fires.
#[derive(Debug, Clone)]
pub struct TimerIdleScheduler {
    config: PolyfillConfig,
    last_run: Arc<Mutex<Duration>>,
    table: HandleTable,
    runtime: Handle,
}

impl TimerIdleScheduler {
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime; use [`Self::with_handle`]
    /// to bind to a runtime explicitly.
    pub fn new(config: PolyfillConfig) -> Self {
        Self::with_handle(config, Handle::current())
    }

    pub fn with_handle(config: PolyfillConfig, runtime: Handle) -> Self {
        let last_run = Arc::new(Mutex::new(config.initial_run()));
        Self {
            config,
            last_run,
            table: HandleTable::default(),
            runtime,
        }
    }

    /// Delay the next request will sleep for.
    pub fn next_delay(&self) -> Duration {
        let last = *self.last_run.lock().expect("idle polyfill mutex poisoned");
        backoff_delay(last, &self.config)
    }

    /// Duration of the most recent callback.
    pub fn last_run(&self) -> Duration {
        *self.last_run.lock().expect("idle polyfill mutex poisoned")
    }

    /// Number of requests still waiting on their timer.
    pub fn pending(&self) -> usize {
        self.table.len()
    }
}

fn backoff_delay(last_run: Duration, config: &PolyfillConfig) -> Duration {
    last_run
        .saturating_mul(config.backoff_factor)
        .min(config.max_delay())
}

impl IdleScheduler for TimerIdleScheduler {
    fn request_idle_callback(&self, callback: IdleCallback, _timeout: Duration) -> IdleHandle {
        let delay = self.next_delay();
        let budget = self.config.frame_budget();
        let last_run = self.last_run.clone();
        let table = self.table.clone();
        let runtime = self.runtime.clone();

        self.table.register(move |id| {
            runtime
                .spawn(async move {
                    tokio::time::sleep(delay).await;
                    if !table.claim(id) {
                        return;
                    }
                    let started = Instant::now();
                    let deadline = FrameDeadline::new(started, budget, false);
                    callback(&deadline);
                    let elapsed = started.elapsed();
                    *last_run.lock().expect("idle polyfill mutex poisoned") = elapsed;
                    tracing::trace!(?elapsed, "idle polyfill callback finished");
                })
                .abort_handle()
        })
    }

    fn cancel_idle_callback(&self, handle: IdleHandle) {
        self.table.cancel(handle);
    }
}
