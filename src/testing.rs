//! Deterministic stand-ins for the scheduler and transport, used by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::bridge::{Bridge, Envelope, NonceSource};
use crate::idle::{IdleCallback, IdleDeadline, IdleHandle, IdleScheduler};
use crate::transport::{MessageSink, Transport, TransportError};

/// Idle scheduler that only runs callbacks when the test says so.
#[derive(Default)]
pub struct ManualIdleScheduler {
    next_id: AtomicU64,
    queue: Mutex<VecDeque<(IdleHandle, IdleCallback)>>,
    timeouts: Mutex<Vec<Duration>>,
    cancelled: AtomicU64,
}

impl ManualIdleScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Timeout passed with the most recent request.
    pub fn last_timeout(&self) -> Option<Duration> {
        self.timeouts.lock().unwrap().last().copied()
    }

    pub fn requests(&self) -> usize {
        self.timeouts.lock().unwrap().len()
    }

    pub fn cancellations(&self) -> u64 {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Run the oldest pending callback with `deadline`. Returns false if
    /// nothing was pending.
    pub fn run_next(&self, deadline: &dyn IdleDeadline) -> bool {
        let next = self.queue.lock().unwrap().pop_front();
        match next {
            Some((_, callback)) => {
                callback(deadline);
                true
            }
            None => false,
        }
    }

    /// Run one callback with an effectively unlimited budget.
    pub fn run_once(&self) -> bool {
        self.run_next(&ScriptedDeadline::generous())
    }

    /// Keep running callbacks until none are pending. Returns how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_once() {
            ran += 1;
            assert!(ran < 10_000, "flush loop did not settle");
        }
        ran
    }
}

impl IdleScheduler for ManualIdleScheduler {
    fn request_idle_callback(&self, callback: IdleCallback, timeout: Duration) -> IdleHandle {
        let handle = IdleHandle::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.timeouts.lock().unwrap().push(timeout);
        self.queue.lock().unwrap().push_back((handle, callback));
        handle
    }

    fn cancel_idle_callback(&self, handle: IdleHandle) {
        let mut queue = self.queue.lock().unwrap();
        let before = queue.len();
        queue.retain(|(queued, _)| *queued != handle);
        if queue.len() != before {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Deadline whose remaining time drops by `step` on every query.
pub struct ScriptedDeadline {
    remaining_ms: AtomicU64,
    step_ms: u64,
    did_timeout: bool,
}

impl ScriptedDeadline {
    pub fn new(start_ms: u64, step_ms: u64, did_timeout: bool) -> Self {
        Self {
            remaining_ms: AtomicU64::new(start_ms),
            step_ms,
            did_timeout,
        }
    }

    pub fn generous() -> Self {
        Self::new(u64::MAX / 2, 0, false)
    }
}

impl IdleDeadline for ScriptedDeadline {
    fn time_remaining(&self) -> Duration {
        let now = self.remaining_ms.load(Ordering::SeqCst);
        self.remaining_ms
            .store(now.saturating_sub(self.step_ms), Ordering::SeqCst);
        Duration::from_millis(now)
    }

    fn did_timeout(&self) -> bool {
        self.did_timeout
    }
}

/// Transport that records what the bridge sends and lets the test inject
/// what the bridge receives.
#[derive(Default, Clone)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<Envelope>>>,
    sinks: Arc<Mutex<Vec<MessageSink>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().unwrap().clone()
    }

    pub fn take_sent(&self) -> Vec<Envelope> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    /// Deliver `envelope` as if the peer had sent it.
    pub fn inject(&self, envelope: Envelope) {
        let sinks = self.sinks.lock().unwrap().clone();
        for sink in sinks {
            sink(envelope.clone());
        }
    }
}

impl Transport for RecordingTransport {
    fn listen(&self, sink: MessageSink) {
        self.sinks.lock().unwrap().push(sink);
    }

    fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(envelope);
        Ok(())
    }
}

/// A bridge wired to a manual scheduler and a recording transport, with its
/// own nonce numbering starting at 1.
pub fn manual_bridge() -> (Bridge, Arc<ManualIdleScheduler>, RecordingTransport) {
    let scheduler = ManualIdleScheduler::new();
    let transport = RecordingTransport::new();
    let bridge = Bridge::builder(transport.clone())
        .scheduler(scheduler.clone())
        .nonces(NonceSource::new())
        .build();
    (bridge, scheduler, transport)
}
