use std::sync::Arc;
use std::time::Duration;

use super::{BridgeInner, BridgeState, Envelope};
use crate::config::BridgeConfig;
use crate::idle::IdleDeadline;

/// How many outgoing envelopes go into one batch.
///
/// The queue is split into roughly `chunk_count` chunks, but no chunk is
/// smaller than `min_chunk_size`. Paused bridges use more, smaller chunks
/// with a lower floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPolicy {
    pub chunk_count: usize,
    pub min_chunk_size: usize,
}

impl ChunkPolicy {
    pub fn for_mode(config: &BridgeConfig, paused: bool) -> Self {
        if paused {
            Self {
                chunk_count: config.paused_chunk_count,
                min_chunk_size: config.paused_min_chunk_size,
            }
        } else {
            Self {
                chunk_count: config.chunk_count,
                min_chunk_size: config.min_chunk_size,
            }
        }
    }

    /// Chunk length for a queue holding `queued` envelopes.
    pub fn chunk_len(&self, queued: usize) -> usize {
        let adaptive = (queued as f64 / self.chunk_count as f64).round() as usize;
        adaptive.max(self.min_chunk_size).max(1)
    }
}

impl BridgeInner {
    /// Request an idle callback unless one is already pending, a cycle is
    /// running, or there is nothing to do.
    pub(super) fn schedule_flush(self: &Arc<Self>) {
        let mut state = self.lock();
        self.schedule_flush_locked(&mut state);
    }

    fn schedule_flush_locked(self: &Arc<Self>, state: &mut BridgeState) {
        if state.closed || state.flushing || state.scheduled.is_some() || !state.has_work() {
            return;
        }
        let timeout = self.config.flush_timeout(state.paused);
        let weak = Arc::downgrade(self);
        let handle = self.scheduler.request_idle_callback(
            Box::new(move |deadline: &dyn IdleDeadline| {
                if let Some(inner) = weak.upgrade() {
                    inner.flush(deadline);
                }
            }),
            timeout,
        );
        state.scheduled = Some(handle);
        tracing::trace!(bridge = %self.id, ?timeout, paused = state.paused, "flush scheduled");
    }

    /// One flush cycle: drain incoming within the first half of the slice,
    /// then send outgoing in chunks while time remains.
    ///
    /// Cycles never overlap. Work queued while one runs is picked up by the
    /// reschedule at its end.
    pub(super) fn flush(self: &Arc<Self>, deadline: &dyn IdleDeadline) {
        {
            let mut state = self.lock();
            state.scheduled = None;
            if state.flushing {
                tracing::warn!(bridge = %self.id, "flush cycle already running, skipping");
                return;
            }
            state.flushing = true;
        }
        let _running = FlushingGuard(self);

        // Snapshot of the initial budget, not re-sampled.
        let half_past = deadline.time_remaining() / 2;
        let in_first_half = || deadline.did_timeout() || deadline.time_remaining() > half_past;
        let has_time = || deadline.did_timeout() || deadline.time_remaining() > Duration::ZERO;

        let mut dispatched = 0usize;
        while !self.lock().incoming.is_empty() && in_first_half() {
            let Some(envelope) = self.lock().incoming.pop_front() else {
                break;
            };
            self.dispatch(envelope);
            dispatched += 1;
        }

        let (policy, queued) = {
            let state = self.lock();
            (
                ChunkPolicy::for_mode(&self.config, state.paused),
                state.outgoing.len(),
            )
        };
        let chunk_len = policy.chunk_len(queued);
        let mut sent = 0usize;
        while !self.lock().outgoing.is_empty() && has_time() {
            let chunk: Vec<Envelope> = {
                let mut state = self.lock();
                let take = chunk_len.min(state.outgoing.len());
                state.outgoing.drain(..take).collect()
            };
            sent += chunk.len();
            let unit = Envelope::batch(chunk);
            let kind = unit.kind();
            if let Err(e) = self.transport.send(unit) {
                tracing::warn!(bridge = %self.id, kind, "transport send failed: {e}");
            }
        }

        tracing::debug!(
            bridge = %self.id,
            dispatched,
            sent,
            chunk_len,
            did_timeout = deadline.did_timeout(),
            "flush cycle finished"
        );
    }
}

/// Ends the running cycle and reschedules, even if a transport panicked.
struct FlushingGuard<'a>(&'a Arc<BridgeInner>);

impl Drop for FlushingGuard<'_> {
    fn drop(&mut self) {
        let Ok(mut state) = self.0.state.lock() else {
            return;
        };
        state.flushing = false;
        self.0.schedule_flush_locked(&mut state);
    }
}
