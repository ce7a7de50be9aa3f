use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;

use super::envelope::Nonce;
use super::handler::panic_message;
use super::{BridgeInner, Envelope};
use crate::error::{flatten_error, BridgeError, HandlerError};

type HandlerOutcome = std::thread::Result<Result<Value, HandlerError>>;

impl BridgeInner {
    /// Apply one received envelope. Runs inside a flush cycle with no lock
    /// held.
    pub(super) fn dispatch(self: &Arc<Self>, envelope: Envelope) {
        match envelope {
            Envelope::Event { name, data } => self.deliver_event(&name, &data),
            Envelope::Call { nonce, name, args } => self.answer_call(nonce, name, args),
            Envelope::Resolve { nonce, value } => self.settle(nonce, Ok(value)),
            Envelope::Reject { nonce, error } => {
                self.settle(nonce, Err(BridgeError::Remote(error)))
            }
            // The next cycle is scheduled with the matching timeout when this
            // one finishes.
            Envelope::Pause => {
                self.lock().paused = true;
                tracing::debug!(bridge = %self.id, "peer paused us");
            }
            Envelope::Resume => {
                self.lock().paused = false;
                tracing::debug!(bridge = %self.id, "peer resumed us");
            }
            Envelope::Batch { messages } => {
                for message in messages {
                    self.dispatch(message);
                }
            }
        }
    }

    fn deliver_event(&self, name: &str, data: &Value) {
        let listeners = self.lock().listeners.take_for_dispatch(name);
        tracing::trace!(bridge = %self.id, name, listeners = listeners.len(), "delivering event");
        for listener in listeners {
            if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(|| listener(data))) {
                tracing::error!(
                    bridge = %self.id,
                    name,
                    "event listener panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
    }

    fn answer_call(self: &Arc<Self>, nonce: Nonce, name: String, args: Vec<Value>) {
        let handler = self.lock().callers.get(&name);
        let Some(handler) = handler else {
            tracing::debug!(bridge = %self.id, nonce, name = %name, "no handler for call");
            self.enqueue_outgoing(Envelope::Reject {
                nonce,
                error: format!("unknown call: {name}"),
            });
            return;
        };

        let mut running = Box::pin(
            AssertUnwindSafe(async move { handler.handle(args).await }).catch_unwind(),
        );
        if let Some(outcome) = running.as_mut().now_or_never() {
            self.enqueue_outgoing(reply_envelope(nonce, outcome));
            return;
        }

        tracing::trace!(bridge = %self.id, nonce, name = %name, "handler suspended, answering later");
        let weak = Arc::downgrade(self);
        self.runtime.spawn(async move {
            let outcome = running.await;
            match weak.upgrade() {
                Some(inner) => inner.enqueue_outgoing(reply_envelope(nonce, outcome)),
                None => tracing::debug!(nonce, name = %name, "bridge dropped before handler finished"),
            }
        });
    }

    fn settle(&self, nonce: Nonce, reply: Result<Value, BridgeError>) {
        let mut state = self.lock();
        match state.pending.settle(nonce, reply) {
            Some(name) => {
                tracing::trace!(bridge = %self.id, nonce, name = %name, "call settled");
            }
            None => {
                state.orphaned_replies += 1;
                tracing::warn!(bridge = %self.id, nonce, "reply for unknown or already settled call ignored");
            }
        }
    }
}

fn reply_envelope(nonce: Nonce, outcome: HandlerOutcome) -> Envelope {
    match outcome {
        Ok(Ok(value)) => Envelope::Resolve { nonce, value },
        Ok(Err(err)) => Envelope::Reject {
            nonce,
            error: flatten_error(&*err),
        },
        Err(payload) => Envelope::Reject {
            nonce,
            error: format!("handler panicked: {}", panic_message(payload.as_ref())),
        },
    }
}
