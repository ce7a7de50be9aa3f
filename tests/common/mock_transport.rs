// tests/common/mock_transport.rs
//! Transport wrapper that records outgoing envelopes and can be told to fail.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use devtools_bridge::{Envelope, MessageSink, Transport, TransportError};

/// Wraps a real transport, recording every envelope the bridge sends.
pub struct MockTransport<T> {
    inner: T,
    probe: TransportProbe,
}

/// Test-side view of a [`MockTransport`], usable after the bridge owns it.
#[derive(Clone, Default)]
pub struct TransportProbe {
    sent: Arc<Mutex<Vec<Envelope>>>,
    failing: Arc<AtomicBool>,
}

impl<T: Transport> MockTransport<T> {
    pub fn wrap(inner: T) -> (Self, TransportProbe) {
        let probe = TransportProbe::default();
        (
            Self {
                inner,
                probe: probe.clone(),
            },
            probe,
        )
    }
}

impl TransportProbe {
    /// Every envelope handed to the transport, batches unwrapped.
    pub fn sent_flat(&self) -> Vec<Envelope> {
        let mut flat = Vec::new();
        for envelope in self.sent.lock().unwrap().iter() {
            match envelope {
                Envelope::Batch { messages } => flat.extend(messages.iter().cloned()),
                other => flat.push(other.clone()),
            }
        }
        flat
    }

    pub fn send_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Make subsequent sends fail with `TransportError::Send`.
    pub fn fail_sends(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl<T: Transport> Transport for MockTransport<T> {
    fn listen(&self, sink: MessageSink) {
        self.inner.listen(sink);
    }

    fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.probe.sent.lock().unwrap().push(envelope.clone());
        if self.probe.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Send("link down".to_string()));
        }
        self.inner.send(envelope)
    }
}
