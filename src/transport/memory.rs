use std::sync::{Arc, Mutex};

use super::{MessageSink, Transport, TransportError};
use crate::bridge::Envelope;

#[derive(Default)]
struct Endpoint {
    listeners: Mutex<Vec<MessageSink>>,
}

impl Endpoint {
    fn snapshot(&self) -> Vec<MessageSink> {
        self.listeners
            .lock()
            .expect("memory transport mutex poisoned")
            .clone()
    }
}

/// One end of an in-process transport.
///
/// `send` synchronously invokes every listener registered on the peer end.
/// Envelopes sent before the peer listens are dropped, like a socket with
/// nobody attached.
pub struct MemoryTransport {
    local: Arc<Endpoint>,
    remote: Arc<Endpoint>,
}

impl MemoryTransport {
    pub fn pair() -> (MemoryTransport, MemoryTransport) {
        let a = Arc::new(Endpoint::default());
        let b = Arc::new(Endpoint::default());
        (
            MemoryTransport {
                local: a.clone(),
                remote: b.clone(),
            },
            MemoryTransport {
                local: b,
                remote: a,
            },
        )
    }
}

impl Transport for MemoryTransport {
    fn listen(&self, sink: MessageSink) {
        self.local
            .listeners
            .lock()
            .expect("memory transport mutex poisoned")
            .push(sink);
    }

    fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        let listeners = self.remote.snapshot();
        if listeners.is_empty() {
            tracing::trace!(kind = envelope.kind(), "no listener on peer, envelope dropped");
            return Ok(());
        }
        for listener in listeners {
            listener(envelope.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn collector() -> (MessageSink, Arc<Mutex<Vec<Envelope>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink: MessageSink = Arc::new(move |envelope| sink_seen.lock().unwrap().push(envelope));
        (sink, seen)
    }

    #[test]
    fn test_send_reaches_peer_only() {
        let (a, b) = MemoryTransport::pair();
        let (sink_a, seen_a) = collector();
        let (sink_b, seen_b) = collector();
        a.listen(sink_a);
        b.listen(sink_b);

        a.send(Envelope::event("hello", json!(1))).unwrap();

        assert!(seen_a.lock().unwrap().is_empty());
        assert_eq!(
            *seen_b.lock().unwrap(),
            vec![Envelope::event("hello", json!(1))]
        );
    }

    #[test]
    fn test_every_listener_sees_every_envelope_in_order() {
        let (a, b) = MemoryTransport::pair();
        let (first, seen_first) = collector();
        let (second, seen_second) = collector();
        b.listen(first);
        b.listen(second);

        a.send(Envelope::Pause).unwrap();
        a.send(Envelope::Resume).unwrap();

        let expected = vec![Envelope::Pause, Envelope::Resume];
        assert_eq!(*seen_first.lock().unwrap(), expected);
        assert_eq!(*seen_second.lock().unwrap(), expected);
    }

    #[test]
    fn test_send_without_peer_listener_is_dropped() {
        let (a, _b) = MemoryTransport::pair();
        assert!(a.send(Envelope::Pause).is_ok());
    }
}
