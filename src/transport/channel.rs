use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::carrier::{decode_relay_frame, encode_relay_frame};
use super::{MessageSink, Transport, TransportError};
use crate::bridge::Envelope;

/// Transport that moves serialized socket frames over an async channel.
///
/// Outgoing envelopes are encoded with the relay carrier; incoming frames
/// without the carrier are ignored. A carrier frame holding an envelope this
/// side cannot decode means the peers disagree on the protocol: it is logged
/// at error level and the reader stops.
pub struct ChannelTransport {
    outbound: mpsc::UnboundedSender<String>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    sinks: Arc<Mutex<Vec<MessageSink>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    runtime: Handle,
}

impl ChannelTransport {
    /// Two connected ends.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn pair() -> (ChannelTransport, ChannelTransport) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            ChannelTransport::from_parts(a_tx, b_rx, Handle::current()),
            ChannelTransport::from_parts(b_tx, a_rx, Handle::current()),
        )
    }

    /// Wrap an existing frame pipe, e.g. the two halves of a socket pump.
    pub fn from_parts(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::UnboundedReceiver<String>,
        runtime: Handle,
    ) -> Self {
        Self {
            outbound,
            inbound: Mutex::new(Some(inbound)),
            sinks: Arc::new(Mutex::new(Vec::new())),
            reader: Mutex::new(None),
            runtime,
        }
    }

    /// Push a raw frame to the peer, bypassing the carrier.
    pub fn send_raw(&self, frame: impl Into<String>) -> Result<(), TransportError> {
        self.outbound
            .send(frame.into())
            .map_err(|_| TransportError::Closed)
    }

    /// Whether the reader task is still consuming frames.
    pub fn is_reading(&self) -> bool {
        self.reader
            .lock()
            .expect("channel transport mutex poisoned")
            .as_ref()
            .is_some_and(|reader| !reader.is_finished())
    }

    fn start_reader(&self) {
        let Some(mut inbound) = self
            .inbound
            .lock()
            .expect("channel transport mutex poisoned")
            .take()
        else {
            return;
        };
        let sinks = self.sinks.clone();

        let reader = self.runtime.spawn(async move {
            while let Some(frame) = inbound.recv().await {
                let envelope = match decode_relay_frame(&frame) {
                    Ok(Some(envelope)) => envelope,
                    Ok(None) => {
                        tracing::trace!("skipping non-bridge frame");
                        continue;
                    }
                    Err(e) => {
                        tracing::error!("protocol mismatch on bridge channel, reader stopped: {e}");
                        break;
                    }
                };
                let listeners = sinks
                    .lock()
                    .expect("channel transport mutex poisoned")
                    .clone();
                for listener in listeners {
                    listener(envelope.clone());
                }
            }
            tracing::debug!("bridge channel reader finished");
        });
        *self.reader.lock().expect("channel transport mutex poisoned") = Some(reader);
    }
}

impl Transport for ChannelTransport {
    fn listen(&self, sink: MessageSink) {
        self.sinks
            .lock()
            .expect("channel transport mutex poisoned")
            .push(sink);
        self.start_reader();
    }

    fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        let frame = encode_relay_frame(&envelope)?;
        self.send_raw(frame)
    }
}

impl Drop for ChannelTransport {
    fn drop(&mut self) {
        if let Ok(mut reader) = self.reader.lock() {
            if let Some(reader) = reader.take() {
                reader.abort();
            }
        }
    }
}
