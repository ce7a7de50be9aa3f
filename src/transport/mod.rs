//! Channels a bridge can run over.
//!
//! A transport only has to deliver envelopes to whoever listens on the other
//! end, in the order they were sent. Serialization, reconnects, and auth are
//! the transport's business; the bridge never retries a failed send.
//!
//! - [`MemoryTransport`]: two in-process endpoints calling each other's
//!   listeners directly. No serialization.
//! - [`ChannelTransport`]: JSON frames over an async channel, wrapped in the
//!   socket carrier so unrelated traffic on the same pipe is skipped.
//! - [`carrier`]: frame codecs for socket and window-message channels.

pub mod carrier;
mod channel;
mod memory;

use std::sync::Arc;

use crate::bridge::Envelope;

pub use channel::ChannelTransport;
pub use memory::MemoryTransport;

/// Callback a transport invokes for every envelope it receives.
pub type MessageSink = Arc<dyn Fn(Envelope) + Send + Sync>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("codec error: {0}")]
    Codec(String),
    #[error("send failed: {0}")]
    Send(String),
}

impl TransportError {
    pub fn codec<E: std::fmt::Display>(err: E) -> Self {
        TransportError::Codec(err.to_string())
    }
}

pub trait Transport: Send + Sync {
    /// Register a callback for incoming envelopes. May be called more than
    /// once; every sink sees every envelope.
    fn listen(&self, sink: MessageSink);

    /// Hand one envelope to the channel.
    fn send(&self, envelope: Envelope) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn listen(&self, sink: MessageSink) {
        (**self).listen(sink)
    }

    fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        (**self).send(envelope)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn listen(&self, sink: MessageSink) {
        (**self).listen(sink)
    }

    fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        (**self).send(envelope)
    }
}
