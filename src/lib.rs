//! Devtools bridge library.
//!
//! A message bus connecting an inspected application (the agent) with its
//! inspector over whatever channel the host provides. It handles:
//! - Named events with fire-and-forget delivery (`on`, `once`, `off`, `emit`)
//! - Request/response calls correlated by nonce (`call`, `on_call`)
//! - Pause/resume backpressure between the two ends
//! - Idle-time flushing that batches envelopes into adaptive chunks
//!
//! # Architecture
//!
//! - `bridge`: the bus itself, its envelope wire format and flush loop
//! - `idle`: idle-callback scheduling, with a timer-based fallback
//! - `transport`: the channel abstraction plus in-memory and framed-text carriers
//! - `config`: tuning knobs with environment overrides
//! - `error`: shared error types

pub mod bridge;
pub mod config;
pub mod error;
pub mod idle;
pub mod transport;

#[cfg(test)]
mod testing;

pub use bridge::{
    Bridge, BridgeBuilder, BridgeStats, CallHandler, ChunkPolicy, Envelope, Listener, ListenerId,
    Nonce, NonceSource, SHUTDOWN_EVENT,
};
pub use config::{BridgeConfig, PolyfillConfig};
pub use error::{flatten_error, BridgeError, HandlerError};
pub use idle::{
    FrameDeadline, IdleCallback, IdleDeadline, IdleHandle, IdleScheduler, RuntimeIdleScheduler,
    TimerIdleScheduler,
};
pub use transport::{ChannelTransport, MemoryTransport, MessageSink, Transport, TransportError};

/// Install a `tracing` subscriber honouring `RUST_LOG`, falling back to
/// debug output for this crate only.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("devtools_bridge=debug,info")),
        )
        .try_init();
}
