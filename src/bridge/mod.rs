//! The bridge: pub/sub and RPC between two contexts over one transport.
//!
//! Nothing is delivered inline. `emit`, `call`, replies, and flow-control
//! signals are appended to an outgoing queue; received envelopes are
//! appended to an incoming queue. A single idle-scheduled flush drains both:
//! incoming first (bounded to the first half of the idle slice), then
//! outgoing in adaptive chunks, each chunk sent as one `batch` envelope.
//!
//! # Example
//! ```rust,ignore
//! use devtools_bridge::{Bridge, MemoryTransport};
//!
//! let (agent_side, inspector_side) = MemoryTransport::pair();
//! let agent = Bridge::new(agent_side);
//! let inspector = Bridge::new(inspector_side);
//!
//! agent.on_call_sync("echo", |args| Ok(args.into_iter().next().unwrap_or_default()))?;
//! let value = inspector.call("echo", vec![serde_json::json!(42)]).await?;
//! ```

mod dispatch;
mod envelope;
mod flush;
mod handler;
mod nonce;
mod pending;
mod registry;

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use uuid::Uuid;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, HandlerError};
use crate::idle::{IdleHandle, IdleScheduler, TimerIdleScheduler};
use crate::transport::{MessageSink, Transport};

pub use envelope::{Envelope, Nonce};
pub use flush::ChunkPolicy;
pub use handler::CallHandler;
pub use nonce::NonceSource;
pub use registry::{Listener, ListenerId};

use pending::PendingCalls;
use registry::{CallerRegistry, ListenerRegistry};

/// Event name consumers use to announce teardown. The bridge itself attaches
/// no meaning to it.
pub const SHUTDOWN_EVENT: &str = "shutdown";

/// Point-in-time view of a bridge's queues and bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    pub incoming: usize,
    pub outgoing: usize,
    pub pending_calls: usize,
    pub paused: bool,
    pub flush_scheduled: bool,
    pub orphaned_replies: u64,
    pub closed: bool,
}

#[derive(Default)]
struct BridgeState {
    listeners: ListenerRegistry,
    callers: CallerRegistry,
    pending: PendingCalls,
    incoming: VecDeque<Envelope>,
    outgoing: VecDeque<Envelope>,
    paused: bool,
    scheduled: Option<IdleHandle>,
    /// A flush cycle is running. It reschedules itself when it finishes.
    flushing: bool,
    orphaned_replies: u64,
    closed: bool,
}

impl BridgeState {
    fn has_work(&self) -> bool {
        !self.incoming.is_empty() || !self.outgoing.is_empty()
    }
}

pub(crate) struct BridgeInner {
    id: Uuid,
    transport: Box<dyn Transport>,
    scheduler: Arc<dyn IdleScheduler>,
    nonces: NonceSource,
    config: BridgeConfig,
    runtime: Handle,
    state: Mutex<BridgeState>,
}

impl BridgeInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, BridgeState> {
        self.state.lock().expect("bridge state mutex poisoned")
    }

    fn enqueue_outgoing(self: &Arc<Self>, envelope: Envelope) {
        {
            let mut state = self.lock();
            if state.closed {
                tracing::warn!(bridge = %self.id, kind = envelope.kind(), "bridge closed, dropping outgoing envelope");
                return;
            }
            state.outgoing.push_back(envelope);
        }
        self.schedule_flush();
    }

    /// Entry point for everything the transport hands us.
    fn receive(self: &Arc<Self>, envelope: Envelope) {
        let mut unpacked = Vec::new();
        let nested = envelope.flatten_into(&mut unpacked);
        if nested > 0 {
            tracing::warn!(bridge = %self.id, nested, "flattened nested batch envelope");
        }
        {
            let mut state = self.lock();
            if state.closed {
                tracing::debug!(bridge = %self.id, count = unpacked.len(), "bridge closed, ignoring incoming envelopes");
                return;
            }
            for envelope in &unpacked {
                tracing::trace!(bridge = %self.id, kind = envelope.kind(), "received envelope");
            }
            state.incoming.extend(unpacked);
        }
        self.schedule_flush();
    }

    fn shutdown(&self) -> usize {
        let mut state = self.lock();
        if state.closed {
            return 0;
        }
        state.closed = true;
        if let Some(handle) = state.scheduled.take() {
            self.scheduler.cancel_idle_callback(handle);
        }
        let dropped = state.incoming.len() + state.outgoing.len();
        state.incoming.clear();
        state.outgoing.clear();
        let rejected = state.pending.reject_all(|| BridgeError::Closed);
        tracing::debug!(bridge = %self.id, rejected, dropped, "bridge closed");
        rejected
    }
}

/// Two-ended message bus over a [`Transport`].
///
/// Dropping a bridge closes it: outstanding calls fail with
/// [`BridgeError::Closed`] and queued envelopes are discarded.
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    /// Bridge with default config, the process-wide nonce source, and the
    /// timer-based idle scheduler.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::builder(transport).build()
    }

    pub fn builder(transport: impl Transport + 'static) -> BridgeBuilder {
        BridgeBuilder::new(Box::new(transport))
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn nonce_source(&self) -> &NonceSource {
        &self.inner.nonces
    }

    // -- pub/sub ----------------------------------------------------------

    /// Register `listener` for events named `name` emitted by the peer.
    pub fn on<F>(&self, name: &str, listener: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.lock().listeners.add(name, Arc::new(listener), false)
    }

    /// Like [`Bridge::on`], but the listener unregisters itself after its
    /// first invocation.
    pub fn once<F>(&self, name: &str, listener: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.lock().listeners.add(name, Arc::new(listener), true)
    }

    /// Remove a listener. Unknown ids are ignored; returns whether one was
    /// removed.
    pub fn off(&self, name: &str, id: ListenerId) -> bool {
        self.inner.lock().listeners.remove(name, id)
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.inner.lock().listeners.count(name)
    }

    /// Queue an event for the peer's listeners. Local listeners never see it.
    pub fn emit(&self, name: &str, data: Value) {
        self.inner.enqueue_outgoing(Envelope::event(name, data));
    }

    // -- RPC --------------------------------------------------------------

    /// Call the peer's handler for `name` and wait for its answer.
    ///
    /// Fails with [`BridgeError::Remote`] if the peer has no handler or the
    /// handler failed, with [`BridgeError::Closed`] if this bridge closes
    /// first, and with [`BridgeError::Timeout`] if a call timeout is
    /// configured and elapses.
    pub async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, BridgeError> {
        let nonce = self.inner.nonces.next_nonce();
        let reply = {
            let mut state = self.inner.lock();
            if state.closed {
                return Err(BridgeError::Closed);
            }
            state.pending.insert(nonce, name)
        };
        // Removes the entry if this future is dropped or times out before
        // the answer arrives. A no-op once the call has been settled.
        let _abandon = AbandonOnDrop {
            inner: &self.inner,
            nonce,
        };
        tracing::trace!(bridge = %self.inner.id, nonce, name, "call queued");
        self.inner.enqueue_outgoing(Envelope::Call {
            nonce,
            name: name.to_string(),
            args,
        });

        let outcome = match self.inner.config.call_timeout() {
            Some(duration) => match tokio::time::timeout(duration, reply).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(BridgeError::Timeout {
                        name: name.to_string(),
                        duration,
                    })
                }
            },
            None => reply.await,
        };
        outcome.map_err(|_| BridgeError::Closed)?
    }

    /// Typed variant of [`Bridge::call`].
    ///
    /// `args` must serialize to a JSON array (a tuple or `Vec`); any other
    /// value is sent as the single argument.
    pub async fn call_as<T, R>(&self, name: &str, args: T) -> Result<R, BridgeError>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let args = match serde_json::to_value(args)? {
            Value::Array(items) => items,
            single => vec![single],
        };
        let value = self.call(name, args).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Register the handler for calls named `name`.
    ///
    /// A name can have exactly one handler; a second registration fails
    /// immediately with [`BridgeError::DuplicateHandler`].
    pub fn on_call(&self, name: &str, handler: impl CallHandler + 'static) -> Result<(), BridgeError> {
        self.inner.lock().callers.register(name, Arc::new(handler))
    }

    /// Register a synchronous handler. Its answer is sent in the same flush
    /// that delivered the call.
    pub fn on_call_sync<F>(&self, name: &str, handler: F) -> Result<(), BridgeError>
    where
        F: Fn(Vec<Value>) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.on_call(name, move |args: Vec<Value>| std::future::ready(handler(args)))
    }

    pub fn has_call_handler(&self, name: &str) -> bool {
        self.inner.lock().callers.contains(name)
    }

    // -- flow control -----------------------------------------------------

    /// Ask the peer to slow its flush cadence.
    pub fn pause(&self) {
        self.inner.enqueue_outgoing(Envelope::Pause);
    }

    /// Ask the peer to return to its normal flush cadence.
    pub fn resume(&self) {
        self.inner.enqueue_outgoing(Envelope::Resume);
    }

    // -- ingress / lifecycle ----------------------------------------------

    /// Feed an untyped JSON envelope, for transports that do not decode.
    pub fn receive_json(&self, value: Value) -> Result<(), BridgeError> {
        let envelope = Envelope::from_value(value).inspect_err(|e| {
            tracing::error!(bridge = %self.inner.id, "rejecting envelope from peer: {e}");
        })?;
        self.inner.receive(envelope);
        Ok(())
    }

    /// Fail every outstanding call with [`BridgeError::Closed`], discard both
    /// queues, and refuse further traffic. Returns the number of calls
    /// failed. Idempotent.
    pub fn close(&self) -> usize {
        self.inner.shutdown()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn stats(&self) -> BridgeStats {
        let state = self.inner.lock();
        BridgeStats {
            incoming: state.incoming.len(),
            outgoing: state.outgoing.len(),
            pending_calls: state.pending.len(),
            paused: state.paused,
            flush_scheduled: state.scheduled.is_some(),
            orphaned_replies: state.orphaned_replies,
            closed: state.closed,
        }
    }
}

struct AbandonOnDrop<'a> {
    inner: &'a BridgeInner,
    nonce: Nonce,
}

impl Drop for AbandonOnDrop<'_> {
    fn drop(&mut self) {
        let Ok(mut state) = self.inner.state.lock() else {
            return;
        };
        if state.pending.forget(self.nonce) {
            tracing::debug!(bridge = %self.inner.id, nonce = self.nonce, "call abandoned before its answer");
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("id", &self.inner.id)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

/// Builder for bridges that need a custom scheduler, nonce source, or config.
///
/// # Example
/// ```rust,ignore
/// let bridge = Bridge::builder(transport)
///     .config(BridgeConfig::from_env())
///     .nonces(NonceSource::new())
///     .build();
/// ```
pub struct BridgeBuilder {
    transport: Box<dyn Transport>,
    scheduler: Option<Arc<dyn IdleScheduler>>,
    nonces: Option<NonceSource>,
    config: BridgeConfig,
    runtime: Option<Handle>,
}

impl BridgeBuilder {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            scheduler: None,
            nonces: None,
            config: BridgeConfig::default(),
            runtime: None,
        }
    }

    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn IdleScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn nonces(mut self, nonces: NonceSource) -> Self {
        self.nonces = Some(nonces);
        self
    }

    /// Runtime used for handlers that do not finish on first poll.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// # Panics
    ///
    /// Panics when no runtime was given and the builder is used outside a
    /// Tokio runtime.
    pub fn build(self) -> Bridge {
        let runtime = self.runtime.unwrap_or_else(Handle::current);
        let scheduler = self.scheduler.unwrap_or_else(|| {
            Arc::new(TimerIdleScheduler::with_handle(
                self.config.polyfill.clone(),
                runtime.clone(),
            ))
        });
        let inner = Arc::new(BridgeInner {
            id: Uuid::new_v4(),
            transport: self.transport,
            scheduler,
            nonces: self.nonces.unwrap_or_else(NonceSource::global),
            config: self.config,
            runtime,
            state: Mutex::new(BridgeState::default()),
        });

        let weak: Weak<BridgeInner> = Arc::downgrade(&inner);
        let sink: MessageSink = Arc::new(move |envelope: Envelope| match weak.upgrade() {
            Some(inner) => inner.receive(envelope),
            None => tracing::trace!("envelope arrived for a dropped bridge"),
        });
        inner.transport.listen(sink);
        tracing::debug!(bridge = %inner.id, "bridge created");

        Bridge { inner }
    }
}
