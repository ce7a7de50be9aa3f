use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use super::envelope::Nonce;

static GLOBAL_NONCES: OnceLock<NonceSource> = OnceLock::new();

/// Thread-safe nonce allocator backed by an atomic counter.
///
/// Clones share the same counter. Every bridge built with `Bridge::new`
/// draws from `NonceSource::global()`, so nonces never collide between
/// bridges living in the same process. Tests that want isolated numbering
/// can inject a fresh source through the builder.
#[derive(Debug, Clone)]
pub struct NonceSource {
    counter: Arc<AtomicU64>,
}

impl NonceSource {
    /// A fresh counter whose first nonce is 1.
    pub fn new() -> Self {
        Self {
            counter: Arc::new(AtomicU64::new(1)),
        }
    }

    /// The process-wide source shared by default-constructed bridges.
    pub fn global() -> Self {
        GLOBAL_NONCES.get_or_init(NonceSource::new).clone()
    }

    pub fn next_nonce(&self) -> Nonce {
        self.counter.fetch_add(1, Ordering::SeqCst)
    }

    /// The value the next call to `next_nonce` will return.
    pub fn peek(&self) -> Nonce {
        self.counter.load(Ordering::SeqCst)
    }

    pub fn shares_counter_with(&self, other: &NonceSource) -> bool {
        Arc::ptr_eq(&self.counter, &other.counter)
    }
}

impl Default for NonceSource {
    fn default() -> Self {
        Self::new()
    }
}
