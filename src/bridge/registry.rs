use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::handler::CallHandler;
use crate::error::BridgeError;

pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

/// Identity of one registered listener, returned by `on` and `once`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct ListenerEntry {
    id: ListenerId,
    once: bool,
    callback: Listener,
}

/// Event name -> listeners, in registration order.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: u64,
    by_name: HashMap<String, Vec<ListenerEntry>>,
}

impl ListenerRegistry {
    pub fn add(&mut self, name: &str, callback: Listener, once: bool) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.by_name
            .entry(name.to_string())
            .or_default()
            .push(ListenerEntry { id, once, callback });
        id
    }

    /// Returns false if `id` was not registered under `name`.
    pub fn remove(&mut self, name: &str, id: ListenerId) -> bool {
        let Some(entries) = self.by_name.get_mut(name) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.by_name.remove(name);
        }
        removed
    }

    /// Callbacks to invoke for one delivery of `name`, in order.
    ///
    /// `once` listeners are unregistered as part of taking the snapshot.
    pub fn take_for_dispatch(&mut self, name: &str) -> Vec<Listener> {
        let Some(entries) = self.by_name.get_mut(name) else {
            return Vec::new();
        };
        let callbacks = entries.iter().map(|entry| entry.callback.clone()).collect();
        entries.retain(|entry| !entry.once);
        if entries.is_empty() {
            self.by_name.remove(name);
        }
        callbacks
    }

    pub fn count(&self, name: &str) -> usize {
        self.by_name.get(name).map_or(0, Vec::len)
    }
}

/// Call name -> its single handler.
#[derive(Default)]
pub(crate) struct CallerRegistry {
    handlers: HashMap<String, Arc<dyn CallHandler>>,
}

impl CallerRegistry {
    pub fn register(&mut self, name: &str, handler: Arc<dyn CallHandler>) -> Result<(), BridgeError> {
        if self.handlers.contains_key(name) {
            return Err(BridgeError::DuplicateHandler {
                name: name.to_string(),
            });
        }
        self.handlers.insert(name.to_string(), handler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CallHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}
