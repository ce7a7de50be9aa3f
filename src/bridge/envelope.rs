//! Wire format shared by both ends of a bridge.
//!
//! The JSON shape is fixed for interop with other implementations:
//!
//! ```text
//! { "type": "event",   "name": ..., "data": ... }
//! { "type": "call",    "nonce": ..., "name": ..., "args": [...] }
//! { "type": "resolve", "nonce": ..., "value": ... }
//! { "type": "reject",  "nonce": ..., "error": "..." }
//! { "type": "pause" }
//! { "type": "resume" }
//! { "type": "batch",   "messages": [...] }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BridgeError;

/// Identifier correlating a `call` with its `resolve`/`reject`.
pub type Nonce = u64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    Event {
        name: String,
        #[serde(default)]
        data: Value,
    },
    Call {
        nonce: Nonce,
        name: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    Resolve {
        nonce: Nonce,
        #[serde(default)]
        value: Value,
    },
    Reject {
        nonce: Nonce,
        error: String,
    },
    Pause,
    Resume,
    Batch {
        messages: Vec<Envelope>,
    },
}

const KNOWN_TYPES: &[&str] = &[
    "event", "call", "resolve", "reject", "pause", "resume", "batch",
];

/// Reject unknown `type` tags, including those of batch members at any depth.
fn check_type_tags(value: &Value) -> Result<(), BridgeError> {
    let tag = value.get("type").and_then(Value::as_str);
    match tag {
        None => Err(BridgeError::UnknownEnvelope(
            "missing 'type' field".to_string(),
        )),
        Some(tag) if !KNOWN_TYPES.contains(&tag) => {
            Err(BridgeError::UnknownEnvelope(format!("type '{tag}'")))
        }
        Some("batch") => match value.get("messages").and_then(Value::as_array) {
            Some(messages) => messages.iter().try_for_each(check_type_tags),
            // Let serde report the malformed batch.
            None => Ok(()),
        },
        Some(_) => Ok(()),
    }
}

impl Envelope {
    pub fn event(name: impl Into<String>, data: Value) -> Self {
        Envelope::Event {
            name: name.into(),
            data,
        }
    }

    /// Wrap a flushed chunk. A single envelope is sent as-is.
    pub fn batch(mut messages: Vec<Envelope>) -> Self {
        if messages.len() == 1 {
            return messages.remove(0);
        }
        Envelope::Batch { messages }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Event { .. } => "event",
            Envelope::Call { .. } => "call",
            Envelope::Resolve { .. } => "resolve",
            Envelope::Reject { .. } => "reject",
            Envelope::Pause => "pause",
            Envelope::Resume => "resume",
            Envelope::Batch { .. } => "batch",
        }
    }

    /// Decode an envelope from untyped JSON.
    ///
    /// An unrecognized `type` tag is a protocol mismatch between peers and is
    /// reported as `UnknownEnvelope` rather than a generic parse failure.
    pub fn from_value(value: Value) -> Result<Self, BridgeError> {
        check_type_tags(&value)?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_value(&self) -> Result<Value, BridgeError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Push this envelope onto `out`, unwrapping batches in array order.
    ///
    /// Returns the number of nested batches that were flattened.
    pub(crate) fn flatten_into(self, out: &mut Vec<Envelope>) -> usize {
        match self {
            Envelope::Batch { messages } => {
                let mut nested = 0;
                for message in messages {
                    if matches!(message, Envelope::Batch { .. }) {
                        nested += 1;
                    }
                    nested += message.flatten_into(out);
                }
                nested
            }
            other => {
                out.push(other);
                0
            }
        }
    }
}
