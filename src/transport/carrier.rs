//! Frame codecs for shared channels.
//!
//! Sockets carry other traffic besides bridge envelopes, so envelopes travel
//! wrapped as `{ "relayDevTools": <envelope> }`. Window messages are tagged
//! with a `source` string and filtered on receipt.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::TransportError;
use crate::bridge::Envelope;

pub const RELAY_CARRIER_KEY: &str = "relayDevTools";

/// Serialize an envelope into a socket frame.
pub fn encode_relay_frame(envelope: &Envelope) -> Result<String, TransportError> {
    let mut carrier = Map::new();
    carrier.insert(
        RELAY_CARRIER_KEY.to_string(),
        serde_json::to_value(envelope).map_err(TransportError::codec)?,
    );
    serde_json::to_string(&Value::Object(carrier)).map_err(TransportError::codec)
}

/// Decode a socket frame.
///
/// Returns `Ok(None)` for frames that are not bridge traffic (not JSON, or
/// JSON without the carrier key). A frame that does carry an envelope but
/// cannot be decoded is an error.
pub fn decode_relay_frame(frame: &str) -> Result<Option<Envelope>, TransportError> {
    let Ok(value) = serde_json::from_str::<Value>(frame) else {
        return Ok(None);
    };
    let Value::Object(mut carrier) = value else {
        return Ok(None);
    };
    let Some(inner) = carrier.remove(RELAY_CARRIER_KEY) else {
        return Ok(None);
    };
    Envelope::from_value(inner)
        .map(Some)
        .map_err(TransportError::codec)
}

/// A window message tagged with the context that posted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedMessage {
    pub source: String,
    pub payload: Envelope,
}

impl TaggedMessage {
    pub fn new(source: impl Into<String>, payload: Envelope) -> Self {
        Self {
            source: source.into(),
            payload,
        }
    }

    pub fn to_value(&self) -> Result<Value, TransportError> {
        serde_json::to_value(self).map_err(TransportError::codec)
    }

    /// Accept a posted message only if it came from `expected_source`.
    ///
    /// Messages from other sources, or without a source tag, are `Ok(None)`.
    pub fn accept(message: &Value, expected_source: &str) -> Result<Option<Envelope>, TransportError> {
        let source = message.get("source").and_then(Value::as_str);
        if source != Some(expected_source) {
            return Ok(None);
        }
        let payload = message
            .get("payload")
            .cloned()
            .ok_or_else(|| TransportError::Codec("tagged message without payload".to_string()))?;
        Envelope::from_value(payload)
            .map(Some)
            .map_err(TransportError::codec)
    }
}
