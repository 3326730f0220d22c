//! Wire event envelope
//!
//! Every frame carries exactly one event encoded as a two-element JSON array:
//!
//! ```text
//! ["chat:message", {"from": "A", "message": "hi"}]
//! ```
//!
//! The first element is the event type, the second an arbitrary JSON payload.
//! The object form (`{"type": ..., "payload": ...}`) is not accepted.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::CodecError;

/// Separator between namespace and action in an event type
pub const TYPE_SEPARATOR: char = ':';

/// A single protocol event: `(type, payload)`
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Event type, `namespace:action` by convention
    pub event_type: String,
    /// Opaque payload
    pub payload: Value,
}

impl Event {
    /// Create an event from an already-built JSON payload
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }

    /// Create an event from any serializable payload
    pub fn with_payload<T: Serialize + ?Sized>(
        event_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, CodecError> {
        let payload = serde_json::to_value(payload).map_err(CodecError::Encode)?;
        Ok(Self::new(event_type, payload))
    }

    /// Decode a frame into an event
    ///
    /// The frame is whitespace-normalized first (see [`normalize`]).
    pub fn decode(frame: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(&normalize(frame)).map_err(CodecError::Decode)
    }

    /// Encode this event as a text frame
    pub fn encode(&self) -> Result<String, CodecError> {
        serde_json::to_string(self).map_err(CodecError::Encode)
    }

    /// Deserialize the payload into a typed value
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        T::deserialize(&self.payload).map_err(CodecError::Decode)
    }

    /// Part of the type before the first `:` (`chat` in `chat:message`)
    pub fn namespace(&self) -> &str {
        self.event_type
            .split_once(TYPE_SEPARATOR)
            .map_or(self.event_type.as_str(), |(namespace, _)| namespace)
    }

    /// Part of the type after the first `:` (`chat` in `subscribe:chat`)
    pub fn action(&self) -> Option<&str> {
        self.event_type
            .split_once(TYPE_SEPARATOR)
            .map(|(_, action)| action)
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.event_type, &self.payload).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (event_type, payload) = <(String, Value)>::deserialize(deserializer)?;
        Ok(Self {
            event_type,
            payload,
        })
    }
}

/// Replace newlines with spaces and trim surrounding ASCII whitespace
pub fn normalize(frame: &[u8]) -> Vec<u8> {
    let start = frame
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(frame.len());
    let end = frame
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);

    frame[start..end]
        .iter()
        .map(|&b| if b == b'\n' { b' ' } else { b })
        .collect()
}
