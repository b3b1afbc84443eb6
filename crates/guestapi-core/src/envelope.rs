//! Envelope decoder: one wire frame in, one [`Event`] out.
//!
//! Wire shape:
//! ```text
//! { "timestamp": "<string>", "type": "config" | "device", "metadata": { ... } }
//! ```
//! `timestamp` and `type` are mandatory. `metadata` may be absent (or `null`)
//! for a known type, which yields an event with an empty payload.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::DecodeError;
use crate::event::{Event, EventPayload, EventType};

/// Decode a raw frame into an [`Event`].
pub fn decode_event(bytes: &[u8]) -> Result<Event, DecodeError> {
    let envelope: Map<String, Value> =
        serde_json::from_slice(bytes).map_err(DecodeError::Envelope)?;
    decode_envelope(envelope)
}

/// Decode a text frame into an [`Event`].
pub fn decode_event_str(text: &str) -> Result<Event, DecodeError> {
    decode_event(text.as_bytes())
}

/// Decode an already-parsed JSON object into an [`Event`].
pub fn decode_envelope(mut envelope: Map<String, Value>) -> Result<Event, DecodeError> {
    let timestamp: String = required_field(&mut envelope, "timestamp")?;
    let type_name: String = required_field(&mut envelope, "type")?;
    let event_type: EventType = type_name.parse()?;

    let metadata = match envelope.remove("metadata") {
        None | Some(Value::Null) => None,
        Some(value) => Some(value),
    };

    let payload = match event_type {
        EventType::Config => EventPayload::Config(decode_metadata(event_type, metadata)?),
        EventType::Device => EventPayload::Device(decode_metadata(event_type, metadata)?),
    };

    Ok(Event { timestamp, payload })
}

fn required_field<T: DeserializeOwned>(
    envelope: &mut Map<String, Value>,
    field: &'static str,
) -> Result<T, DecodeError> {
    let value = envelope
        .remove(field)
        .ok_or(DecodeError::MissingField { field })?;
    serde_json::from_value(value).map_err(|source| DecodeError::InvalidField { field, source })
}

fn decode_metadata<T: DeserializeOwned>(
    event_type: EventType,
    metadata: Option<Value>,
) -> Result<Option<T>, DecodeError> {
    metadata
        .map(|value| {
            serde_json::from_value(value)
                .map_err(|source| DecodeError::InvalidMetadata { event_type, source })
        })
        .transpose()
}
