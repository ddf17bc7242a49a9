//! JSON codec for protocol envelopes
//!
//! Decoding happens in two steps. [`decode_envelope`] only resolves the
//! discriminator and keeps the body as an untyped [`Value`]; the body is
//! decoded again into a concrete type once the caller knows what the
//! discriminator implies ([`decode_channel_event`], [`decode_body`]).
//!
//! Structural field names are matched case-insensitively on decode. The
//! event payload itself is passed through untouched.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::message::{ChannelEvent, Envelope, MessageKind};

const ENVELOPE_FIELDS: &[&str] = &["type", "body"];
const CHANNEL_EVENT_FIELDS: &[&str] = &["id", "type", "body"];

/// Serialize an envelope to its textual wire form
pub fn encode_envelope<B>(kind: MessageKind, body: &B) -> Result<String, ProtocolError>
where
    B: Serialize + ?Sized,
{
    Ok(serde_json::to_string(&Envelope::new(kind, body))?)
}

/// Decode a complete inbound message, leaving the body undecoded
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope<Value>, ProtocolError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| ProtocolError::MalformedEnvelope(format!("invalid JSON: {e}")))?;

    let Value::Object(mut map) = value else {
        return Err(ProtocolError::MalformedEnvelope(
            "top-level value is not an object".to_string(),
        ));
    };
    fold_keys(&mut map, ENVELOPE_FIELDS);

    let kind = match map.remove("type") {
        Some(Value::String(token)) => token
            .parse::<MessageKind>()
            .map_err(|e| ProtocolError::MalformedEnvelope(e.to_string()))?,
        Some(other) => {
            return Err(ProtocolError::MalformedEnvelope(format!(
                "discriminator is not a string: {other}"
            )))
        }
        None => {
            return Err(ProtocolError::MalformedEnvelope(
                "missing type discriminator".to_string(),
            ))
        }
    };

    let body = map.remove("body").unwrap_or(Value::Null);
    Ok(Envelope { kind, body })
}

/// Decode the body of a `channel` envelope
pub fn decode_channel_event(body: Value) -> Result<ChannelEvent, ProtocolError> {
    let event: ChannelEvent = decode_body(body, CHANNEL_EVENT_FIELDS)?;
    if !event.payload.is_object() {
        return Err(ProtocolError::MalformedPayload(format!(
            "{} event on {} carries a non-object body",
            event.event_type, event.id
        )));
    }
    Ok(event)
}

/// Decode an opaque body into `T`, folding the given field names first
pub fn decode_body<T: DeserializeOwned>(body: Value, fields: &[&str]) -> Result<T, ProtocolError> {
    let Value::Object(mut map) = body else {
        return Err(ProtocolError::MalformedPayload(
            "body is not an object".to_string(),
        ));
    };
    fold_keys(&mut map, fields);
    serde_json::from_value(Value::Object(map))
        .map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
}

/// Rename keys that match a known field ignoring case to the canonical name.
///
/// A key already spelled canonically wins over a differently cased duplicate.
fn fold_keys(map: &mut Map<String, Value>, fields: &[&str]) {
    let renames: Vec<(String, &str)> = map
        .keys()
        .filter_map(|key| {
            fields
                .iter()
                .find(|field| field.eq_ignore_ascii_case(key) && **field != key.as_str())
                .map(|field| (key.clone(), *field))
        })
        .collect();

    for (from, to) in renames {
        if let Some(value) = map.remove(&from) {
            map.entry(to.to_string()).or_insert(value);
        }
    }
}
