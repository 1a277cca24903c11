//! Pacemaker Wire Envelope
//!
//! Single responsibility: Encode and decode messages in the msgpack envelope.
//!
//! # Wire Format
//!
//! ```text
//! {
//!     "id": <i32>,       // Correlation id, -1 when unassigned
//!     "type": <string>,  // request | response | sasl_token | sasl_complete | not_authorized
//!     "data": <binary>,  // Opaque body
//! }
//! ```

use rmpv::Value;
use std::io::Cursor;

use crate::error::PacemakerError;
use crate::message::{HeartbeatMessage, MessageKind};

/// Encode a message into wire format.
pub fn encode_message(message: &HeartbeatMessage) -> Result<Vec<u8>, PacemakerError> {
    use rmpv::encode::write_value;

    let envelope = Value::Map(vec![
        (
            Value::String("id".into()),
            Value::Integer(message.message_id().into()),
        ),
        (
            Value::String("type".into()),
            Value::String(message.kind().as_str().into()),
        ),
        (
            Value::String("data".into()),
            Value::Binary(message.body().to_vec()),
        ),
    ]);

    let mut bytes = Vec::new();
    write_value(&mut bytes, &envelope)
        .map_err(|e| PacemakerError::Protocol(format!("Failed to encode envelope: {}", e)))?;

    Ok(bytes)
}

/// Decode a message from wire format.
///
/// Frames larger than `max_bytes` are rejected before parsing.
pub fn decode_message(data: &[u8], max_bytes: usize) -> Result<HeartbeatMessage, PacemakerError> {
    use rmpv::decode::read_value;

    if data.len() > max_bytes {
        return Err(PacemakerError::Protocol(format!(
            "Message of {} bytes exceeds limit of {}",
            data.len(),
            max_bytes
        )));
    }

    let mut cursor = Cursor::new(data);
    let value = read_value(&mut cursor)
        .map_err(|e| PacemakerError::Protocol(format!("Failed to decode message: {}", e)))?;

    let map = value
        .as_map()
        .ok_or_else(|| PacemakerError::Protocol("Message is not a map".into()))?;

    let id = map
        .iter()
        .find(|(k, _)| k.as_str() == Some("id"))
        .and_then(|(_, v)| v.as_i64())
        .ok_or_else(|| PacemakerError::Protocol("Message missing 'id' field".into()))?;
    let id = i32::try_from(id)
        .map_err(|_| PacemakerError::Protocol(format!("Message id {} out of range", id)))?;

    let kind_name = map
        .iter()
        .find(|(k, _)| k.as_str() == Some("type"))
        .and_then(|(_, v)| v.as_str())
        .ok_or_else(|| PacemakerError::Protocol("Message missing 'type' field".into()))?;
    let kind = MessageKind::parse(kind_name)
        .ok_or_else(|| PacemakerError::Protocol(format!("Unknown message type: {}", kind_name)))?;

    let body = map
        .iter()
        .find(|(k, _)| k.as_str() == Some("data"))
        .map(|(_, v)| v.as_slice().map(|s| s.to_vec()).unwrap_or_default())
        .ok_or_else(|| PacemakerError::Protocol("Message missing 'data' field".into()))?;

    Ok(HeartbeatMessage::new(kind, body).with_message_id(id))
}
