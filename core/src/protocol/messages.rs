//! Envelope encoding and the legacy-tolerant decoder

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::constants::{PROTOCOL_CLIPBOARD, PROTOCOL_KVM};
use super::input::InputEvent;

/// Payloads carried in a structured envelope.
///
/// Serializes as `{"protocol": "clipboard", "data": "..."}` or
/// `{"protocol": "kvm", "data": {"type": "...", ...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "protocol", content = "data", rename_all = "lowercase")]
pub enum Payload {
    Clipboard(String),
    Kvm(InputEvent),
}

impl Payload {
    /// The envelope's `protocol` tag.
    pub fn protocol(&self) -> &'static str {
        match self {
            Payload::Clipboard(_) => PROTOCOL_CLIPBOARD,
            Payload::Kvm(_) => PROTOCOL_KVM,
        }
    }
}

/// Result of decoding one frame's payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A well-formed envelope for a known protocol.
    Structured(Payload),
    /// Anything that is not an envelope. The text is clipboard content.
    Legacy(String),
    /// An envelope whose `protocol` this build does not speak.
    Unknown { protocol: String },
    /// An envelope for a known protocol whose `data` does not fit it.
    Malformed { protocol: &'static str, reason: String },
}

/// Serialize a payload into envelope bytes (UTF-8 JSON).
pub fn encode(payload: &Payload) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(payload)
}

/// Decode a frame payload. Never fails.
///
/// Invalid UTF-8 is replaced lossily. Bytes that are not a JSON object with
/// a `protocol` key are treated as legacy plaintext clipboard content, so
/// peers that only send raw text keep working.
pub fn decode(bytes: &[u8]) -> Decoded {
    let text = String::from_utf8_lossy(bytes);

    let mut object = match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(object)) if object.contains_key("protocol") => object,
        _ => return Decoded::Legacy(text.into_owned()),
    };

    let data = object.remove("data").unwrap_or(Value::Null);
    let protocol = match object.remove("protocol") {
        Some(Value::String(protocol)) => protocol,
        Some(other) => other.to_string(),
        None => return Decoded::Legacy(text.into_owned()),
    };

    match protocol.as_str() {
        PROTOCOL_CLIPBOARD => match data {
            Value::String(text) => Decoded::Structured(Payload::Clipboard(text)),
            // Scalars are copied as their text, as older peers do
            scalar @ (Value::Number(_) | Value::Bool(_)) => {
                Decoded::Structured(Payload::Clipboard(scalar.to_string()))
            }
            other => Decoded::Malformed {
                protocol: PROTOCOL_CLIPBOARD,
                reason: format!("expected string data, got {}", json_kind(&other)),
            },
        },
        PROTOCOL_KVM => match decode_input_event(data) {
            Ok(event) => Decoded::Structured(Payload::Kvm(event)),
            Err(reason) => Decoded::Malformed {
                protocol: PROTOCOL_KVM,
                reason,
            },
        },
        _ => Decoded::Unknown { protocol },
    }
}

/// Input events arrive either as a nested object or, from older peers, as a
/// string containing the event's JSON.
fn decode_input_event(data: Value) -> Result<InputEvent, String> {
    let value = match data {
        Value::String(inner) => serde_json::from_str(&inner).map_err(|e| e.to_string())?,
        other => other,
    };
    serde_json::from_value(value).map_err(|e| e.to_string())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
