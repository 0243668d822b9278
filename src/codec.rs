//! socket.io v0.9 envelope codec.
//!
//! Inbound text frames are discriminated by their leading type digit:
//!
//! - `'1'` — connection acknowledged, no payload
//! - `'2'` — heartbeat; must be echoed back verbatim as `"2::"`
//! - `'5'` — event frame: the fixed `"5:::"` prefix followed by a JSON
//!   envelope `{"name":"message","args":[{"method":...,"params":{...}}]}`
//!
//! Anything else decodes to [`Frame::Unknown`] carrying the raw text for
//! diagnostics — unknown frame types are never an error. Malformed JSON
//! inside a `'5'` frame is a [`FrameDecodeError`]; callers log it and drop
//! the frame rather than tearing down the connection, since the upstream
//! servers are occasionally noncompliant.
//!
//! The viewer socket speaks the same `{method, params}` bodies but without
//! the envelope framing; [`decode_bare`] handles that variant.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Literal reply written for every inbound heartbeat frame.
pub const ECHO_REPLY: &str = "2::";

/// Fixed prefix of an event frame.
const EVENT_PREFIX: &str = "5:::";

/// The `method` + `params` body carried by an event frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBody {
    /// Protocol method, e.g. `"loginMsg"`, `"chatMsg"`, `"infoMsg"`.
    pub method: String,
    /// Method parameters; shape depends on the method.
    #[serde(default)]
    pub params: Value,
}

/// One decoded unit of the wire protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Handshake acknowledgement (`"1::"`).
    Connected,
    /// Heartbeat ping (`"2::"`); expects an immediate [`ECHO_REPLY`].
    Echo,
    /// Event frame carrying a method + params body.
    Event(EventBody),
    /// Unrecognized frame type, kept raw for diagnostic logging.
    Unknown(String),
}

/// Malformed payload inside an otherwise recognized frame.
///
/// Recovered locally by the session loops (logged, frame dropped); never
/// surfaced to callers.
#[derive(Debug)]
pub struct FrameDecodeError(String);

impl std::fmt::Display for FrameDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame decode error: {}", self.0)
    }
}

impl std::error::Error for FrameDecodeError {}

/// Outer envelope of an event frame. The `name` field is always
/// `"message"` in practice and is not validated.
#[derive(Deserialize)]
struct Envelope {
    args: Vec<Value>,
}

/// Decode one inbound text frame.
///
/// # Errors
///
/// Returns [`FrameDecodeError`] only for a `'5'` frame whose JSON payload is
/// malformed or missing its `args`; unknown leading characters are `Ok`.
pub fn decode(raw: &str) -> Result<Frame, FrameDecodeError> {
    match raw.chars().next() {
        Some('1') => Ok(Frame::Connected),
        Some('2') => Ok(Frame::Echo),
        Some('5') => decode_event(raw).map(Frame::Event),
        _ => Ok(Frame::Unknown(raw.to_string())),
    }
}

fn decode_event(raw: &str) -> Result<EventBody, FrameDecodeError> {
    let body = raw
        .get(EVENT_PREFIX.len()..)
        .ok_or_else(|| FrameDecodeError("event frame shorter than its prefix".to_string()))?;

    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| FrameDecodeError(format!("invalid event envelope: {e}")))?;

    let first = envelope
        .args
        .into_iter()
        .next()
        .ok_or_else(|| FrameDecodeError("event frame has no args".to_string()))?;

    decode_arg(first)
}

/// Servers have been observed sending `args[0]` both as an inline object and
/// as a JSON-encoded string; accept both.
fn decode_arg(arg: Value) -> Result<EventBody, FrameDecodeError> {
    match arg {
        Value::String(inner) => serde_json::from_str(&inner)
            .map_err(|e| FrameDecodeError(format!("invalid string-encoded event body: {e}"))),
        other => serde_json::from_value(other)
            .map_err(|e| FrameDecodeError(format!("invalid event body: {e}"))),
    }
}

/// Decode a bare `{method, params}` body, as spoken on the viewer socket.
///
/// # Errors
///
/// Returns [`FrameDecodeError`] if the text is not a valid body.
pub fn decode_bare(raw: &str) -> Result<EventBody, FrameDecodeError> {
    serde_json::from_str(raw)
        .map_err(|e| FrameDecodeError(format!("invalid viewer message: {e}")))
}

/// Encode an event frame: `"5:::"` plus the compact JSON envelope.
pub fn encode_event(body: &EventBody) -> String {
    let envelope = serde_json::json!({ "name": "message", "args": [body] });
    format!("{EVENT_PREFIX}{envelope}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_connected() {
        assert_eq!(decode("1::").unwrap(), Frame::Connected);
    }

    #[test]
    fn test_decode_echo() {
        assert_eq!(decode("2::").unwrap(), Frame::Echo);
    }

    #[test]
    fn test_decode_event_inline_object() {
        let raw = r#"5:::{"name":"message","args":[{"method":"loginMsg","params":{"role":"user"}}]}"#;
        let Frame::Event(body) = decode(raw).unwrap() else {
            panic!("expected event frame");
        };
        assert_eq!(body.method, "loginMsg");
        assert_eq!(body.params["role"], "user");
    }

    #[test]
    fn test_decode_event_string_encoded_arg() {
        let raw = r#"5:::{"name":"message","args":["{\"method\":\"chatMsg\",\"params\":{\"text\":\"hi\"}}"]}"#;
        let Frame::Event(body) = decode(raw).unwrap() else {
            panic!("expected event frame");
        };
        assert_eq!(body.method, "chatMsg");
        assert_eq!(body.params["text"], "hi");
    }

    #[test]
    fn test_decode_unknown_is_not_an_error() {
        let frame = decode("7:::whatever").unwrap();
        assert_eq!(frame, Frame::Unknown("7:::whatever".to_string()));

        let frame = decode("").unwrap();
        assert_eq!(frame, Frame::Unknown(String::new()));
    }

    #[test]
    fn test_decode_malformed_event_is_an_error() {
        assert!(decode("5:::not json").is_err());
        assert!(decode(r#"5:::{"name":"message","args":[]}"#).is_err());
        assert!(decode("5:").is_err());
    }

    #[test]
    fn test_encode_event_shape() {
        let body = EventBody {
            method: "joinChannel".to_string(),
            params: json!({"channel": "mychannel"}),
        };
        let encoded = encode_event(&body);
        assert!(encoded.starts_with("5:::"));

        let envelope: Value = serde_json::from_str(&encoded[4..]).unwrap();
        assert_eq!(envelope["name"], "message");
        assert_eq!(envelope["args"][0]["method"], "joinChannel");
        assert_eq!(envelope["args"][0]["params"]["channel"], "mychannel");
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let body = EventBody {
            method: "chatMsg".to_string(),
            params: json!({"text": "hello", "name": "someone"}),
        };
        let decoded = decode(&encode_event(&body)).unwrap();
        assert_eq!(decoded, Frame::Event(body));
    }

    #[test]
    fn test_decode_bare_viewer_message() {
        let body = decode_bare(r#"{"method":"infoMsg","params":{"online":true,"viewers":3}}"#)
            .unwrap();
        assert_eq!(body.method, "infoMsg");
        assert_eq!(body.params["viewers"], 3);

        assert!(decode_bare("1::").is_err());
    }
}
