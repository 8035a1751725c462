//! Event types published to session subscribers.
//!
//! ## Wire shape
//!
//! | Type | JSON |
//! |------|------|
//! | `RecognitionEvent` | `{"seq":3,"text":"hello","isFinal":false,"raw":{...}}` |
//! | `ErrorPayload` | `{"kind":"CaptureFailed","message":"..."}` |
//! | `SessionEvent` | either of the above, tagged `"type": "recognition" \| "error"` |

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Recognition events
// ---------------------------------------------------------------------------

/// One recognition result, produced for a single captured frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionEvent {
    /// Sequence number of the frame that produced this event.
    pub seq: u64,
    /// Recognised text (final text if present, else partial text, else empty).
    pub text: String,
    /// `true` when the engine reported an utterance boundary for this frame.
    pub is_final: bool,
    /// Engine payload, verbatim.
    pub raw: Value,
}

impl RecognitionEvent {
    /// Build an event from an engine payload.
    pub fn from_payload(seq: u64, is_final: bool, raw: Value) -> Self {
        Self {
            seq,
            text: extract_text(&raw),
            is_final,
            raw,
        }
    }
}

/// Pull the display text out of an engine payload.
///
/// `"text"` wins over `"partial"`; anything else yields an empty string.
pub fn extract_text(payload: &Value) -> String {
    let field = payload.get("text").or_else(|| payload.get("partial"));
    match field {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Errors on the wire
// ---------------------------------------------------------------------------

/// Error categories reported to command callers and event subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Model load or recognizer creation failed.
    EngineInitError,
    /// Command issued before the session was initialised.
    NotReady,
    /// Capture device could not be opened or rejected the format.
    AudioUnavailable,
    /// Command issued after `dispose`.
    DisposedError,
    /// Capture device failed persistently while recording.
    CaptureFailed,
    /// Unknown command.
    NotImplemented,
    Internal,
}

/// `{kind, message}` pair used for command failures and error events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&crate::error::LivescribeError> for ErrorPayload {
    fn from(err: &crate::error::LivescribeError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Channel envelope
// ---------------------------------------------------------------------------

/// Envelope used by channel-backed sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SessionEvent {
    Recognition(RecognitionEvent),
    Error(ErrorPayload),
}

// ---------------------------------------------------------------------------
// Session status
// ---------------------------------------------------------------------------

/// Externally visible lifecycle state of a `RecognitionSession`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// No engine loaded yet.
    Uninitialized,
    /// Engine loaded, not capturing.
    Ready,
    /// Capture loop running.
    Recording,
    /// Terminal.
    Disposed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn final_text_preferred_over_partial() {
        let payload = json!({ "text": "turn left", "partial": "turn" });
        assert_eq!(extract_text(&payload), "turn left");
    }

    #[test]
    fn partial_text_used_when_no_final_field() {
        assert_eq!(extract_text(&json!({ "partial": "turn" })), "turn");
    }

    #[test]
    fn missing_fields_yield_empty_text() {
        assert_eq!(extract_text(&json!({ "result": [] })), "");
        assert_eq!(extract_text(&json!({ "text": null })), "");
        assert_eq!(extract_text(&Value::Null), "");
    }

    #[test]
    fn recognition_event_serializes_with_camel_case_and_raw_payload() {
        let raw = json!({ "text": "two coffees", "result": [{ "conf": 0.93 }] });
        let event = RecognitionEvent::from_payload(4, true, raw.clone());

        let value = serde_json::to_value(&event).expect("serialize recognition event");
        assert_eq!(value["seq"], 4);
        assert_eq!(value["text"], "two coffees");
        assert_eq!(value["isFinal"], true);
        assert_eq!(value["raw"], raw);
    }

    #[test]
    fn session_event_is_tagged_by_type() {
        let event = SessionEvent::Error(ErrorPayload {
            kind: ErrorKind::CaptureFailed,
            message: "device unplugged".into(),
        });

        let value = serde_json::to_value(&event).expect("serialize session event");
        assert_eq!(value["type"], "error");
        assert_eq!(value["kind"], "CaptureFailed");
        assert_eq!(value["message"], "device unplugged");

        let back: SessionEvent = serde_json::from_value(value).expect("deserialize session event");
        assert_eq!(back, event);
    }

    #[test]
    fn session_status_serializes_lowercase() {
        let json = serde_json::to_string(&SessionStatus::Recording).expect("serialize status");
        assert_eq!(json, "\"recording\"");
        assert!(serde_json::from_str::<SessionStatus>("\"Recording\"").is_err());
    }
}
