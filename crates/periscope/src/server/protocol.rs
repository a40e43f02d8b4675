//! Wire Protocol
//!
//! The JSON frames exchanged with remote apps over the WebSocket. The
//! host only understands two inbound shapes: an `execute` call carrying a
//! plugin envelope, and an error report. Transport framing below this
//! layer is out of scope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use periscope_types::Envelope;

use crate::types::{Error, Result};

/// Inbound wire method the host accepts
pub const EXECUTE_METHOD: &str = "execute";

/// A parsed inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    /// `{"method": "execute", "params": {api, method, params}}`
    Execute { envelope: Envelope },

    /// `{"error": {...}}` - an error report from the remote app
    Report { error: Value },
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    method: Option<String>,
    params: Option<Value>,
    error: Option<Value>,
}

/// Parse one inbound text frame.
///
/// Unknown methods are a typed error surfaced to the caller; they never
/// touch queue state.
pub fn parse_frame(text: &str) -> Result<WireMessage> {
    let raw: RawFrame =
        serde_json::from_str(text).map_err(|e| Error::Protocol(format!("invalid frame: {e}")))?;

    if let Some(error) = raw.error {
        return Ok(WireMessage::Report { error });
    }

    match raw.method.as_deref() {
        Some(EXECUTE_METHOD) => {
            let params = raw
                .params
                .ok_or_else(|| Error::Protocol("execute frame missing params".to_string()))?;
            let envelope: Envelope = serde_json::from_value(params)
                .map_err(|e| Error::Protocol(format!("invalid envelope: {e}")))?;
            Ok(WireMessage::Execute { envelope })
        }
        Some(other) => Err(Error::UnsupportedCall(other.to_string())),
        None => Err(Error::Protocol(
            "frame has neither method nor error".to_string(),
        )),
    }
}

/// Outbound `execute` frame wrapping a plugin envelope
#[derive(Debug, Serialize)]
struct ExecuteFrame<'a> {
    method: &'static str,
    params: &'a Envelope,
}

/// Serialize an outbound envelope to its wire form
pub fn execute_frame(envelope: &Envelope) -> Result<String> {
    serde_json::to_string(&ExecuteFrame {
        method: EXECUTE_METHOD,
        params: envelope,
    })
    .map_err(|e| Error::Protocol(format!("failed to serialize envelope: {e}")))
}

/// Serialize an error reply for the remote app
pub fn error_frame(message: &str) -> String {
    serde_json::json!({ "error": { "message": message } }).to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_execute_frame() {
        let frame = r#"{"method":"execute","params":{"api":"logs","method":"entry","params":{"line":1}}}"#;
        match parse_frame(frame).unwrap() {
            WireMessage::Execute { envelope } => {
                assert_eq!(envelope.api, "logs");
                assert_eq!(envelope.method, "entry");
                assert_eq!(envelope.params["line"], 1);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_parse_error_report() {
        let frame = r#"{"error":{"message":"exception","stacktrace":"..."}}"#;
        match parse_frame(frame).unwrap() {
            WireMessage::Report { error } => {
                assert_eq!(error["message"], "exception");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_method_is_typed_error() {
        let frame = r#"{"method":"getBackgroundPlugins","params":{}}"#;
        assert!(matches!(
            parse_frame(frame),
            Err(Error::UnsupportedCall(method)) if method == "getBackgroundPlugins"
        ));
    }

    #[test]
    fn test_invalid_json_is_protocol_error() {
        assert!(matches!(parse_frame("not json"), Err(Error::Protocol(_))));
        assert!(matches!(parse_frame(r#"{"params":{}}"#), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_execute_frame_roundtrip() {
        let envelope = Envelope::new("logs", "entry", serde_json::json!({"line": 7}));
        let text = execute_frame(&envelope).unwrap();
        match parse_frame(&text).unwrap() {
            WireMessage::Execute { envelope: parsed } => assert_eq!(parsed, envelope),
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
