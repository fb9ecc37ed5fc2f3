//! crates/palette_chat_core/src/envelope.rs
//!
//! Parses the success/failure envelope the host returns for a chat request
//! (either directly from the bridge call or later as a `chatResponse` event)
//! and reduces it to a typed outcome.

use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;

use crate::domain::{RequestToken, ToolExecutionResult};

/// Shown when an envelope carries no usable reply text at all.
pub const NO_RESPONSE_TEXT: &str = "No response text";

const UNKNOWN_ERROR: &str = "Unknown error";

//=========================================================================================
// Wire Envelope
//=========================================================================================

/// The envelope exactly as the host serializes it. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatEnvelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub response: Option<Value>,
    #[serde(default)]
    pub message: Option<Value>,
    #[serde(default)]
    pub code: Option<Value>,
    #[serde(default)]
    pub tool_calls: Option<Vec<Value>>,
    #[serde(default)]
    pub execution_results: Option<Vec<ToolExecutionResult>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ChatEnvelope {
    pub fn is_processing(&self) -> bool {
        self.success && self.status.as_deref() == Some("processing")
    }

    /// The echoed correlation token, when the host sent a well-formed one.
    pub fn request_token(&self) -> Option<RequestToken> {
        self.request_id
            .as_deref()
            .and_then(|id| RequestToken::from_str(id).ok())
    }

    pub fn into_reply(self) -> BridgeReply {
        if self.is_processing() {
            return BridgeReply::Processing;
        }
        if !self.success {
            let reason = self
                .error
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| UNKNOWN_ERROR.to_string());
            return BridgeReply::Completed(ChatOutcome::Failure(ChatFailure::Rejected(reason)));
        }
        let text = normalize_reply_text(&self);
        BridgeReply::Completed(ChatOutcome::Success(ChatReply {
            text,
            tool_calls: self.tool_calls.unwrap_or_default(),
            execution_results: self.execution_results.unwrap_or_default(),
        }))
    }
}

//=========================================================================================
// Typed Outcomes
//=========================================================================================

/// A successful answer to a chat request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub text: String,
    pub tool_calls: Vec<Value>,
    pub execution_results: Vec<ToolExecutionResult>,
}

impl ChatReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
            execution_results: Vec::new(),
        }
    }
}

/// Why a chat request ended without an answer. Always terminal for that request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChatFailure {
    /// The host answered with `success: false`.
    #[error("{0}")]
    Rejected(String),
    #[error("{0}")]
    Transport(String),
    #[error("Host bridge is not available")]
    Unavailable,
    #[error("No response from host after {0}s")]
    TimedOut(u64),
    /// The reply could not be parsed as an envelope.
    #[error("Malformed host response: {reason}")]
    Protocol { raw: String, reason: String },
}

impl ChatFailure {
    /// The text appended to the transcript for this failure. A malformed
    /// reply is shown verbatim since it is often plain prose from the host.
    pub fn display_text(&self) -> String {
        match self {
            ChatFailure::Protocol { raw, .. } if !raw.trim().is_empty() => raw.trim().to_string(),
            other => format!("Error: {other}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatOutcome {
    Success(ChatReply),
    Failure(ChatFailure),
}

/// What a single host reply means for the pending request.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeReply {
    /// The host accepted the request; the answer will arrive as a `chatResponse` event.
    Processing,
    Completed(ChatOutcome),
}

/// A raw host reply after parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    pub request_id: Option<RequestToken>,
    pub reply: BridgeReply,
    pub raw: String,
}

/// Parses a raw reply. Anything that is not a JSON envelope becomes a
/// `ChatFailure::Protocol` carrying the raw text.
pub fn parse_bridge_reply(raw: &str) -> ParsedReply {
    match serde_json::from_str::<ChatEnvelope>(raw) {
        Ok(envelope) => ParsedReply {
            request_id: envelope.request_token(),
            reply: envelope.into_reply(),
            raw: raw.to_string(),
        },
        Err(e) => ParsedReply {
            request_id: None,
            reply: BridgeReply::Completed(ChatOutcome::Failure(ChatFailure::Protocol {
                raw: raw.to_string(),
                reason: e.to_string(),
            })),
            raw: raw.to_string(),
        },
    }
}

//=========================================================================================
// Reply Text Normalization
//=========================================================================================

/// Extracts the reply text from an envelope. First non-empty wins:
/// `response` as text; `response.message`, `response.code` or the serialized
/// object when `response` is an object; top-level `message`; top-level `code`;
/// finally [`NO_RESPONSE_TEXT`].
pub fn normalize_reply_text(envelope: &ChatEnvelope) -> String {
    primary_text(envelope.response.as_ref())
        .or_else(|| envelope.message.as_ref().and_then(truthy_text))
        .or_else(|| envelope.code.as_ref().and_then(truthy_text))
        .unwrap_or_else(|| NO_RESPONSE_TEXT.to_string())
}

fn primary_text(response: Option<&Value>) -> Option<String> {
    match response? {
        Value::Object(fields) => Some(
            fields
                .get("message")
                .and_then(truthy_text)
                .or_else(|| fields.get("code").and_then(truthy_text))
                .unwrap_or_else(|| Value::Object(fields.clone()).to_string()),
        ),
        other => truthy_text(other),
    }
}

/// Null, `false`, zero and the empty string count as absent.
fn truthy_text(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::Bool(true) => Some("true".to_string()),
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) if n.as_f64() == Some(0.0) => None,
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(value: Value) -> ChatEnvelope {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn nested_message_beats_nested_code() {
        let env = envelope(json!({"response": {"message": "M", "code": "C"}}));
        assert_eq!(normalize_reply_text(&env), "M");
    }

    #[test]
    fn nested_code_when_message_missing() {
        let env = envelope(json!({"response": {"code": "C"}}));
        assert_eq!(normalize_reply_text(&env), "C");
    }

    #[test]
    fn nested_object_without_text_is_serialized() {
        let env = envelope(json!({"response": {"shape": "gear"}, "message": "ignored"}));
        assert_eq!(normalize_reply_text(&env), r#"{"shape":"gear"}"#);
    }

    #[test]
    fn empty_response_falls_back_to_message() {
        let env = envelope(json!({"response": "", "message": "Fallback"}));
        assert_eq!(normalize_reply_text(&env), "Fallback");
    }

    #[test]
    fn code_is_the_last_fallback() {
        let env = envelope(json!({"response": null, "message": "", "code": "print(1)"}));
        assert_eq!(normalize_reply_text(&env), "print(1)");
    }

    #[test]
    fn empty_envelope_uses_placeholder() {
        assert_eq!(normalize_reply_text(&envelope(json!({}))), NO_RESPONSE_TEXT);
    }

    #[test]
    fn processing_status_is_not_a_completion() {
        let parsed = parse_bridge_reply(r#"{"success": true, "status": "processing"}"#);
        assert_eq!(parsed.reply, BridgeReply::Processing);
    }

    #[test]
    fn unsuccessful_envelope_is_rejected_with_error_text() {
        let parsed = parse_bridge_reply(r#"{"success": false, "error": "backend down"}"#);
        assert_eq!(
            parsed.reply,
            BridgeReply::Completed(ChatOutcome::Failure(ChatFailure::Rejected(
                "backend down".to_string()
            )))
        );

        let parsed = parse_bridge_reply(r#"{"success": false}"#);
        assert_eq!(
            parsed.reply,
            BridgeReply::Completed(ChatOutcome::Failure(ChatFailure::Rejected(
                UNKNOWN_ERROR.to_string()
            )))
        );
    }

    #[test]
    fn success_carries_tools_and_results() {
        let parsed = parse_bridge_reply(
            r#"{
                "success": true,
                "response": "Built it",
                "tool_calls": [{"name": "create_box"}],
                "execution_results": [{"tool_name": "create_box", "success": true, "message": "ok"}]
            }"#,
        );
        let BridgeReply::Completed(ChatOutcome::Success(reply)) = parsed.reply else {
            panic!("expected a successful reply");
        };
        assert_eq!(reply.text, "Built it");
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.execution_results[0].tool_name, "create_box");
        assert!(reply.execution_results[0].succeeded);
    }

    #[test]
    fn unparsable_reply_is_a_protocol_failure_showing_raw_text() {
        let parsed = parse_bridge_reply("the host said hello");
        let BridgeReply::Completed(ChatOutcome::Failure(failure)) = parsed.reply else {
            panic!("expected a failure");
        };
        assert!(matches!(failure, ChatFailure::Protocol { .. }));
        assert_eq!(failure.display_text(), "the host said hello");
    }

    #[test]
    fn echoed_request_id_is_recovered() {
        let token = RequestToken::new();
        let parsed = parse_bridge_reply(&format!(
            r#"{{"success": true, "response": "hi", "request_id": "{token}"}}"#
        ));
        assert_eq!(parsed.request_id, Some(token));

        let parsed = parse_bridge_reply(r#"{"success": true, "request_id": "not-a-token"}"#);
        assert_eq!(parsed.request_id, None);
    }

    #[test]
    fn failure_text_is_prefixed() {
        assert_eq!(ChatFailure::TimedOut(30).display_text(), "Error: No response from host after 30s");
        assert_eq!(
            ChatFailure::Protocol { raw: "  ".into(), reason: "EOF".into() }.display_text(),
            "Error: Malformed host response: EOF"
        );
    }
}
