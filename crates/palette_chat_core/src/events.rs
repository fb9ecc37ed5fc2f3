//! crates/palette_chat_core/src/events.rs
//!
//! Decodes host-pushed `(action, data)` pairs into a closed set of events.
//! Decoding happens once at the boundary; everything past it matches on
//! `HostEvent` instead of comparing action strings.

use serde::Deserialize;

use crate::domain::AuthUser;
use crate::envelope::{parse_bridge_reply, ParsedReply};

pub const CHAT_RESPONSE: &str = "chatResponse";
pub const AUTH_COMPLETE: &str = "authComplete";
pub const COMMAND_RESULT: &str = "commandResult";
pub const UPDATE_PROMPT: &str = "updatePrompt";

/// The payload of an `authComplete` event.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AuthCompletion {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub user: Option<AuthUser>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CommandResultPayload {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// Asynchronous completion of a chat request. An unparsable envelope is
    /// still a completion, carried as a protocol failure.
    ChatResponse(ParsedReply),
    AuthComplete(AuthCompletion),
    CommandResult { message: Option<String> },
    UpdatePrompt(String),
    Unknown { action: String },
}

#[derive(Debug, thiserror::Error)]
pub enum EventDecodeError {
    #[error("Malformed {action} payload: {source}")]
    Malformed {
        action: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl HostEvent {
    pub fn decode(action: &str, data: &str) -> Result<Self, EventDecodeError> {
        match action {
            CHAT_RESPONSE => Ok(HostEvent::ChatResponse(parse_bridge_reply(data))),
            AUTH_COMPLETE => serde_json::from_str::<AuthCompletion>(data)
                .map(HostEvent::AuthComplete)
                .map_err(|source| EventDecodeError::Malformed {
                    action: AUTH_COMPLETE,
                    source,
                }),
            COMMAND_RESULT => serde_json::from_str::<CommandResultPayload>(data)
                .map(|payload| HostEvent::CommandResult {
                    message: payload.message,
                })
                .map_err(|source| EventDecodeError::Malformed {
                    action: COMMAND_RESULT,
                    source,
                }),
            UPDATE_PROMPT => Ok(HostEvent::UpdatePrompt(data.to_string())),
            other => Ok(HostEvent::Unknown {
                action: other.to_string(),
            }),
        }
    }

    /// The action name this event was decoded from.
    pub fn action(&self) -> &str {
        match self {
            HostEvent::ChatResponse(_) => CHAT_RESPONSE,
            HostEvent::AuthComplete(_) => AUTH_COMPLETE,
            HostEvent::CommandResult { .. } => COMMAND_RESULT,
            HostEvent::UpdatePrompt(_) => UPDATE_PROMPT,
            HostEvent::Unknown { action } => action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{BridgeReply, ChatOutcome, ChatFailure};

    #[test]
    fn decodes_auth_complete() {
        let event = HostEvent::decode(
            AUTH_COMPLETE,
            r#"{"success": true, "user": {"is_authenticated": true, "user_email": "a@b.c"}}"#,
        )
        .unwrap();
        let HostEvent::AuthComplete(completion) = event else {
            panic!("expected authComplete");
        };
        assert!(completion.success);
        let user = completion.user.unwrap();
        assert!(user.is_authenticated);
        assert_eq!(user.user_email.as_deref(), Some("a@b.c"));
        assert_eq!(user.user_name, None);
    }

    #[test]
    fn malformed_chat_response_is_a_protocol_failure() {
        let event = HostEvent::decode(CHAT_RESPONSE, "{oops").unwrap();
        let HostEvent::ChatResponse(parsed) = event else {
            panic!("expected chatResponse");
        };
        assert!(matches!(
            parsed.reply,
            BridgeReply::Completed(ChatOutcome::Failure(ChatFailure::Protocol { .. }))
        ));
    }

    #[test]
    fn malformed_command_result_is_an_error() {
        let err = HostEvent::decode(COMMAND_RESULT, "not json").unwrap_err();
        assert!(err.to_string().starts_with("Malformed commandResult payload"));
    }

    #[test]
    fn update_prompt_keeps_raw_text() {
        let event = HostEvent::decode(UPDATE_PROMPT, "Select a face").unwrap();
        assert_eq!(event, HostEvent::UpdatePrompt("Select a face".to_string()));
    }

    #[test]
    fn unknown_action_is_accepted() {
        let event = HostEvent::decode("debugger", "").unwrap();
        assert_eq!(event.action(), "debugger");
        assert!(matches!(event, HostEvent::Unknown { .. }));
    }
}
