//! crates/palette_chat_core/src/domain.rs
//!
//! Defines the pure, core data structures of a palette conversation.
//! These types carry no transport or rendering concerns; the ones that cross
//! the host boundary derive serde so adapters can put them on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// Transcript
//=========================================================================================

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// Distinguishes real replies from text that is displayed but never sent
/// back to the host as conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A user prompt or an assistant answer.
    Reply,
    /// Out-of-band host output (command results, prompt updates, endpoint switches).
    Notice,
    /// A rendered failure for a chat request.
    Error,
}

/// One entry of the transcript. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub kind: MessageKind,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, MessageKind::Reply, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, MessageKind::Reply, text)
    }

    pub fn notice(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, MessageKind::Notice, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, MessageKind::Error, text)
    }

    fn new(role: Role, kind: MessageKind, text: impl Into<String>) -> Self {
        Self {
            role,
            kind,
            text: text.into(),
            created_at: Utc::now(),
        }
    }

    /// Whether this message belongs in the history sent with a chat request.
    pub fn is_history(&self) -> bool {
        self.kind == MessageKind::Reply
    }
}

/// A `{role, content}` pair as the host expects it in the `history` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for HistoryEntry {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.text.clone(),
        }
    }
}

/// The outcome of one tool the host ran while answering a chat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    #[serde(default)]
    pub tool_name: String,
    #[serde(rename = "success", default)]
    pub succeeded: bool,
    #[serde(default)]
    pub message: String,
}

//=========================================================================================
// Request Correlation
//=========================================================================================

/// Opaque correlation identifier for one chat request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestToken(Uuid);

impl RequestToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestToken {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for RequestToken {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The single chat call currently awaiting a host response.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub request_id: RequestToken,
    pub submitted_at: DateTime<Utc>,
    pub user_message: Message,
}

//=========================================================================================
// Mode, Identity and Settings
//=========================================================================================

/// Which backend the host forwards chat requests to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    #[default]
    Local,
    Staging,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Local => "local",
            Endpoint::Staging => "staging",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The authentication/endpoint axis gating chat submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionMode {
    pub authenticated: bool,
    pub endpoint: Endpoint,
}

/// The signed-in user as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthUser {
    #[serde(default)]
    pub is_authenticated: bool,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
}

pub const DEFAULT_FONT_SIZE: u8 = 14;
pub const MIN_FONT_SIZE: u8 = 8;
pub const MAX_FONT_SIZE: u8 = 32;

/// View preferences persisted outside the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub font_size: u8,
    pub show_tool_calls: bool,
    pub show_execution_log: bool,
    pub show_raw_data: bool,
    pub endpoint: Endpoint,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            font_size: DEFAULT_FONT_SIZE,
            show_tool_calls: false,
            show_execution_log: false,
            show_raw_data: false,
            endpoint: Endpoint::Local,
        }
    }
}

impl Settings {
    /// Returns a copy with the font size clamped to the supported range.
    pub fn normalized(mut self) -> Self {
        self.font_size = self.font_size.clamp(MIN_FONT_SIZE, MAX_FONT_SIZE);
        self
    }
}

//=========================================================================================
// Debug Trail
//=========================================================================================

/// The debug panel an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugCategory {
    ToolCalls,
    ExecutionLog,
    RawData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugEntry {
    pub category: DebugCategory,
    pub text: String,
    pub recorded_at: DateTime<Utc>,
}

impl DebugEntry {
    pub fn new(category: DebugCategory, text: impl Into<String>) -> Self {
        Self {
            category,
            text: text.into(),
            recorded_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_replies_count_as_history() {
        assert!(Message::user("hi").is_history());
        assert!(Message::assistant("hello").is_history());
        assert!(!Message::notice("Command completed").is_history());
        assert!(!Message::error("Error: boom").is_history());
    }

    #[test]
    fn execution_result_uses_host_field_names() {
        let result: ToolExecutionResult =
            serde_json::from_str(r#"{"tool_name":"create_box","success":true}"#).unwrap();
        assert_eq!(result.tool_name, "create_box");
        assert!(result.succeeded);
        assert_eq!(result.message, "");
    }

    #[test]
    fn settings_fill_missing_fields_and_clamp_font() {
        let settings: Settings = serde_json::from_str(r#"{"font_size":99,"endpoint":"staging"}"#).unwrap();
        let settings = settings.normalized();
        assert_eq!(settings.font_size, MAX_FONT_SIZE);
        assert_eq!(settings.endpoint, Endpoint::Staging);
        assert!(!settings.show_raw_data);
    }
}
