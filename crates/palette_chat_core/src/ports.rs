//! crates/palette_chat_core/src/ports.rs
//!
//! Defines the contracts (traits) the conversation core depends on.
//! The host bridge, the view layer and the settings store are all external
//! collaborators; the core only talks to them through these seams.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

use crate::domain::{DebugEntry, Message, RequestToken, SessionMode, Settings};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    /// The capability behind the port is not present in this process.
    #[error("Host bridge is not available")]
    Unavailable,
    #[error("Transport failure: {0}")]
    Transport(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Host Bridge
//=========================================================================================

/// The named requests a palette sends to its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    ChatMessage,
    SignIn,
    SignOut,
    GetAuthStatus,
    SwitchEndpoint,
    GetEndpoint,
}

impl RequestKind {
    /// The action name the host dispatches on.
    pub fn action(&self) -> &'static str {
        match self {
            RequestKind::ChatMessage => "chatMessage",
            RequestKind::SignIn => "signIn",
            RequestKind::SignOut => "signOut",
            RequestKind::GetAuthStatus => "getAuthStatus",
            RequestKind::SwitchEndpoint => "switchEndpoint",
            RequestKind::GetEndpoint => "getEndpoint",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action())
    }
}

#[async_trait]
pub trait HostBridge: Send + Sync {
    /// Sends one request to the host and returns its raw (serialized) reply.
    async fn send_request(&self, kind: RequestKind, body: Value) -> PortResult<String>;
}

//=========================================================================================
// View Layer
//=========================================================================================

/// Receives every state change the session makes, in order.
pub trait ViewSink: Send + Sync {
    fn on_message_appended(&self, message: &Message);
    fn on_debug_entry(&self, entry: &DebugEntry);
    fn on_state_changed(&self, mode: &SessionMode);
    fn on_request_started(&self, token: RequestToken);
    fn on_request_resolved(&self, token: RequestToken, elapsed_seconds: f64);

    /// A pending request was invalidated by `clear` or `sign_out`.
    fn on_request_abandoned(&self, _token: RequestToken) {}

    fn on_history_cleared(&self) {}
}

//=========================================================================================
// Settings Store
//=========================================================================================

#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Reads the persisted settings, falling back to defaults when none exist.
    async fn load(&self) -> PortResult<Settings>;

    async fn save(&self, settings: &Settings) -> PortResult<()>;
}
