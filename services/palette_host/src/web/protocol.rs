//! services/palette_host/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the palette view and the
//! host process. Every frame is a JSON text message tagged by `type`.

use palette_chat_core::domain::{
    AuthUser, DebugEntry, Endpoint, Message, RequestToken, SessionMode, Settings,
};
use serde::{Deserialize, Serialize};

//=========================================================================================
// Messages Sent FROM the Palette View TO the Host Process
//=========================================================================================

#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// The user pressed send.
    Submit { text: String },

    Clear,

    /// Starts the host's browser sign-in flow; the result arrives as `authComplete`.
    SignIn,

    SignOut,

    SwitchEndpoint { endpoint: Endpoint },

    /// Replaces the view preferences. The endpoint is only changed through `SwitchEndpoint`.
    UpdateSettings { settings: Settings },

    ResetSettings,

    ExportTranscript,
}

//=========================================================================================
// Messages Sent FROM the Host Process TO the Palette View
//=========================================================================================

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once after the connection is set up.
    SessionReady {
        mode: SessionMode,
        settings: Settings,
        user: Option<AuthUser>,
    },

    MessageAppended { message: Message },

    DebugEntry { entry: DebugEntry },

    StateChanged { mode: SessionMode },

    RequestStarted { token: RequestToken },

    /// The host accepted the request and is still working on it.
    RequestProcessing { token: RequestToken },

    RequestResolved { token: RequestToken, elapsed_seconds: f64 },

    RequestAbandoned { token: RequestToken },

    HistoryCleared,

    /// A submission was refused; shown inline, nothing changed.
    Rejected { reason: String },

    SignedIn { user: AuthUser },

    SignInFailed { message: String },

    Transcript { text: String },

    SettingsChanged { settings: Settings },

    /// Reports a failed host round trip that is not tied to a chat request.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_frames_decode_by_type() {
        let submit: ClientMessage =
            serde_json::from_value(json!({"type": "submit", "text": "draw a gear"})).unwrap();
        assert_eq!(submit, ClientMessage::Submit { text: "draw a gear".into() });

        let switch: ClientMessage =
            serde_json::from_value(json!({"type": "switch_endpoint", "endpoint": "staging"})).unwrap();
        assert_eq!(switch, ClientMessage::SwitchEndpoint { endpoint: Endpoint::Staging });

        let clear: ClientMessage = serde_json::from_value(json!({"type": "clear"})).unwrap();
        assert_eq!(clear, ClientMessage::Clear);
    }

    #[test]
    fn unknown_client_frame_is_an_error() {
        assert!(serde_json::from_value::<ClientMessage>(json!({"type": "explode"})).is_err());
    }

    #[test]
    fn server_frames_are_tagged() {
        let token = RequestToken::new();
        let frame = serde_json::to_value(ServerMessage::RequestResolved {
            token,
            elapsed_seconds: 1.5,
        })
        .unwrap();
        assert_eq!(frame["type"], "request_resolved");
        assert_eq!(frame["token"], token.to_string());
        assert_eq!(frame["elapsed_seconds"], 1.5);

        let frame = serde_json::to_value(ServerMessage::HistoryCleared).unwrap();
        assert_eq!(frame, json!({"type": "history_cleared"}));
    }
}
