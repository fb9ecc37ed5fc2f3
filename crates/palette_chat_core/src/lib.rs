pub mod dispatch;
pub mod domain;
pub mod envelope;
pub mod events;
pub mod ports;
pub mod session;

pub use dispatch::{send_chat, ChatDriver, ChatRequest, SessionInput};
pub use domain::{
    AuthUser, DebugCategory, DebugEntry, Endpoint, HistoryEntry, Message, MessageKind,
    PendingRequest, RequestToken, Role, SessionMode, Settings, ToolExecutionResult,
};
pub use envelope::{
    normalize_reply_text, parse_bridge_reply, BridgeReply, ChatEnvelope, ChatFailure, ChatOutcome,
    ChatReply, ParsedReply, NO_RESPONSE_TEXT,
};
pub use events::{AuthCompletion, EventDecodeError, HostEvent};
pub use ports::{HostBridge, PortError, PortResult, RequestKind, SettingsStore, ViewSink};
pub use session::{
    ConversationSession, EventEffect, Resolution, SessionConfig, ValidationError,
};
