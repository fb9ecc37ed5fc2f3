//! services/palette_host/src/web/view.rs
//!
//! The `ViewSink` for a WebSocket-connected palette: every session
//! notification becomes one `ServerMessage` frame queued for the writer task.

use palette_chat_core::domain::{DebugEntry, Message, RequestToken, SessionMode};
use palette_chat_core::ports::ViewSink;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::web::protocol::ServerMessage;

#[derive(Clone)]
pub struct ChannelViewSink {
    frames: UnboundedSender<ServerMessage>,
}

impl ChannelViewSink {
    pub fn new(frames: UnboundedSender<ServerMessage>) -> Self {
        Self { frames }
    }

    fn send(&self, frame: ServerMessage) {
        // The writer is gone once the socket closes; the session is about to drop too.
        if self.frames.send(frame).is_err() {
            debug!("Dropping frame for a closed palette connection");
        }
    }
}

impl ViewSink for ChannelViewSink {
    fn on_message_appended(&self, message: &Message) {
        self.send(ServerMessage::MessageAppended {
            message: message.clone(),
        });
    }

    fn on_debug_entry(&self, entry: &DebugEntry) {
        self.send(ServerMessage::DebugEntry {
            entry: entry.clone(),
        });
    }

    fn on_state_changed(&self, mode: &SessionMode) {
        self.send(ServerMessage::StateChanged { mode: *mode });
    }

    fn on_request_started(&self, token: RequestToken) {
        self.send(ServerMessage::RequestStarted { token });
    }

    fn on_request_resolved(&self, token: RequestToken, elapsed_seconds: f64) {
        self.send(ServerMessage::RequestResolved {
            token,
            elapsed_seconds,
        });
    }

    fn on_request_abandoned(&self, token: RequestToken) {
        self.send(ServerMessage::RequestAbandoned { token });
    }

    fn on_history_cleared(&self) {
        self.send(ServerMessage::HistoryCleared);
    }
}
