//! crates/palette_chat_core/src/dispatch.rs
//!
//! Carries a submitted chat request across the host bridge.
//!
//! The bridge call and its deadline run as detached tasks; their results come
//! back as `SessionInput`s on a channel drained by whoever owns the session.
//! Nothing here touches the session directly, so the session keeps a single
//! owner and the token check in `resolve` stays the only correlation rule.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use crate::domain::{HistoryEntry, PendingRequest, RequestToken};
use crate::envelope::{parse_bridge_reply, BridgeReply, ChatFailure, ChatOutcome, ParsedReply};
use crate::events::HostEvent;
use crate::ports::{HostBridge, PortError, RequestKind};
use crate::session::{ConversationSession, EventEffect, ValidationError};

//=========================================================================================
// Outbound Body
//=========================================================================================

/// The `chatMessage` body sent to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub action: &'static str,
    pub message: String,
    /// Includes the message being sent.
    pub history: Vec<HistoryEntry>,
    pub timestamp: DateTime<Utc>,
    pub request_id: RequestToken,
}

impl ChatRequest {
    pub fn new(pending: &PendingRequest, history: Vec<HistoryEntry>) -> Self {
        Self {
            action: RequestKind::ChatMessage.action(),
            message: pending.user_message.text.clone(),
            history,
            timestamp: pending.submitted_at,
            request_id: pending.request_id,
        }
    }
}

/// Performs one bridge call and parses whatever comes back. Never fails:
/// transport problems become `ChatFailure`s.
pub async fn send_chat(bridge: &dyn HostBridge, request: &ChatRequest) -> ParsedReply {
    let body = match serde_json::to_value(request) {
        Ok(body) => body,
        Err(e) => return failed(ChatFailure::Transport(e.to_string())),
    };
    match bridge.send_request(RequestKind::ChatMessage, body).await {
        Ok(raw) => parse_bridge_reply(&raw),
        Err(PortError::Unavailable) => {
            warn!("Chat request sent while the host bridge is unavailable");
            failed(ChatFailure::Unavailable)
        }
        Err(e) => {
            warn!("Host bridge call failed: {}", e);
            failed(ChatFailure::Transport(e.to_string()))
        }
    }
}

fn failed(failure: ChatFailure) -> ParsedReply {
    ParsedReply {
        request_id: None,
        reply: BridgeReply::Completed(ChatOutcome::Failure(failure)),
        raw: String::new(),
    }
}

//=========================================================================================
// Driver
//=========================================================================================

/// Results produced by detached request tasks.
#[derive(Debug)]
pub enum SessionInput {
    Reply { token: RequestToken, parsed: ParsedReply },
    Expired(RequestToken),
}

/// Submits requests on behalf of a session and feeds their results back.
pub struct ChatDriver {
    bridge: Arc<dyn HostBridge>,
    inputs_tx: mpsc::UnboundedSender<SessionInput>,
    inputs_rx: mpsc::UnboundedReceiver<SessionInput>,
    /// Cancels the deadline timer of the request it belongs to when dropped.
    deadline: Option<(RequestToken, DropGuard)>,
}

impl ChatDriver {
    pub fn new(bridge: Arc<dyn HostBridge>) -> Self {
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        Self {
            bridge,
            inputs_tx,
            inputs_rx,
            deadline: None,
        }
    }

    pub fn bridge(&self) -> &Arc<dyn HostBridge> {
        &self.bridge
    }

    /// Submits `text` and starts the bridge call plus its deadline.
    pub fn submit(
        &mut self,
        session: &mut ConversationSession,
        text: &str,
    ) -> Result<RequestToken, ValidationError> {
        let pending = session.submit(text)?;
        let token = pending.request_id;
        let request = ChatRequest::new(&pending, session.history());

        let bridge = self.bridge.clone();
        let inputs = self.inputs_tx.clone();
        tokio::spawn(async move {
            let parsed = send_chat(bridge.as_ref(), &request).await;
            if inputs.send(SessionInput::Reply { token, parsed }).is_err() {
                debug!(%token, "Session closed before the host replied");
            }
        });

        let deadline = session
            .config()
            .request_timeout
            .map(|timeout| (token, self.arm_deadline(token, timeout)));
        self.deadline = deadline;
        Ok(token)
    }

    fn arm_deadline(&self, token: RequestToken, timeout: Duration) -> DropGuard {
        let cancel = CancellationToken::new();
        let cancelled = cancel.clone();
        let inputs = self.inputs_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if inputs.send(SessionInput::Expired(token)).is_err() {
                        debug!(%token, "Session closed before the request deadline");
                    }
                }
            }
        });
        cancel.drop_guard()
    }

    /// Waits for the next result of a detached request task.
    pub async fn next_input(&mut self) -> Option<SessionInput> {
        self.inputs_rx.recv().await
    }

    pub fn apply(&mut self, session: &mut ConversationSession, input: SessionInput) -> EventEffect {
        let effect = match input {
            SessionInput::Reply { token, parsed } => session.accept_reply(token, parsed),
            SessionInput::Expired(token) => session
                .expire(token)
                .map(EventEffect::Resolved)
                .unwrap_or(EventEffect::Dropped),
        };
        self.settle(session);
        effect
    }

    pub fn handle_event(&mut self, session: &mut ConversationSession, event: HostEvent) -> EventEffect {
        let effect = session.handle_event(event);
        self.settle(session);
        effect
    }

    /// Disarms the deadline once its request is no longer pending.
    pub fn settle(&mut self, session: &ConversationSession) {
        let pending = session.pending().map(|p| p.request_id);
        if let Some((token, _)) = &self.deadline {
            if pending != Some(*token) {
                self.deadline = None;
            }
        }
    }

    pub fn has_deadline(&self) -> bool {
        self.deadline.is_some()
    }
}
