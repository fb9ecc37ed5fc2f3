//! crates/palette_chat_core/src/session.rs
//!
//! The conversation state machine behind one palette view.
//!
//! A session owns the transcript, the debug trail and at most one pending
//! chat request. Every host reply is matched against the pending request's
//! token before it may touch state, so replies for requests abandoned by
//! `clear` or `sign_out` are dropped instead of corrupting a newer session.

use chrono::{Local, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::dispatch::ChatRequest;
use crate::domain::{
    AuthUser, DebugCategory, DebugEntry, HistoryEntry, Message, PendingRequest, RequestToken,
    Role, SessionMode, ToolExecutionResult,
};
use crate::envelope::{BridgeReply, ChatFailure, ChatOutcome, ParsedReply};
use crate::events::{AuthCompletion, HostEvent};
use crate::ports::ViewSink;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

//=========================================================================================
// Configuration and Results
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long a request may stay pending before it fails. `None` waits forever.
    pub request_timeout: Option<Duration>,
    /// Upper bound on the retained tool execution results. `None` keeps all.
    pub tool_result_cap: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            tool_result_cap: None,
        }
    }
}

/// Why a submission was refused. Never changes session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Please sign in to send messages")]
    NotAuthenticated,
    #[error("Message is empty")]
    EmptyInput,
    #[error("A request is already in progress")]
    AlreadyAwaiting,
}

/// What resolving a pending request appended, for the view to display.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub token: RequestToken,
    pub messages: Vec<Message>,
    pub tool_results: Vec<ToolExecutionResult>,
    pub elapsed_seconds: f64,
    pub succeeded: bool,
}

/// The visible effect of a host reply or host-pushed event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventEffect {
    Resolved(Resolution),
    /// The host acknowledged the request; the answer comes later.
    Processing(RequestToken),
    /// The reply belonged to no pending request.
    Dropped,
    SignedIn(AuthUser),
    SignInFailed(String),
    Notice(Message),
    /// An event this palette does not understand; carries the action name.
    Unknown(String),
}

//=========================================================================================
// ConversationSession
//=========================================================================================

pub struct ConversationSession {
    config: SessionConfig,
    view: Arc<dyn ViewSink>,
    mode: SessionMode,
    user: Option<AuthUser>,
    messages: Vec<Message>,
    tool_results: Vec<ToolExecutionResult>,
    debug_trail: Vec<DebugEntry>,
    pending: Option<PendingRequest>,
    /// The host answered the pending request with `processing`.
    acknowledged: bool,
    /// Abandoned requests whose direct bridge reply has not come back yet.
    unanswered: Vec<RequestToken>,
    /// Abandoned requests the host is still working on, oldest first. The
    /// host answers one request at a time, so untagged `chatResponse`
    /// events settle these before the pending request.
    abandoned: VecDeque<RequestToken>,
}

impl ConversationSession {
    pub fn new(config: SessionConfig, mode: SessionMode, view: Arc<dyn ViewSink>) -> Self {
        Self {
            config,
            view,
            mode,
            user: None,
            messages: Vec::new(),
            tool_results: Vec::new(),
            debug_trail: Vec::new(),
            pending: None,
            acknowledged: false,
            unanswered: Vec::new(),
            abandoned: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn user(&self) -> Option<&AuthUser> {
        self.user.as_ref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn tool_results(&self) -> &[ToolExecutionResult] {
        &self.tool_results
    }

    pub fn debug_trail(&self) -> &[DebugEntry] {
        &self.debug_trail
    }

    pub fn pending(&self) -> Option<&PendingRequest> {
        self.pending.as_ref()
    }

    pub fn is_awaiting(&self) -> bool {
        self.pending.is_some()
    }

    /// The conversation as the host sees it: user prompts and assistant replies only.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.messages
            .iter()
            .filter(|m| m.is_history())
            .map(HistoryEntry::from)
            .collect()
    }

    /// The outbound body for the pending request, if there is one.
    pub fn chat_request(&self) -> Option<ChatRequest> {
        self.pending
            .as_ref()
            .map(|pending| ChatRequest::new(pending, self.history()))
    }

    //-------------------------------------------------------------------------------------
    // Submission and Resolution
    //-------------------------------------------------------------------------------------

    /// Starts a chat request. The user message is appended immediately,
    /// before the host has seen it.
    pub fn submit(&mut self, raw_text: &str) -> Result<PendingRequest, ValidationError> {
        if !self.mode.authenticated {
            return Err(ValidationError::NotAuthenticated);
        }
        let text = raw_text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyInput);
        }
        if self.pending.is_some() {
            return Err(ValidationError::AlreadyAwaiting);
        }

        let user_message = Message::user(text);
        let pending = PendingRequest {
            request_id: RequestToken::new(),
            submitted_at: user_message.created_at,
            user_message: user_message.clone(),
        };
        self.push_message(user_message);
        self.append_debug_entry(DebugCategory::ExecutionLog, format!("User message: {text}"));
        self.pending = Some(pending.clone());

        if let Some(request) = self.chat_request() {
            match serde_json::to_string(&request) {
                Ok(body) => self.append_debug_entry(DebugCategory::RawData, body),
                Err(e) => warn!("Failed to serialize chat request for the debug trail: {}", e),
            }
        }

        info!(token = %pending.request_id, "Chat request started");
        self.view.on_request_started(pending.request_id);
        Ok(pending)
    }

    /// Settles the pending request. A token that does not match the pending
    /// request is stale and leaves the session untouched.
    pub fn resolve(&mut self, token: RequestToken, outcome: ChatOutcome) -> Option<Resolution> {
        if !self.is_current(token) {
            debug!(%token, "Dropping stale response");
            return None;
        }
        let pending = self.pending.take()?;
        self.acknowledged = false;
        let elapsed_seconds =
            (Utc::now() - pending.submitted_at).num_milliseconds().max(0) as f64 / 1000.0;

        let (message, tool_results, succeeded) = match outcome {
            ChatOutcome::Success(reply) => {
                if !reply.tool_calls.is_empty() {
                    for call in &reply.tool_calls {
                        self.append_debug_entry(DebugCategory::ToolCalls, call.to_string());
                    }
                    self.append_debug_entry(
                        DebugCategory::ExecutionLog,
                        format!("Executed {} tool(s)", reply.tool_calls.len()),
                    );
                }
                for result in &reply.execution_results {
                    let status = if result.succeeded { "ok" } else { "failed" };
                    self.append_debug_entry(
                        DebugCategory::ExecutionLog,
                        format!("{status} {}: {}", result.tool_name, result.message),
                    );
                }
                self.record_tool_results(&reply.execution_results);
                (Message::assistant(reply.text), reply.execution_results, true)
            }
            ChatOutcome::Failure(failure) => {
                warn!(%token, "Chat request failed: {}", failure);
                self.append_debug_entry(DebugCategory::ExecutionLog, format!("Error: {failure}"));
                (Message::error(failure.display_text()), Vec::new(), false)
            }
        };

        self.push_message(message.clone());
        info!(%token, elapsed_seconds, succeeded, "Chat request resolved");
        self.view.on_request_resolved(token, elapsed_seconds);

        Some(Resolution {
            token,
            messages: vec![message],
            tool_results,
            elapsed_seconds,
            succeeded,
        })
    }

    /// Applies a direct reply from the bridge call made for `token`.
    pub fn accept_reply(&mut self, token: RequestToken, parsed: ParsedReply) -> EventEffect {
        if !self.is_current(token) {
            if let Some(position) = self.unanswered.iter().position(|t| *t == token) {
                self.unanswered.remove(position);
                if parsed.reply == BridgeReply::Processing {
                    debug!(%token, "Abandoned request is still processing on the host");
                    self.abandoned.push_back(token);
                }
            }
            debug!(%token, "Dropping stale bridge reply");
            return EventEffect::Dropped;
        }
        self.append_debug_entry(DebugCategory::RawData, parsed.raw);
        match parsed.reply {
            BridgeReply::Processing => {
                debug!(%token, "Host is processing the request");
                self.acknowledged = true;
                EventEffect::Processing(token)
            }
            BridgeReply::Completed(outcome) => self
                .resolve(token, outcome)
                .map(EventEffect::Resolved)
                .unwrap_or(EventEffect::Dropped),
        }
    }

    /// Fails the request for `token` because its deadline passed.
    pub fn expire(&mut self, token: RequestToken) -> Option<Resolution> {
        let seconds = self
            .config
            .request_timeout
            .map(|timeout| timeout.as_secs())
            .unwrap_or_default();
        let acknowledged = self.acknowledged;
        let resolution =
            self.resolve(token, ChatOutcome::Failure(ChatFailure::TimedOut(seconds)))?;
        // The host may still answer a request that timed out.
        self.remember_abandoned(token, acknowledged);
        Some(resolution)
    }

    /// Tokens this session still expects a host answer for: abandoned
    /// requests the host is working on, oldest first, then the pending one.
    pub fn outstanding_tokens(&self) -> Vec<RequestToken> {
        self.abandoned
            .iter()
            .copied()
            .chain(self.pending.as_ref().map(|p| p.request_id))
            .collect()
    }

    fn is_current(&self, token: RequestToken) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|pending| pending.request_id == token)
    }

    fn remember_abandoned(&mut self, token: RequestToken, acknowledged: bool) {
        if acknowledged {
            self.abandoned.push_back(token);
        } else {
            self.unanswered.push(token);
        }
    }

    //-------------------------------------------------------------------------------------
    // Host Events
    //-------------------------------------------------------------------------------------

    pub fn handle_event(&mut self, event: HostEvent) -> EventEffect {
        match event {
            HostEvent::ChatResponse(parsed) => match parsed.request_id {
                Some(token) => match self.abandoned.iter().position(|t| *t == token) {
                    Some(position) => {
                        self.abandoned.remove(position);
                        debug!(%token, "Dropping chatResponse for an abandoned request");
                        EventEffect::Dropped
                    }
                    None => self.accept_reply(token, parsed),
                },
                None => {
                    if let Some(token) = self.abandoned.pop_front() {
                        debug!(%token, "Dropping untagged chatResponse owed to an abandoned request");
                        return EventEffect::Dropped;
                    }
                    match self.pending.as_ref().map(|p| p.request_id) {
                        Some(token) => self.accept_reply(token, parsed),
                        None => {
                            debug!("Dropping chatResponse with no pending request");
                            EventEffect::Dropped
                        }
                    }
                }
            },
            HostEvent::AuthComplete(completion) => self.auth_complete(completion),
            HostEvent::CommandResult { message } => {
                let text = message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "Command completed".to_string());
                self.append_debug_entry(
                    DebugCategory::ExecutionLog,
                    format!("Command result: {text}"),
                );
                EventEffect::Notice(self.notice(text))
            }
            HostEvent::UpdatePrompt(text) => EventEffect::Notice(self.notice(text)),
            HostEvent::Unknown { action } => {
                warn!("Unknown host event: {}", action);
                self.append_debug_entry(
                    DebugCategory::ExecutionLog,
                    format!("Unknown event: {action}"),
                );
                EventEffect::Unknown(action)
            }
        }
    }

    /// Applies the outcome of a sign-in flow. Never touches the transcript.
    pub fn auth_complete(&mut self, completion: AuthCompletion) -> EventEffect {
        match completion.user {
            Some(user) if completion.success => {
                let who = user.user_email.clone().unwrap_or_else(|| "user".to_string());
                self.append_debug_entry(
                    DebugCategory::ExecutionLog,
                    format!("User signed in: {who}"),
                );
                self.mode.authenticated = user.is_authenticated;
                self.user = Some(user.clone());
                self.view.on_state_changed(&self.mode);
                EventEffect::SignedIn(user)
            }
            _ => {
                let reason = completion
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "Unknown error".to_string());
                self.append_debug_entry(
                    DebugCategory::ExecutionLog,
                    format!("Sign-in failed: {reason}"),
                );
                EventEffect::SignInFailed(reason)
            }
        }
    }

    //-------------------------------------------------------------------------------------
    // Resets and Mode
    //-------------------------------------------------------------------------------------

    /// Empties the transcript and trails. A pending request is abandoned and
    /// its eventual reply will be dropped.
    pub fn clear(&mut self) {
        let abandoned = self.pending.take();
        self.messages.clear();
        self.tool_results.clear();
        self.debug_trail.clear();

        if let Some(pending) = abandoned {
            info!(token = %pending.request_id, "Abandoning pending request");
            let acknowledged = std::mem::take(&mut self.acknowledged);
            self.remember_abandoned(pending.request_id, acknowledged);
            self.view.on_request_abandoned(pending.request_id);
        }
        self.view.on_history_cleared();
    }

    pub fn sign_out(&mut self) {
        self.clear();
        self.mode.authenticated = false;
        self.user = None;
        self.view.on_state_changed(&self.mode);
        self.append_debug_entry(DebugCategory::ExecutionLog, "User signed out");
    }

    /// Replaces the mode. A pending request is left alone.
    pub fn set_mode(&mut self, mode: SessionMode) {
        self.mode = mode;
        self.view.on_state_changed(&self.mode);
    }

    //-------------------------------------------------------------------------------------
    // Trails
    //-------------------------------------------------------------------------------------

    pub fn append_debug_entry(&mut self, category: DebugCategory, text: impl Into<String>) {
        let entry = DebugEntry::new(category, text);
        self.view.on_debug_entry(&entry);
        self.debug_trail.push(entry);
    }

    /// Appends an out-of-band assistant notice and returns it.
    pub fn notice(&mut self, text: impl Into<String>) -> Message {
        let message = Message::notice(text);
        self.push_message(message.clone());
        message
    }

    /// Renders the transcript as plain text, one block per message.
    pub fn export_transcript(&self) -> String {
        self.messages
            .iter()
            .map(|m| {
                let speaker = match m.role {
                    Role::User => "User",
                    Role::Assistant => "AI",
                };
                let time = m.created_at.with_timezone(&Local).format("%H:%M:%S");
                format!("{speaker} [{time}]: {}", m.text)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn push_message(&mut self, message: Message) {
        self.view.on_message_appended(&message);
        self.messages.push(message);
    }

    fn record_tool_results(&mut self, results: &[ToolExecutionResult]) {
        self.tool_results.extend_from_slice(results);
        if let Some(cap) = self.config.tool_result_cap {
            let excess = self.tool_results.len().saturating_sub(cap);
            self.tool_results.drain(..excess);
        }
    }
}
