//! services/palette_host/src/web/connection.rs
//!
//! Everything one palette connection does between frames: it owns the
//! conversation session, turns client frames into session operations and
//! host round trips, and reports effects the view cannot infer on its own.

use chrono::Utc;
use palette_chat_core::{
    dispatch::{ChatDriver, SessionInput},
    domain::{AuthUser, DebugCategory, Endpoint, SessionMode, Settings},
    events::{AuthCompletion, HostEvent},
    ports::RequestKind,
    session::{ConversationSession, EventEffect},
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::web::{
    protocol::{ClientMessage, ServerMessage},
    state::{AppState, ConnectionId, HostDelivery},
    view::ChannelViewSink,
};

/// The reply shape shared by the host's non-chat requests.
#[derive(Debug, Default, Deserialize)]
struct HostReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    endpoint: Option<Endpoint>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    user: Option<AuthUser>,
    #[serde(default)]
    message: Option<String>,
}

pub struct PaletteConnection {
    id: ConnectionId,
    app_state: Arc<AppState>,
    session: ConversationSession,
    driver: ChatDriver,
    settings: Settings,
    frames: UnboundedSender<ServerMessage>,
}

impl PaletteConnection {
    /// Builds the session for a new view, syncs auth and endpoint with the
    /// host, and sends `SessionReady`.
    pub async fn open(app_state: Arc<AppState>, frames: UnboundedSender<ServerMessage>) -> Self {
        let settings = match app_state.settings.load().await {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to load settings, using defaults: {}", e);
                Settings::default()
            }
        };
        let mode = SessionMode {
            authenticated: false,
            endpoint: settings.endpoint,
        };
        let view = Arc::new(ChannelViewSink::new(frames.clone()));
        let session = ConversationSession::new(app_state.session_config(), mode, view);
        let driver = ChatDriver::new(app_state.bridge.clone());

        let id = app_state.requests.register();
        let mut connection = Self {
            id,
            app_state,
            session,
            driver,
            settings,
            frames,
        };
        connection.sync_auth_status().await;
        connection.sync_endpoint().await;
        connection.send(ServerMessage::SessionReady {
            mode: connection.session.mode(),
            settings: connection.settings.clone(),
            user: connection.session.user().cloned(),
        });
        connection
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn session(&self) -> &ConversationSession {
        &self.session
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Waits for the next result of an in-flight chat request.
    pub async fn next_input(&mut self) -> Option<SessionInput> {
        self.driver.next_input().await
    }

    pub fn apply_input(&mut self, input: SessionInput) {
        let effect = self.driver.apply(&mut self.session, input);
        self.report(effect);
        self.sync_requests();
    }

    /// Applies a published host event unless it is addressed to another connection.
    pub fn handle_host_delivery(&mut self, delivery: HostDelivery) {
        if delivery.is_for(self.id) {
            self.handle_host_event(delivery.event);
        }
    }

    pub fn handle_host_event(&mut self, event: HostEvent) {
        let effect = self.driver.handle_event(&mut self.session, event);
        self.report(effect);
        self.sync_requests();
    }

    pub async fn handle_text(&mut self, text: &str) {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.handle_client_message(message).await,
            Err(e) => {
                warn!("Failed to deserialize client message: {}", e);
                self.send(ServerMessage::Error {
                    message: format!("Unrecognized message: {e}"),
                });
            }
        }
    }

    pub async fn handle_client_message(&mut self, message: ClientMessage) {
        self.apply_client_message(message).await;
        self.sync_requests();
    }

    async fn apply_client_message(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::Submit { text } => {
                if let Err(e) = self.driver.submit(&mut self.session, &text) {
                    info!("Submission rejected: {}", e);
                    self.send(ServerMessage::Rejected {
                        reason: e.to_string(),
                    });
                }
            }
            ClientMessage::Clear => {
                self.session.clear();
                self.driver.settle(&self.session);
            }
            ClientMessage::SignIn => self.sign_in().await,
            ClientMessage::SignOut => self.sign_out().await,
            ClientMessage::SwitchEndpoint { endpoint } => self.switch_endpoint(endpoint).await,
            ClientMessage::UpdateSettings { settings } => {
                self.change_settings(|stored| Settings {
                    endpoint: stored.endpoint,
                    ..settings.normalized()
                })
                .await;
            }
            ClientMessage::ResetSettings => {
                self.change_settings(|stored| Settings {
                    endpoint: stored.endpoint,
                    ..Settings::default()
                })
                .await;
            }
            ClientMessage::ExportTranscript => {
                let text = self.session.export_transcript();
                self.send(ServerMessage::Transcript { text });
            }
        }
    }

    //-------------------------------------------------------------------------------------
    // Host Round Trips
    //-------------------------------------------------------------------------------------

    async fn call_host(&self, kind: RequestKind, body: Value) -> Result<HostReply, String> {
        let raw = self
            .driver
            .bridge()
            .send_request(kind, body)
            .await
            .map_err(|e| e.to_string())?;
        serde_json::from_str(&raw).map_err(|e| format!("Malformed {kind} reply: {e}"))
    }

    async fn sync_auth_status(&mut self) {
        match self.call_host(RequestKind::GetAuthStatus, json!({})).await {
            Ok(reply) if reply.success && reply.user.is_some() => {
                self.session.auth_complete(AuthCompletion {
                    success: true,
                    user: reply.user,
                    message: None,
                });
            }
            Ok(_) => self.log("Not authenticated"),
            Err(e) => self.log(format!("Error checking auth status: {e}")),
        }
    }

    async fn sync_endpoint(&mut self) {
        let body = json!({
            "action": RequestKind::GetEndpoint.action(),
            "timestamp": Utc::now(),
        });
        match self.call_host(RequestKind::GetEndpoint, body).await {
            Ok(HostReply {
                success: true,
                endpoint: Some(endpoint),
                url,
                ..
            }) => {
                self.log(format!(
                    "Current endpoint: {endpoint} ({})",
                    url.unwrap_or_default()
                ));
                if endpoint != self.settings.endpoint {
                    self.adopt_endpoint(endpoint).await;
                }
            }
            Ok(_) => {}
            Err(e) => self.log(format!("Error getting endpoint: {e}")),
        }
    }

    async fn sign_in(&mut self) {
        let completion = match self.call_host(RequestKind::SignIn, json!({})).await {
            Ok(reply) if reply.success && reply.status.as_deref() == Some("processing") => {
                self.log("Opening browser for authentication");
                return;
            }
            Ok(reply) => AuthCompletion {
                success: reply.success,
                user: reply.user,
                message: reply.message,
            },
            Err(e) => AuthCompletion {
                success: false,
                user: None,
                message: Some(e),
            },
        };
        let effect = self.session.auth_complete(completion);
        self.report(effect);
    }

    async fn sign_out(&mut self) {
        match self.call_host(RequestKind::SignOut, json!({})).await {
            Ok(reply) if reply.success => {
                self.session.sign_out();
                self.driver.settle(&self.session);
                info!("User signed out");
            }
            Ok(reply) => self.host_error(format!(
                "Sign out failed: {}",
                reply.message.unwrap_or_else(|| "Unknown error".to_string())
            )),
            Err(e) => self.host_error(format!("Sign out error: {e}")),
        }
    }

    async fn switch_endpoint(&mut self, endpoint: Endpoint) {
        let body = json!({
            "action": RequestKind::SwitchEndpoint.action(),
            "endpoint": endpoint,
            "timestamp": Utc::now(),
        });
        match self.call_host(RequestKind::SwitchEndpoint, body).await {
            Ok(reply) if reply.success => {
                let active = reply.endpoint.unwrap_or(endpoint);
                self.log(format!(
                    "Switched to {active} endpoint: {}",
                    reply.url.unwrap_or_default()
                ));
                self.session.notice(format!(
                    "Switched to {} endpoint",
                    active.as_str().to_uppercase()
                ));
                self.adopt_endpoint(active).await;
            }
            Ok(_) => {
                self.log("Failed to switch endpoint");
                self.session.notice("Failed to switch endpoint");
            }
            Err(e) => self.host_error(format!("Error switching endpoint: {e}")),
        }
    }

    async fn adopt_endpoint(&mut self, endpoint: Endpoint) {
        self.session.set_mode(SessionMode {
            endpoint,
            ..self.session.mode()
        });
        self.change_settings(|stored| Settings { endpoint, ..stored })
            .await;
    }

    /// Applies `change` to the stored settings, so edits made elsewhere since
    /// this connection opened are kept.
    async fn change_settings(&mut self, change: impl FnOnce(Settings) -> Settings) {
        let stored = match self.app_state.settings.load().await {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Failed to reload settings, using this palette's copy: {}", e);
                self.settings.clone()
            }
        };
        let settings = change(stored);
        match self.app_state.settings.save(&settings).await {
            Ok(()) => {
                self.settings = settings;
                self.send(ServerMessage::SettingsChanged {
                    settings: self.settings.clone(),
                });
            }
            Err(e) => self.host_error(format!("Failed to save settings: {e}")),
        }
    }

    /// Tells the registry which chat responses this connection is owed.
    fn sync_requests(&self) {
        self.app_state
            .requests
            .update(self.id, self.session.outstanding_tokens());
    }

    //-------------------------------------------------------------------------------------
    // Reporting
    //-------------------------------------------------------------------------------------

    fn report(&self, effect: EventEffect) {
        match effect {
            EventEffect::Processing(token) => self.send(ServerMessage::RequestProcessing { token }),
            EventEffect::SignedIn(user) => self.send(ServerMessage::SignedIn { user }),
            EventEffect::SignInFailed(message) => {
                self.send(ServerMessage::SignInFailed { message })
            }
            // Already visible through the view notifications.
            EventEffect::Resolved(_)
            | EventEffect::Dropped
            | EventEffect::Notice(_)
            | EventEffect::Unknown(_) => {}
        }
    }

    fn host_error(&mut self, message: String) {
        warn!("{}", message);
        self.log(message.clone());
        self.send(ServerMessage::Error { message });
    }

    fn log(&mut self, text: impl Into<String>) {
        self.session
            .append_debug_entry(DebugCategory::ExecutionLog, text);
    }

    fn send(&self, frame: ServerMessage) {
        if self.frames.send(frame).is_err() {
            debug!("Dropping frame for a closed palette connection");
        }
    }
}

impl Drop for PaletteConnection {
    fn drop(&mut self) {
        self.app_state.requests.remove(self.id);
    }
}
