//! services/palette_host/src/web/state.rs
//!
//! Defines the state shared by every palette connection, including the
//! routing of host events to the connections they belong to.

use crate::config::Config;
use palette_chat_core::domain::RequestToken;
use palette_chat_core::events::HostEvent;
use palette_chat_core::ports::{HostBridge, SettingsStore};
use palette_chat_core::session::SessionConfig;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Host events are fanned out to every live connection; a slow view that
/// falls this far behind misses events.
const HOST_EVENT_CAPACITY: usize = 64;

pub type ConnectionId = u64;

/// A host event on its way to the palettes. `target: None` is for everyone.
#[derive(Debug, Clone)]
pub struct HostDelivery {
    pub target: Option<ConnectionId>,
    pub event: HostEvent,
}

impl HostDelivery {
    pub fn is_for(&self, connection: ConnectionId) -> bool {
        self.target.map_or(true, |target| target == connection)
    }
}

/// Where a published event went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Everyone,
    Connection(ConnectionId),
    /// No connection is owed this chat response, or more than one could be.
    Nobody,
}

/// Which connection is owed an answer for which request tokens.
#[derive(Default)]
pub struct RequestRegistry {
    next_id: AtomicU64,
    outstanding: Mutex<HashMap<ConnectionId, Vec<RequestToken>>>,
}

impl RequestRegistry {
    pub fn register(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Replaces the tokens `connection` still expects an answer for.
    pub fn update(&self, connection: ConnectionId, tokens: Vec<RequestToken>) {
        let mut outstanding = self.lock();
        if tokens.is_empty() {
            outstanding.remove(&connection);
        } else {
            outstanding.insert(connection, tokens);
        }
    }

    pub fn remove(&self, connection: ConnectionId) {
        self.lock().remove(&connection);
    }

    /// The connection a `chatResponse` belongs to. A tagged response goes to
    /// the owner of its token; an untagged one only when exactly one
    /// connection is waiting.
    pub fn owner_of(&self, request_id: Option<RequestToken>) -> Option<ConnectionId> {
        let outstanding = self.lock();
        match request_id {
            Some(token) => outstanding
                .iter()
                .find(|(_, tokens)| tokens.contains(&token))
                .map(|(id, _)| *id),
            None => {
                let mut waiting = outstanding.keys();
                match (waiting.next(), waiting.next()) {
                    (Some(id), None) => Some(*id),
                    (Some(_), Some(_)) => {
                        warn!(
                            "Untagged chatResponse while {} palettes are waiting; dropping it",
                            outstanding.len()
                        );
                        None
                    }
                    _ => None,
                }
            }
        }
    }

    // A poisoned map is still consistent: every update is a single insert or remove.
    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, Vec<RequestToken>>> {
        self.outstanding
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub bridge: Arc<dyn HostBridge>,
    pub settings: Arc<dyn SettingsStore>,
    pub host_events: broadcast::Sender<HostDelivery>,
    pub requests: Arc<RequestRegistry>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        bridge: Arc<dyn HostBridge>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        let (host_events, _) = broadcast::channel(HOST_EVENT_CAPACITY);
        Self {
            config,
            bridge,
            settings,
            host_events,
            requests: Arc::new(RequestRegistry::default()),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            request_timeout: self.config.request_timeout,
            tool_result_cap: self.config.tool_result_cap,
        }
    }

    /// Sends a host event to the palettes it concerns. Chat responses go to
    /// a single connection; everything else goes to all of them.
    pub fn publish(&self, event: HostEvent) -> Routed {
        let (target, routed) = match &event {
            HostEvent::ChatResponse(parsed) => match self.requests.owner_of(parsed.request_id) {
                Some(id) => (Some(id), Routed::Connection(id)),
                None => {
                    info!("chatResponse matches no waiting palette; dropping it");
                    return Routed::Nobody;
                }
            },
            _ => (None, Routed::Everyone),
        };
        let action = event.action().to_string();
        match self.host_events.send(HostDelivery { target, event }) {
            Ok(receivers) => debug!("Host event {} delivered to {} palettes", action, receivers),
            Err(_) => info!("Host event {} arrived with no palette connected", action),
        }
        routed
    }
}
