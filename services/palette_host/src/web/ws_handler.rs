//! services/palette_host/src/web/ws_handler.rs
//!
//! This is the entry point and control loop for a palette WebSocket connection.
//! One loop owns the connection's session and multiplexes client frames,
//! chat request results and broadcast host events.

use crate::web::{connection::PaletteConnection, protocol::ServerMessage, state::AppState};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tracing::{error, info, warn};

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>) {
    info!("New palette connection established");

    let (mut sender, mut receiver) = socket.split();
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<ServerMessage>();

    // --- 1. Writer ---
    let writer = tokio::spawn(async move {
        while let Some(frame) = frames_rx.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize server message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                info!("Palette disconnected while sending.");
                break;
            }
        }
    });

    // Subscribe before syncing with the host so no event slips between the two.
    let mut host_events = app_state.host_events.subscribe();
    let mut connection = PaletteConnection::open(app_state, frames_tx).await;

    // --- 2. Main Loop ---
    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => connection.handle_text(text.as_str()).await,
                Some(Ok(Message::Close(_))) => {
                    info!("Palette sent close message.");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
                None => {
                    info!("Palette disconnected.");
                    break;
                }
            },
            Some(input) = connection.next_input() => connection.apply_input(input),
            event = host_events.recv() => match event {
                Ok(delivery) => connection.handle_host_delivery(delivery),
                Err(RecvError::Lagged(missed)) => {
                    warn!("Palette connection missed {} host events", missed);
                }
                Err(RecvError::Closed) => {
                    error!("Host event channel closed.");
                    break;
                }
            },
        }
    }

    // --- 3. Cleanup ---
    drop(connection);
    writer.abort();
    info!("Palette connection closed.");
}
