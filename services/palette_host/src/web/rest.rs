//! services/palette_host/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use palette_chat_core::domain::{Endpoint, Settings};
use palette_chat_core::events::HostEvent;
use palette_chat_core::ports::PortError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, warn};
use utoipa::{OpenApi, ToSchema};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        host_event_handler,
        get_settings_handler,
        put_settings_handler,
    ),
    components(
        schemas(HostEventPayload, SettingsBody)
    ),
    tags(
        (name = "Palette Host API", description = "Host events and palette preferences. The chat itself runs over /ws.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// An unsolicited message from the host.
#[derive(Debug, Deserialize, ToSchema)]
pub struct HostEventPayload {
    /// One of `chatResponse`, `authComplete`, `commandResult` or `updatePrompt`.
    pub action: String,
    /// The event body, either as a JSON value or as a JSON-encoded string.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub data: Value,
}

impl HostEventPayload {
    fn data_text(&self) -> String {
        match &self.data {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

/// The palette preferences as exposed over REST.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SettingsBody {
    /// Clamped to 8..=32 on write.
    pub font_size: u8,
    pub show_tool_calls: bool,
    pub show_execution_log: bool,
    pub show_raw_data: bool,
    /// Read-only here; endpoints change through the host.
    #[schema(value_type = String, example = "local")]
    pub endpoint: Endpoint,
}

impl From<Settings> for SettingsBody {
    fn from(settings: Settings) -> Self {
        Self {
            font_size: settings.font_size,
            show_tool_calls: settings.show_tool_calls,
            show_execution_log: settings.show_execution_log,
            show_raw_data: settings.show_raw_data,
            endpoint: settings.endpoint,
        }
    }
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Deliver a host event to the connected palettes.
///
/// A `chatResponse` goes only to the palette waiting for it; other events go
/// to every palette.
#[utoipa::path(
    post,
    path = "/events",
    request_body = HostEventPayload,
    responses(
        (status = 200, description = "Event accepted; unknown actions are acknowledged but ignored", body = String),
        (status = 400, description = "The event body does not match its action")
    )
)]
pub async fn host_event_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<HostEventPayload>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let event = HostEvent::decode(&payload.action, &payload.data_text()).map_err(|e| {
        warn!("Rejected host event: {}", e);
        (StatusCode::BAD_REQUEST, e.to_string())
    })?;

    let reply = match &event {
        HostEvent::Unknown { action } => format!("Unexpected command type: {action}"),
        _ => "OK".to_string(),
    };

    app_state.publish(event);
    Ok((StatusCode::OK, reply))
}

/// Read the persisted palette preferences.
#[utoipa::path(
    get,
    path = "/settings",
    responses(
        (status = 200, description = "Current preferences", body = SettingsBody),
        (status = 500, description = "The settings store could not be read")
    )
)]
pub async fn get_settings_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let settings = app_state.settings.load().await.map_err(|e| {
        error!("Failed to load settings: {:?}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to load settings".to_string())
    })?;
    Ok(Json(SettingsBody::from(settings)))
}

/// Replace the persisted palette preferences.
///
/// The endpoint field is ignored; the stored endpoint only changes once the
/// host confirms a switch.
#[utoipa::path(
    put,
    path = "/settings",
    request_body = SettingsBody,
    responses(
        (status = 200, description = "Preferences saved", body = SettingsBody),
        (status = 500, description = "The settings store could not be written")
    )
)]
pub async fn put_settings_handler(
    State(app_state): State<Arc<AppState>>,
    Json(body): Json<SettingsBody>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let store_error = |e: PortError| {
        error!("Failed to persist settings: {:?}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to save settings".to_string())
    };

    let current = app_state.settings.load().await.map_err(store_error)?;
    let settings = Settings {
        font_size: body.font_size,
        show_tool_calls: body.show_tool_calls,
        show_execution_log: body.show_execution_log,
        show_raw_data: body.show_raw_data,
        endpoint: current.endpoint,
    }
    .normalized();
    app_state.settings.save(&settings).await.map_err(store_error)?;
    Ok(Json(SettingsBody::from(settings)))
}
