pub mod connection;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod view;
pub mod ws_handler;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

// Re-export the handlers so the binary can assemble the server from one place.
pub use rest::{get_settings_handler, host_event_handler, put_settings_handler, ApiDoc};
pub use state::{AppState, ConnectionId, HostDelivery, Routed};
pub use ws_handler::ws_handler;

/// Builds the API routes (without Swagger UI or CORS, which the binary layers on).
pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/events", post(host_event_handler))
        .route("/settings", get(get_settings_handler).put(put_settings_handler))
        .with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{DetachedBridge, JsonFileSettingsStore};
    use crate::config::Config;
    use axum::{
        body::{to_bytes, Body},
        http::{header::CONTENT_TYPE, Request, StatusCode},
    };
    use palette_chat_core::domain::RequestToken;
    use palette_chat_core::events::HostEvent;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_state(temp_dir: &TempDir) -> Arc<AppState> {
        let config = Config::from_lookup(|_| None).unwrap();
        let store = JsonFileSettingsStore::new(temp_dir.path().join("settings.json"));
        Arc::new(AppState::new(
            Arc::new(config),
            Arc::new(DetachedBridge),
            Arc::new(store),
        ))
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn chat_response_goes_to_the_waiting_palette() {
        let temp_dir = TempDir::new().unwrap();
        let state = test_state(&temp_dir);
        let waiting = state.requests.register();
        state.requests.update(waiting, vec![RequestToken::new()]);
        let mut events = state.host_events.subscribe();

        let response = router(state)
            .oneshot(json_request(
                "POST",
                "/events",
                json!({"action": "chatResponse", "data": "{\"success\": true, \"response\": \"hi\"}"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "OK");
        let delivery = events.try_recv().unwrap();
        assert_eq!(delivery.target, Some(waiting));
        assert!(matches!(delivery.event, HostEvent::ChatResponse(_)));
    }

    #[tokio::test]
    async fn chat_response_nobody_waits_for_is_not_delivered() {
        let temp_dir = TempDir::new().unwrap();
        let state = test_state(&temp_dir);
        let mut events = state.host_events.subscribe();

        let response = router(state)
            .oneshot(json_request(
                "POST",
                "/events",
                json!({"action": "chatResponse", "data": {"success": true, "response": "hi"}}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn other_events_reach_everyone() {
        let temp_dir = TempDir::new().unwrap();
        let state = test_state(&temp_dir);
        let mut events = state.host_events.subscribe();

        router(state)
            .oneshot(json_request(
                "POST",
                "/events",
                json!({"action": "commandResult", "data": {"message": "Box created"}}),
            ))
            .await
            .unwrap();

        let delivery = events.try_recv().unwrap();
        assert_eq!(delivery.target, None);
        assert!(delivery.is_for(7));
    }

    #[tokio::test]
    async fn unknown_event_is_acknowledged() {
        let temp_dir = TempDir::new().unwrap();
        let response = router(test_state(&temp_dir))
            .oneshot(json_request("POST", "/events", json!({"action": "reboot", "data": {}})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "Unexpected command type: reboot");
    }

    #[tokio::test]
    async fn malformed_auth_event_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let response = router(test_state(&temp_dir))
            .oneshot(json_request(
                "POST",
                "/events",
                json!({"action": "authComplete", "data": "not json"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn settings_put_clamps_and_keeps_endpoint() {
        let temp_dir = TempDir::new().unwrap();
        let state = test_state(&temp_dir);

        let response = router(state.clone())
            .oneshot(json_request(
                "PUT",
                "/settings",
                json!({
                    "font_size": 40,
                    "show_tool_calls": true,
                    "show_execution_log": false,
                    "show_raw_data": true,
                    "endpoint": "staging"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router(state)
            .oneshot(Request::get("/settings").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["font_size"], 32);
        assert_eq!(body["show_raw_data"], true);
        assert_eq!(body["endpoint"], "local");
    }
}
