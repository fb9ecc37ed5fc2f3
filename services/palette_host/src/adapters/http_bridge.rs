//! services/palette_host/src/adapters/http_bridge.rs
//!
//! This module contains the adapters for the host bridge.
//! They implement the `HostBridge` port from the `core` crate.

use async_trait::async_trait;
use palette_chat_core::ports::{HostBridge, PortError, PortResult, RequestKind};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

//=========================================================================================
// HTTP Bridge
//=========================================================================================

/// Talks to a host that exposes one `POST {base_url}/{action}` route per request kind.
#[derive(Clone)]
pub struct HttpHostBridge {
    client: Client,
    base_url: String,
}

impl HttpHostBridge {
    /// Creates a new `HttpHostBridge`. `connect_timeout` only bounds connection
    /// setup; how long a request may stay pending is the session's business.
    pub fn new(base_url: impl Into<String>, connect_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().connect_timeout(connect_timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url_for(&self, kind: RequestKind) -> String {
        format!("{}/{}", self.base_url, kind.action())
    }
}

#[async_trait]
impl HostBridge for HttpHostBridge {
    /// Posts `body` to the route for `kind` and returns the response body unparsed.
    async fn send_request(&self, kind: RequestKind, body: Value) -> PortResult<String> {
        let url = self.url_for(kind);
        debug!("Sending {} to host bridge at {}", kind, url);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| PortError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| PortError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(PortError::Transport(format!(
                "host bridge returned {}: {}",
                status,
                text.trim()
            )));
        }
        Ok(text)
    }
}

//=========================================================================================
// Detached Bridge
//=========================================================================================

/// Stands in when no host is configured; every call reports the capability as absent.
#[derive(Clone, Copy, Debug, Default)]
pub struct DetachedBridge;

#[async_trait]
impl HostBridge for DetachedBridge {
    async fn send_request(&self, _kind: RequestKind, _body: Value) -> PortResult<String> {
        Err(PortError::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::json;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    #[tokio::test]
    async fn posts_body_to_action_route() {
        let router = Router::new().route(
            "/chatMessage",
            post(|Json(body): Json<Value>| async move {
                Json(json!({"success": true, "response": body["message"]}))
            }),
        );
        let bridge = HttpHostBridge::new(serve(router).await, Duration::from_secs(5)).unwrap();

        let raw = bridge
            .send_request(RequestKind::ChatMessage, json!({"message": "draw a gear"}))
            .await
            .unwrap();
        let reply: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(reply["response"], "draw a gear");
    }

    #[tokio::test]
    async fn error_status_is_a_transport_error() {
        let router = Router::new().route(
            "/signOut",
            post(|| async { (StatusCode::BAD_GATEWAY, "backend unreachable") }),
        );
        let bridge = HttpHostBridge::new(serve(router).await, Duration::from_secs(5)).unwrap();

        let err = bridge
            .send_request(RequestKind::SignOut, json!({}))
            .await
            .unwrap_err();
        let PortError::Transport(message) = err else {
            panic!("expected a transport error");
        };
        assert!(message.contains("502"));
        assert!(message.contains("backend unreachable"));
    }

    #[tokio::test]
    async fn detached_bridge_is_unavailable() {
        let err = DetachedBridge
            .send_request(RequestKind::ChatMessage, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Unavailable));
    }
}
