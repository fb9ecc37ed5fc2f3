//! services/palette_host/src/bin/palette_host.rs

use axum::http::{header::CONTENT_TYPE, HeaderValue, Method};
use palette_chat_core::ports::HostBridge;
use palette_host_lib::{
    adapters::{DetachedBridge, HttpHostBridge, JsonFileSettingsStore},
    config::Config,
    error::AppError,
    web::{router, ApiDoc, AppState},
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

const BRIDGE_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting palette host...");

    // --- 2. Initialize Adapters ---
    let bridge: Arc<dyn HostBridge> = match &config.host_bridge_url {
        Some(url) => {
            info!("Forwarding palette requests to host bridge at {}", url);
            Arc::new(HttpHostBridge::new(url.clone(), BRIDGE_CONNECT_TIMEOUT)?)
        }
        None => {
            warn!("HOST_BRIDGE_URL is not set; running detached from any host");
            Arc::new(DetachedBridge)
        }
    };
    let settings = Arc::new(JsonFileSettingsStore::new(config.settings_path.clone()));

    // --- 3. Build the Shared AppState ---
    let app_state = Arc::new(AppState::new(config.clone(), bridge, settings));

    // --- 4. Create the Web Router ---
    let origin = config.allowed_origin.parse::<HeaderValue>().map_err(|e| {
        AppError::Internal(format!(
            "Invalid ALLOWED_ORIGIN '{}': {}",
            config.allowed_origin, e
        ))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE]);

    let app = router(app_state)
        .layer(cors)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 5. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
