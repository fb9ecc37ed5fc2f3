//! services/palette_host/src/adapters/settings_file.rs
//!
//! Persists palette settings as a small JSON document on disk.
//! It implements the `SettingsStore` port from the `core` crate.

use async_trait::async_trait;
use palette_chat_core::domain::Settings;
use palette_chat_core::ports::{PortError, PortResult, SettingsStore};
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct JsonFileSettingsStore {
    path: PathBuf,
}

impl JsonFileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SettingsStore for JsonFileSettingsStore {
    async fn load(&self) -> PortResult<Settings> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No settings at {}, using defaults", self.path.display());
                return Ok(Settings::default());
            }
            Err(e) => return Err(PortError::Unexpected(e.to_string())),
        };
        let settings: Settings = serde_json::from_str(&raw).map_err(|e| {
            PortError::Unexpected(format!("Invalid settings file {}: {}", self.path.display(), e))
        })?;
        Ok(settings.normalized())
    }

    async fn save(&self, settings: &Settings) -> PortResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PortError::Unexpected(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(settings)
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))
    }
}
