pub mod http_bridge;
pub mod settings_file;

pub use http_bridge::{DetachedBridge, HttpHostBridge};
pub use settings_file::JsonFileSettingsStore;
