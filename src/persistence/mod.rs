//! Persistence module - Flat JSON configuration stores

mod store;

pub use store::{default_config_dir, EngineSettings, PinStore, SettingsStore};
