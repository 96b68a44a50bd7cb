//! Flat JSON stores for pins and engine settings
//!
//! Persistence here is a convenience cache, never a correctness dependency:
//! every read, parse, or write failure degrades to defaults or a dropped
//! save. The pin store carries a one-time migration from the two legacy
//! single-array files into the current combined shape.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::pins::PinSet;

/// Persisted engine settings: `{"colimaUser": ..., "autoFixSocketPermissions": ...}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineSettings {
    /// Operating user whose colima installation the engine drives; absent
    /// means the current user.
    pub colima_user: Option<String>,
    /// Chain a socket-permission-fix command after privileged starts.
    pub auto_fix_socket_permissions: bool,
}

/// Default directory for all config files.
pub fn default_config_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(crate::APP_NAME)
}

/// Store for the pinned/unpinned container id sets.
#[derive(Debug, Clone)]
pub struct PinStore {
    path: PathBuf,
    legacy_pinned: PathBuf,
    legacy_unpinned: PathBuf,
}

impl PinStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join("pins.json"),
            legacy_pinned: dir.join("pinned_containers.json"),
            legacy_unpinned: dir.join("unpinned_containers.json"),
        }
    }

    /// Load the pin set, migrating the legacy file layout when the combined
    /// file is absent. Any failure yields an empty set.
    pub fn load(&self) -> PinSet {
        if let Ok(text) = fs::read_to_string(&self.path) {
            match serde_json::from_str::<PinSet>(&text) {
                Ok(pins) => return pins,
                Err(e) => {
                    warn!(path = %self.path.display(), "unreadable pin file, starting empty: {}", e);
                    return PinSet::default();
                }
            }
        }
        self.migrate_legacy()
    }

    /// Best-effort whole-file overwrite. Failures are logged and dropped.
    pub fn save(&self, pins: &PinSet) {
        if let Err(e) = write_json(&self.path, pins) {
            warn!(path = %self.path.display(), "failed to save pins: {}", e);
        } else {
            debug!(pinned = pins.pinned().len(), "pins saved");
        }
    }

    fn migrate_legacy(&self) -> PinSet {
        let pinned = read_string_array(&self.legacy_pinned);
        let unpinned = read_string_array(&self.legacy_unpinned);
        if pinned.is_empty() && unpinned.is_empty() {
            return PinSet::default();
        }

        info!("migrating legacy pin files");
        let merged = PinSet::new(pinned, unpinned);
        self.save(&merged);
        let _ = fs::remove_file(&self.legacy_pinned);
        let _ = fs::remove_file(&self.legacy_unpinned);
        merged
    }
}

/// Store for [`EngineSettings`].
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join("settings.json"),
        }
    }

    /// Load settings, merging defaults for missing keys. Failures yield
    /// defaults.
    pub fn load(&self) -> EngineSettings {
        match fs::read_to_string(&self.path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), "unreadable settings, using defaults: {}", e);
                EngineSettings::default()
            }),
            Err(_) => EngineSettings::default(),
        }
    }

    pub fn save(&self, settings: &EngineSettings) {
        if let Err(e) = write_json(&self.path, settings) {
            warn!(path = %self.path.display(), "failed to save settings: {}", e);
        }
    }
}

fn read_string_array(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}
