//! Profile scanning - Declared colima profiles and their resource hints
//!
//! Each profile is a directory under the colima root containing a
//! `colima.yaml`. Only the handful of `key: integer` lines the engine cares
//! about are extracted; the file is never parsed as full YAML.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

/// File holding the declared profile configuration.
const PROFILE_CONFIG: &str = "colima.yaml";

/// A profile declared on disk, with its resource hints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredProfile {
    pub name: String,
    pub cpus: Option<u32>,
    pub memory_gib: Option<u32>,
    pub disk_gib: Option<u32>,
}

/// Reads the set of declared profiles from a colima root directory.
#[derive(Debug, Clone)]
pub struct ProfileScanner {
    root: PathBuf,
}

impl ProfileScanner {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Root for the current user: `~/.colima`.
    pub fn default_root() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".colima")
    }

    /// Root for a configured operating user.
    pub fn root_for_user(user: &str) -> PathBuf {
        #[cfg(target_os = "macos")]
        let home = PathBuf::from("/Users").join(user);
        #[cfg(not(target_os = "macos"))]
        let home = PathBuf::from("/home").join(user);
        home.join(".colima")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Declared profiles in directory order. A missing or unreadable root
    /// yields an empty list, never an error.
    pub fn scan(&self) -> Vec<DeclaredProfile> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut profiles = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            // Internal directories (_lima, _templates) and dotfiles are not profiles.
            if name.starts_with('_') || name.starts_with('.') {
                continue;
            }

            let config_path = entry.path().join(PROFILE_CONFIG);
            let text = match fs::read_to_string(&config_path) {
                Ok(text) => text,
                Err(_) => continue,
            };

            profiles.push(DeclaredProfile {
                name,
                cpus: lookup_int(&text, "cpu"),
                memory_gib: lookup_int(&text, "memory"),
                disk_gib: lookup_int(&text, "disk"),
            });
        }

        if profiles.is_empty() && self.root.exists() {
            warn!(root = %self.root.display(), "no colima profiles declared");
        }
        profiles
    }
}

/// Find `key: <integer>` in a semi-structured config text. Top-level keys
/// only; an indented line belongs to a nested block and is skipped.
fn lookup_int(text: &str, key: &str) -> Option<u32> {
    for line in text.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            continue;
        }
        let Some((k, v)) = line.split_once(':') else {
            continue;
        };
        if k.trim() == key {
            return v.trim().parse().ok();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_profile(root: &Path, name: &str, config: &str) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(PROFILE_CONFIG), config).unwrap();
    }

    #[test]
    fn scans_declared_profiles_with_hints() {
        let tmp = tempdir().unwrap();
        write_profile(
            tmp.path(),
            "default",
            "cpu: 4\nmemory: 8\ndisk: 60\nruntime: docker\n",
        );
        write_profile(tmp.path(), "work", "cpu: 2\nmemory: 4\ndisk: 100\n");

        let scanner = ProfileScanner::new(tmp.path().to_path_buf());
        let mut profiles = scanner.scan();
        profiles.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[0].name, "default");
        assert_eq!(profiles[0].cpus, Some(4));
        assert_eq!(profiles[0].memory_gib, Some(8));
        assert_eq!(profiles[0].disk_gib, Some(60));
        assert_eq!(profiles[1].name, "work");
        assert_eq!(profiles[1].disk_gib, Some(100));
    }

    #[test]
    fn internal_directories_are_skipped() {
        let tmp = tempdir().unwrap();
        write_profile(tmp.path(), "default", "cpu: 2\n");
        fs::create_dir_all(tmp.path().join("_lima")).unwrap();
        fs::create_dir_all(tmp.path().join(".cache")).unwrap();

        let scanner = ProfileScanner::new(tmp.path().to_path_buf());
        let profiles = scanner.scan();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].name, "default");
    }

    #[test]
    fn directory_without_config_is_not_a_profile() {
        let tmp = tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("half-made")).unwrap();

        let scanner = ProfileScanner::new(tmp.path().to_path_buf());
        assert!(scanner.scan().is_empty());
    }

    #[test]
    fn missing_root_yields_empty_list() {
        let scanner = ProfileScanner::new(PathBuf::from("/nonexistent/colima/root"));
        assert!(scanner.scan().is_empty());
    }

    #[test]
    fn lookup_ignores_nested_and_malformed_keys() {
        let text = "vmType: vz\n  cpu: 99\ncpu: 4\ncpuType: host\nmemory: not-a-number\n";
        assert_eq!(lookup_int(text, "cpu"), Some(4));
        assert_eq!(lookup_int(text, "memory"), None);
        assert_eq!(lookup_int(text, "disk"), None);
    }
}
