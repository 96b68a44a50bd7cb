//! Process sampling - Live colima daemons from the OS process table

use std::collections::HashSet;
use std::path::Path;

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::trace;

/// Binary name marking a colima daemon invocation in a command line.
pub const PROCESS_MARKER: &str = "colima";

/// Samples the OS process table for running colima instances, keyed by
/// profile name.
pub struct ProcessSampler {
    system: System,
}

impl ProcessSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// Names of profiles with a live daemon process right now.
    pub fn running_profiles(&mut self) -> HashSet<String> {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::everything(),
        );

        let mut profiles = HashSet::new();
        for process in self.system.processes().values() {
            let tokens: Vec<String> = process
                .cmd()
                .iter()
                .map(|s| s.to_string_lossy().to_string())
                .collect();
            if let Some(profile) = profile_from_cmdline(&tokens) {
                trace!(profile = %profile, pid = process.pid().as_u32(), "live colima process");
                profiles.insert(profile);
            }
        }
        profiles
    }
}

impl Default for ProcessSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the profile name from a tokenized command line.
///
/// The marker is the colima binary token (matched on its file stem, so an
/// absolute path qualifies); the profile is the first following token that is
/// not flag-like.
pub fn profile_from_cmdline(tokens: &[String]) -> Option<String> {
    let marker = tokens.iter().position(|t| {
        Path::new(t)
            .file_stem()
            .map(|stem| stem == PROCESS_MARKER)
            .unwrap_or(false)
    })?;

    tokens[marker + 1..]
        .iter()
        .find(|t| !t.starts_with('-'))
        .cloned()
}
