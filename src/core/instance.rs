//! Instance model - A colima profile as published to the frontend

use serde::{Deserialize, Serialize};

/// Status of a colima instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VmStatus {
    /// Instance has a live daemon process
    Running,
    /// Instance is declared but has no live process
    Stopped,
    /// Start action in flight
    Starting,
    /// Stop action in flight
    Stopping,
    /// Status could not be determined
    Unknown,
}

impl VmStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Stopped => "Stopped",
            Self::Starting => "Starting",
            Self::Stopping => "Stopping",
            Self::Unknown => "Unknown",
        }
    }

    /// True while an action is believed in flight.
    pub fn is_transitional(&self) -> bool {
        matches!(self, Self::Starting | Self::Stopping)
    }
}

/// A colima profile, materialized fresh on every poll cycle.
///
/// Identity is the profile name; nothing here is persisted. The resource
/// fields are declared hints from the profile config, not live measurements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmInstance {
    pub name: String,
    pub status: VmStatus,
    /// Declared CPU count from the profile config
    pub cpus: Option<u32>,
    /// Declared memory in GiB
    pub memory_gib: Option<u32>,
    /// Declared disk size in GiB
    pub disk_gib: Option<u32>,
}

impl VmInstance {
    pub fn new(name: impl Into<String>, status: VmStatus) -> Self {
        Self {
            name: name.into(),
            status,
            cpus: None,
            memory_gib: None,
            disk_gib: None,
        }
    }

    /// Record for a profile observed running but not declared on disk yet.
    pub fn undeclared(name: impl Into<String>) -> Self {
        Self::new(name, VmStatus::Running)
    }
}

/// Sort the published list: the "default" profile first, the rest in
/// case-sensitive ordinal order. Names are unique, so ties cannot occur.
pub fn sort_instances(instances: &mut [VmInstance]) {
    instances.sort_by(|a, b| (a.name != "default", &a.name).cmp(&(b.name != "default", &b.name)));
}
