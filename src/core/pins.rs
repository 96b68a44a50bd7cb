//! Pin policy - Bounded, auto-curated container shortlist
//!
//! Running containers are pinned automatically unless the user has pinned
//! them already or explicitly unpinned them. The manually-unpinned memory is
//! pruned to currently-running ids on every reconciliation, so once a
//! container stops its unpin is forgotten and a future same-named run is
//! auto-pinned again.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::container::{Container, ContainerStatus};

/// Maximum number of pinned containers. Insertion order doubles as display
/// priority and eviction age.
pub const MAX_PINNED: usize = 10;

/// Eviction preference, least "active" first.
const EVICTION_ORDER: [ContainerStatus; 5] = [
    ContainerStatus::Exited,
    ContainerStatus::Created,
    ContainerStatus::Other,
    ContainerStatus::Paused,
    ContainerStatus::Running,
];

/// Ordered pinned ids plus the manually-unpinned suppression set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinSet {
    #[serde(default)]
    pinned: Vec<String>,
    #[serde(default)]
    unpinned: HashSet<String>,
}

impl PinSet {
    pub fn new(pinned: Vec<String>, unpinned: Vec<String>) -> Self {
        let mut seen = HashSet::new();
        let pinned = pinned
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .take(MAX_PINNED)
            .collect();
        Self {
            pinned,
            unpinned: unpinned.into_iter().collect(),
        }
    }

    /// Pinned ids in insertion (priority) order.
    pub fn pinned(&self) -> &[String] {
        &self.pinned
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pinned.iter().any(|p| p == id)
    }

    /// Whether a container is pinned by id or by its fallback name key.
    pub fn is_pinned(&self, container: &Container) -> bool {
        self.pinned
            .iter()
            .any(|p| *p == container.id || *p == container.name)
    }

    pub fn is_manually_unpinned(&self, id: &str) -> bool {
        self.unpinned.contains(id)
    }

    pub fn unpinned_ids(&self) -> Vec<String> {
        self.unpinned.iter().cloned().collect()
    }

    /// Pin an id, evicting at capacity. Returns false for duplicates.
    pub fn pin(&mut self, id: &str, live: &[Container]) -> bool {
        if self.contains(id) {
            return false;
        }
        if self.pinned.len() >= MAX_PINNED {
            self.evict(live);
        }
        self.pinned.push(id.to_string());
        self.unpinned.remove(id);
        true
    }

    /// Unpin an id and remember the choice until the container stops running.
    pub fn unpin(&mut self, id: &str) -> bool {
        let before = self.pinned.len();
        self.pinned.retain(|p| p != id);
        if self.pinned.len() == before {
            return false;
        }
        self.unpinned.insert(id.to_string());
        true
    }

    /// Evict one pinned id to make room.
    ///
    /// Scans status tiers least-active-first; within the first tier that has
    /// any match the oldest-inserted pin goes. A pin that resolves to no live
    /// container participates in no tier; if the whole scan finds nothing the
    /// oldest entry is evicted unconditionally (orphaned pin).
    pub fn evict(&mut self, live: &[Container]) -> Option<String> {
        let status_of = |pin: &str| -> Option<ContainerStatus> {
            live.iter()
                .find(|c| c.id == pin || c.name == pin)
                .map(|c| c.status)
        };

        for tier in EVICTION_ORDER {
            if let Some(idx) = self
                .pinned
                .iter()
                .position(|pin| status_of(pin) == Some(tier))
            {
                let evicted = self.pinned.remove(idx);
                debug!(id = %evicted, status = tier.label(), "evicted pin");
                return Some(evicted);
            }
        }

        if self.pinned.is_empty() {
            return None;
        }
        let evicted = self.pinned.remove(0);
        debug!(id = %evicted, "evicted orphaned pin");
        Some(evicted)
    }

    /// Apply the auto-pin invariant against the live container list.
    ///
    /// Auto-pinning fills free capacity only; eviction is reserved for the
    /// explicit `pin` action, so repeated reconciliation against an unchanged
    /// list reaches a fixed point instead of cycling evictions. Returns true
    /// when the set changed and should be persisted.
    pub fn reconcile(&mut self, live: &[Container]) -> bool {
        let mut changed = false;

        for container in live.iter().filter(|c| c.is_running()) {
            if self.is_pinned(container) || self.is_manually_unpinned(&container.id) {
                continue;
            }
            if self.pinned.len() >= MAX_PINNED {
                break;
            }
            if self.pin(&container.id, live) {
                debug!(id = %container.short_id(), name = %container.name, "auto-pinned");
                changed = true;
            }
        }

        // Unpin memory only survives while the container is observed running.
        let running_ids: HashSet<&str> = live
            .iter()
            .filter(|c| c.is_running())
            .map(|c| c.id.as_str())
            .collect();
        let before = self.unpinned.len();
        self.unpinned.retain(|id| running_ids.contains(id.as_str()));
        changed |= self.unpinned.len() != before;

        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live(entries: &[(&str, &str, ContainerStatus)]) -> Vec<Container> {
        entries
            .iter()
            .map(|(id, name, status)| Container {
                id: id.to_string(),
                name: name.to_string(),
                image: "img".to_string(),
                status: *status,
                status_text: String::new(),
                ports: String::new(),
                created: String::new(),
            })
            .collect()
    }

    #[test]
    fn pin_rejects_duplicates() {
        let mut pins = PinSet::default();
        assert!(pins.pin("a", &[]));
        assert!(!pins.pin("a", &[]));
        assert_eq!(pins.pinned(), ["a"]);
    }

    #[test]
    fn capacity_eviction_prefers_least_active_tier() {
        // Ten pins: nine running plus one exited in the middle.
        let mut entries = Vec::new();
        for i in 0..10 {
            let status = if i == 4 {
                ContainerStatus::Exited
            } else {
                ContainerStatus::Running
            };
            entries.push((format!("c{i}"), format!("name{i}"), status));
        }
        let containers = live(
            &entries
                .iter()
                .map(|(id, name, st)| (id.as_str(), name.as_str(), *st))
                .collect::<Vec<_>>(),
        );
        let mut pins = PinSet::new(entries.iter().map(|(id, _, _)| id.clone()).collect(), vec![]);
        assert_eq!(pins.pinned().len(), MAX_PINNED);

        assert!(pins.pin("fresh", &containers));
        assert_eq!(pins.pinned().len(), MAX_PINNED);
        assert!(!pins.contains("c4"), "the exited pin should have been evicted");
        assert!(pins.contains("fresh"));
    }

    #[test]
    fn eviction_within_tier_takes_oldest_inserted() {
        let containers = live(&[
            ("a", "na", ContainerStatus::Exited),
            ("b", "nb", ContainerStatus::Exited),
        ]);
        let mut pins = PinSet::new(vec!["a".into(), "b".into()], vec![]);
        assert_eq!(pins.evict(&containers), Some("a".to_string()));
    }

    #[test]
    fn eviction_falls_back_to_oldest_orphan() {
        // None of the pins resolve to a live container.
        let mut pins = PinSet::new(vec!["gone1".into(), "gone2".into()], vec![]);
        assert_eq!(pins.evict(&[]), Some("gone1".to_string()));
        assert_eq!(pins.pinned(), ["gone2"]);
    }

    #[test]
    fn running_containers_are_auto_pinned() {
        let containers = live(&[
            ("r1", "web", ContainerStatus::Running),
            ("x1", "old", ContainerStatus::Exited),
        ]);
        let mut pins = PinSet::default();
        assert!(pins.reconcile(&containers));
        assert_eq!(pins.pinned(), ["r1"]);
    }

    #[test]
    fn auto_pin_is_idempotent() {
        let containers = live(&[
            ("r1", "web", ContainerStatus::Running),
            ("r2", "db", ContainerStatus::Running),
        ]);
        let mut pins = PinSet::default();
        assert!(pins.reconcile(&containers));
        let snapshot = pins.clone();
        assert!(!pins.reconcile(&containers));
        assert_eq!(pins, snapshot);
    }

    #[test]
    fn auto_pin_over_capacity_reaches_a_fixed_point() {
        // Eleven running containers against an empty pin set: auto-pin fills
        // to capacity and a second pass with the unchanged list must neither
        // evict nor report a change.
        let entries: Vec<(String, String, ContainerStatus)> = (0..11)
            .map(|i| (format!("c{i}"), format!("name{i}"), ContainerStatus::Running))
            .collect();
        let containers = live(
            &entries
                .iter()
                .map(|(id, name, st)| (id.as_str(), name.as_str(), *st))
                .collect::<Vec<_>>(),
        );

        let mut pins = PinSet::default();
        assert!(pins.reconcile(&containers));
        assert_eq!(pins.pinned().len(), MAX_PINNED);

        let snapshot = pins.clone();
        assert!(!pins.reconcile(&containers));
        assert_eq!(pins, snapshot);
    }

    #[test]
    fn name_match_counts_as_pinned() {
        // Pin recorded under the old container id's name survives recreation.
        let containers = live(&[("newid", "web", ContainerStatus::Running)]);
        let mut pins = PinSet::new(vec!["web".into()], vec![]);
        assert!(!pins.reconcile(&containers));
        assert_eq!(pins.pinned(), ["web"]);
    }

    #[test]
    fn manual_unpin_suppresses_auto_pin_while_running() {
        let containers = live(&[("r1", "web", ContainerStatus::Running)]);
        let mut pins = PinSet::default();
        pins.reconcile(&containers);
        assert!(pins.unpin("r1"));

        assert!(!pins.reconcile(&containers));
        assert!(pins.pinned().is_empty());
        assert!(pins.is_manually_unpinned("r1"));
    }

    #[test]
    fn unpin_memory_is_forgotten_once_container_stops() {
        let running = live(&[("r1", "web", ContainerStatus::Running)]);
        let mut pins = PinSet::default();
        pins.reconcile(&running);
        pins.unpin("r1");

        // Container stops: the unpin record is pruned.
        let stopped = live(&[("r1", "web", ContainerStatus::Exited)]);
        assert!(pins.reconcile(&stopped));
        assert!(!pins.is_manually_unpinned("r1"));

        // Same identity comes back running: eligible for auto-pin again.
        assert!(pins.reconcile(&running));
        assert_eq!(pins.pinned(), ["r1"]);
    }

    #[test]
    fn pin_clears_manual_unpin_memory() {
        let mut pins = PinSet::default();
        pins.pin("a", &[]);
        pins.unpin("a");
        assert!(pins.is_manually_unpinned("a"));
        pins.pin("a", &[]);
        assert!(!pins.is_manually_unpinned("a"));
    }
}
