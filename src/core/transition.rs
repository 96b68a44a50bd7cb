//! Transition tracking - Optimistic in-flight status overlay
//!
//! While a lifecycle action is pending the sampled ground truth lags reality:
//! a `start` dispatched through an interactive terminal can take several
//! seconds before the process even appears. The tracker holds the optimistic
//! display status for each key until the observed status matches the expected
//! terminal status and a minimum dwell time has elapsed, so the published
//! state never flaps back to stale ground truth mid-action.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

/// Minimum time an instance transition stays in flight even if the sampled
/// status already matches the expectation. Dispatching through the
/// privileged-user terminal path can itself take seconds, during which a poll
/// would still observe the pre-action state.
pub const INSTANCE_SETTLE_DWELL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
struct Transition<S> {
    display: S,
    expected: S,
    started_at: Instant,
}

/// Per-key optimistic transition state with a dwell floor.
///
/// The engine keys this by profile name with the 5s dwell. Container actions
/// settle edge-triggered on any status change instead, bounded by the
/// fast-poll ceiling, so they do not go through a tracker.
#[derive(Debug)]
pub struct TransitionTracker<S> {
    entries: HashMap<String, Transition<S>>,
    min_dwell: Duration,
}

impl<S: Copy + PartialEq + std::fmt::Debug> TransitionTracker<S> {
    pub fn new(min_dwell: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            min_dwell,
        }
    }

    /// Record a transition for `key`, overwriting any prior entry.
    pub fn begin(&mut self, key: &str, display: S, expected: S) {
        self.begin_at(key, display, expected, Instant::now());
    }

    pub fn begin_at(&mut self, key: &str, display: S, expected: S, now: Instant) {
        // The event macro pulls tracing's field helpers into scope, which
        // would shadow a local named `display`.
        let shown = display;
        debug!(key, ?shown, ?expected, "transition started");
        self.entries.insert(
            key.to_string(),
            Transition {
                display,
                expected,
                started_at: now,
            },
        );
    }

    /// Resolve the effective status for `key` given the freshly observed one.
    ///
    /// Settles (removes the entry and returns the observed status) only when
    /// the observation matches the expectation and the dwell floor has
    /// elapsed; otherwise the stored display status wins and the entry stays.
    pub fn reconcile(&mut self, key: &str, observed: S) -> S {
        self.reconcile_at(key, observed, Instant::now())
    }

    pub fn reconcile_at(&mut self, key: &str, observed: S, now: Instant) -> S {
        let Some(entry) = self.entries.get(key) else {
            return observed;
        };

        let elapsed = now.saturating_duration_since(entry.started_at);
        if observed == entry.expected && elapsed >= self.min_dwell {
            debug!(key, ?observed, "transition settled");
            self.entries.remove(key);
            return observed;
        }

        entry.display
    }

    /// Drop the entry for `key` without waiting for it to settle.
    pub fn clear(&mut self, key: &str) {
        self.entries.remove(key);
    }

    /// True when no transition is in flight; fast polling can stop.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::instance::VmStatus;

    #[test]
    fn no_entry_passes_observed_through() {
        let mut tracker: TransitionTracker<VmStatus> = TransitionTracker::new(INSTANCE_SETTLE_DWELL);
        assert_eq!(
            tracker.reconcile("default", VmStatus::Stopped),
            VmStatus::Stopped
        );
        assert!(tracker.is_empty());
    }

    #[test]
    fn settles_only_after_dwell_floor() {
        let mut tracker = TransitionTracker::new(INSTANCE_SETTLE_DWELL);
        let t0 = Instant::now();
        tracker.begin_at("x", VmStatus::Starting, VmStatus::Running, t0);

        // Observed status already matches, but the dwell floor has not passed.
        let just_before = t0 + Duration::from_millis(4900);
        assert_eq!(
            tracker.reconcile_at("x", VmStatus::Running, just_before),
            VmStatus::Starting
        );
        assert!(!tracker.is_empty());

        let just_after = t0 + Duration::from_millis(5100);
        assert_eq!(
            tracker.reconcile_at("x", VmStatus::Running, just_after),
            VmStatus::Running
        );
        assert!(tracker.is_empty());
    }

    #[test]
    fn mismatched_observation_keeps_display_status() {
        let mut tracker = TransitionTracker::new(INSTANCE_SETTLE_DWELL);
        let t0 = Instant::now();
        tracker.begin_at("work", VmStatus::Stopping, VmStatus::Stopped, t0);

        // Long past the dwell floor, but ground truth still says Running.
        let late = t0 + Duration::from_secs(60);
        assert_eq!(
            tracker.reconcile_at("work", VmStatus::Running, late),
            VmStatus::Stopping
        );
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn begin_overwrites_previous_entry() {
        let mut tracker = TransitionTracker::new(INSTANCE_SETTLE_DWELL);
        let t0 = Instant::now();
        tracker.begin_at("x", VmStatus::Starting, VmStatus::Running, t0);
        tracker.begin_at("x", VmStatus::Stopping, VmStatus::Stopped, t0);
        assert_eq!(tracker.len(), 1);
        assert_eq!(
            tracker.reconcile_at("x", VmStatus::Running, t0 + Duration::from_secs(10)),
            VmStatus::Stopping
        );
    }

    #[test]
    fn zero_dwell_settles_immediately() {
        use crate::core::container::ContainerStatus;

        let mut tracker = TransitionTracker::new(Duration::ZERO);
        let t0 = Instant::now();
        tracker.begin_at("abc123", ContainerStatus::Running, ContainerStatus::Paused, t0);
        assert_eq!(
            tracker.reconcile_at("abc123", ContainerStatus::Paused, t0),
            ContainerStatus::Paused
        );
        assert!(tracker.is_empty());
    }

    #[test]
    fn clear_drops_entry() {
        let mut tracker = TransitionTracker::new(INSTANCE_SETTLE_DWELL);
        tracker.begin("x", VmStatus::Starting, VmStatus::Running);
        tracker.clear("x");
        assert!(tracker.is_empty());
    }
}
