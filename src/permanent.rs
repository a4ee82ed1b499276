//! In-memory blacklist for models proven absent this process lifetime.
//!
//! Stronger than a failure-store cooldown: a permanently failed model needs
//! no timestamp and is never retried until restart. Deliberately not
//! persisted, so a model that reappears after upstream maintenance gets a
//! fresh chance on the next boot.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tracing::warn;

/// Temporary failures older than this drop out of the stats.
const TEMPORARY_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Two tiers: `permanent` entries are skipped by the selector for the rest of
/// the session; `temporary` entries are diagnostics only and never consulted
/// for skipping.
#[derive(Debug, Default)]
pub struct PermanentFailureTracker {
    inner: RwLock<TrackerState>,
}

#[derive(Debug, Default)]
struct TrackerState {
    permanent: HashMap<String, Instant>,
    temporary: HashMap<String, Instant>,
}

impl PermanentFailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_permanent(&self, model: &str) {
        let mut state = self.inner.write().unwrap();
        state.permanent.insert(model.to_owned(), Instant::now());
        warn!(model, "model marked permanently unavailable for this session");
    }

    pub fn mark_temporary(&self, model: &str) {
        let mut state = self.inner.write().unwrap();
        state.temporary.insert(model.to_owned(), Instant::now());
    }

    pub fn is_permanent(&self, model: &str) -> bool {
        self.inner.read().unwrap().permanent.contains_key(model)
    }

    /// `(permanent, recent-temporary)` counts for exhaustion diagnostics.
    pub fn stats(&self) -> (usize, usize) {
        let state = self.inner.read().unwrap();
        let temporary = state
            .temporary
            .values()
            .filter(|at| at.elapsed() < TEMPORARY_WINDOW)
            .count();
        (state.permanent.len(), temporary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmarked_models_are_not_permanent() {
        let tracker = PermanentFailureTracker::new();
        assert!(!tracker.is_permanent("a/x"));
    }

    #[test]
    fn marking_is_monotonic_within_a_session() {
        let tracker = PermanentFailureTracker::new();
        tracker.mark_permanent("a/x");
        assert!(tracker.is_permanent("a/x"));
        // Marking again does not change anything.
        tracker.mark_permanent("a/x");
        assert!(tracker.is_permanent("a/x"));
        assert_eq!(tracker.stats(), (1, 0));
    }

    #[test]
    fn temporary_marks_only_show_up_in_stats() {
        let tracker = PermanentFailureTracker::new();
        tracker.mark_temporary("a/x");
        tracker.mark_temporary("b/y");
        assert!(!tracker.is_permanent("a/x"));
        assert_eq!(tracker.stats(), (0, 2));
    }

    #[test]
    fn stats_count_both_tiers_independently() {
        let tracker = PermanentFailureTracker::new();
        tracker.mark_permanent("a/x");
        tracker.mark_temporary("a/x");
        tracker.mark_temporary("b/y");
        assert_eq!(tracker.stats(), (1, 2));
    }
}
