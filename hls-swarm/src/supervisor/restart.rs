//! Restart backoff tracking (spec §4.3 "Restart policy").
//!
//! Exponential backoff: initial 250 ms, multiplier 1.7, capped at 5 s, with
//! an optional maximum restart count (0 = unlimited).

use std::collections::HashMap;
use std::time::Duration;

pub const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
pub const BACKOFF_MULTIPLIER: f64 = 1.7;
pub const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Per-client restart history.
#[derive(Debug, Clone, Default)]
struct RestartHistory {
    restart_count: u32,
}

/// Tracks restart counts per client and computes the next backoff delay.
pub struct RestartTracker {
    history: HashMap<u64, RestartHistory>,
    max_restarts: u32,
}

impl RestartTracker {
    pub fn new(max_restarts: u32) -> Self {
        Self {
            history: HashMap::new(),
            max_restarts,
        }
    }

    /// Records a restart for `client_id` and returns the backoff to wait
    /// before re-spawning, along with the client's new restart count.
    pub fn record_restart(&mut self, client_id: u64) -> (Duration, u32) {
        let entry = self.history.entry(client_id).or_default();
        let backoff = Self::backoff_for(entry.restart_count);
        entry.restart_count += 1;
        (backoff, entry.restart_count)
    }

    pub fn restart_count(&self, client_id: u64) -> u32 {
        self.history.get(&client_id).map(|h| h.restart_count).unwrap_or(0)
    }

    /// `false` once `max_restarts` (if nonzero) has been reached.
    pub fn can_restart(&self, client_id: u64) -> bool {
        self.max_restarts == 0 || self.restart_count(client_id) < self.max_restarts
    }

    pub fn total_restarts(&self) -> u64 {
        self.history.values().map(|h| h.restart_count as u64).sum()
    }

    fn backoff_for(prior_restarts: u32) -> Duration {
        let millis = INITIAL_BACKOFF.as_millis() as f64 * BACKOFF_MULTIPLIER.powi(prior_restarts as i32);
        let millis = millis.min(MAX_BACKOFF.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_restart_is_initial_backoff() {
        let mut tracker = RestartTracker::new(0);
        let (backoff, count) = tracker.record_restart(1);
        assert_eq!(backoff, Duration::from_millis(250));
        assert_eq!(count, 1);
    }

    #[test]
    fn backoff_grows_by_multiplier_and_caps() {
        let mut tracker = RestartTracker::new(0);
        let mut last = Duration::ZERO;
        for _ in 0..20 {
            let (backoff, _) = tracker.record_restart(1);
            assert!(backoff >= last || backoff == MAX_BACKOFF);
            assert!(backoff <= MAX_BACKOFF);
            last = backoff;
        }
        assert_eq!(last, MAX_BACKOFF);
    }

    #[test]
    fn max_restarts_enforced_when_nonzero() {
        let mut tracker = RestartTracker::new(2);
        assert!(tracker.can_restart(1));
        tracker.record_restart(1);
        assert!(tracker.can_restart(1));
        tracker.record_restart(1);
        assert!(!tracker.can_restart(1));
    }

    #[test]
    fn unlimited_when_zero() {
        let mut tracker = RestartTracker::new(0);
        for _ in 0..50 {
            tracker.record_restart(1);
        }
        assert!(tracker.can_restart(1));
    }

    #[test]
    fn stall_then_restart_scenario() {
        // spec §8 scenario 2: target_duration=1s; first backoff is 250ms.
        let mut tracker = RestartTracker::new(0);
        let (backoff, count) = tracker.record_restart(7);
        assert_eq!(backoff, Duration::from_millis(250));
        assert_eq!(count, 1);
    }
}
