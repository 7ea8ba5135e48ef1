//! Ramp-up scheduling (spec §4.3 "Ramp-up").

use std::time::Duration;

use rand::Rng;

/// The i-th client's scheduled start offset from run start: `(i / R) +
/// uniform(-J, +J)`, floored at zero.
pub fn scheduled_start(index: u32, rate_per_second: u32, jitter: Duration) -> Duration {
    let base_secs = index as f64 / rate_per_second.max(1) as f64;
    let jitter_secs = if jitter.is_zero() {
        0.0
    } else {
        rand::rng().random_range(-jitter.as_secs_f64()..=jitter.as_secs_f64())
    };
    Duration::from_secs_f64((base_secs + jitter_secs).max(0.0))
}

/// Ramp progress as `started / target ∈ [0, 1]`.
pub fn progress(started: u32, target: u32) -> f64 {
    if target == 0 {
        return 1.0;
    }
    (started as f64 / target as f64).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_up_scenario() {
        // spec §8 scenario 1: clients=10, ramp_rate=5, ramp_jitter=0.
        let starts: Vec<Duration> = (0..10).map(|i| scheduled_start(i, 5, Duration::ZERO)).collect();
        let active_after_1s = starts.iter().filter(|d| d.as_secs_f64() < 1.0).count();
        assert_eq!(active_after_1s, 5);
        let active_after_2s = starts.iter().filter(|d| d.as_secs_f64() < 2.0).count();
        assert_eq!(active_after_2s, 10);
    }

    #[test]
    fn progress_bounds() {
        assert_eq!(progress(0, 10), 0.0);
        assert_eq!(progress(10, 10), 1.0);
        assert_eq!(progress(5, 10), 0.5);
        assert_eq!(progress(0, 0), 1.0);
    }

    #[test]
    fn jitter_stays_non_negative() {
        for i in 0..100 {
            let d = scheduled_start(i, 5, Duration::from_millis(100));
            assert!(d >= Duration::ZERO);
        }
    }
}
