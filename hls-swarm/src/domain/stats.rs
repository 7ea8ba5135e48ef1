//! Per-Client Stats (spec §3): counters and latency sketches owned
//! exclusively by a client's pipeline task.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tdigest::TDigest;

/// Min/sum/max/count accumulator paired with a T-Digest for quantiles.
#[derive(Debug, Clone)]
pub struct LatencyAccumulator {
    digest: TDigest,
    pub min: Duration,
    pub max: Duration,
    pub sum: Duration,
    pub count: u64,
}

impl Default for LatencyAccumulator {
    fn default() -> Self {
        Self {
            digest: TDigest::new_with_size(100),
            min: Duration::MAX,
            max: Duration::ZERO,
            sum: Duration::ZERO,
            count: 0,
        }
    }
}

impl LatencyAccumulator {
    pub fn observe(&mut self, d: Duration) {
        self.min = self.min.min(d);
        self.max = self.max.max(d);
        self.sum += d;
        self.count += 1;
        self.digest = self.digest.clone().merge_unsorted(vec![d.as_secs_f64()]);
    }

    /// Quantiles at P25/50/75/95/99 plus the observed max, in seconds.
    pub fn quantiles(&self) -> [f64; 6] {
        if self.count == 0 {
            return [0.0; 6];
        }
        [
            self.digest.estimate_quantile(0.25),
            self.digest.estimate_quantile(0.50),
            self.digest.estimate_quantile(0.75),
            self.digest.estimate_quantile(0.95),
            self.digest.estimate_quantile(0.99),
            self.max.as_secs_f64(),
        ]
    }
}

/// Counters and sketches for one client, mutated only by its owning pipeline
/// task. Counters are monotonically non-decreasing for the client's lifetime.
#[derive(Debug, Clone)]
pub struct PerClientStats {
    pub segments_downloaded: u64,
    pub segment_failures: u64,
    pub bytes_downloaded: u64,
    pub manifests_fetched: u64,
    pub tcp_connects: u64,
    pub sequence_skips: u64,
    pub lines_parsed: HashMap<&'static str, u64>,
    pub lines_dropped: HashMap<&'static str, u64>,
    pub parse_skipped: u64,
    pub http_errors_by_status: HashMap<u16, u64>,
    pub segment_latency: LatencyAccumulator,
    pub manifest_latency: LatencyAccumulator,
    /// Fraction of timed events whose timestamp came from the log line
    /// itself rather than the receive clock (timing-quality indicator).
    pub timestamps_embedded: u64,
    pub timestamps_total: u64,
    pub last_progress: Instant,
    pub last_speed: f64,
}

impl PerClientStats {
    pub fn new(now: Instant) -> Self {
        Self {
            segments_downloaded: 0,
            segment_failures: 0,
            bytes_downloaded: 0,
            manifests_fetched: 0,
            tcp_connects: 0,
            sequence_skips: 0,
            lines_parsed: HashMap::new(),
            lines_dropped: HashMap::new(),
            parse_skipped: 0,
            http_errors_by_status: HashMap::new(),
            segment_latency: LatencyAccumulator::default(),
            manifest_latency: LatencyAccumulator::default(),
            timestamps_embedded: 0,
            timestamps_total: 0,
            last_progress: now,
            last_speed: 0.0,
        }
    }

    pub fn timestamp_quality(&self) -> f64 {
        if self.timestamps_total == 0 {
            return 0.0;
        }
        self.timestamps_embedded as f64 / self.timestamps_total as f64
    }
}

/// An immutable, cheaply-cloned copy of a client's stats read by the
/// aggregator. The aggregator never mutates parser state (spec §3).
pub type ClientStatsSnapshot = PerClientStats;

/// A client's live stats, shared between its owning pipeline task (the
/// only writer) and the aggregator (a reader that clones a copy each tick,
/// per spec §3 "aggregator holds only immutable snapshot copies"). Lock
/// hold time is one field assignment or one clone, never across an await.
pub type SharedStats = std::sync::Arc<parking_lot::Mutex<PerClientStats>>;

/// Registry of live per-client stats, keyed by client id. The supervisor
/// inserts an entry before spawning a client and removes it once the
/// aggregator has merged the client's final snapshot.
pub type StatsRegistry = std::sync::Arc<dashmap::DashMap<u64, SharedStats>>;

pub fn new_stats_registry() -> StatsRegistry {
    std::sync::Arc::new(dashmap::DashMap::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantiles_ordered() {
        let mut acc = LatencyAccumulator::default();
        for ms in (10..=100).step_by(10) {
            acc.observe(Duration::from_millis(ms));
        }
        let q = acc.quantiles();
        for w in q.windows(2) {
            assert!(w[0] <= w[1], "{:?}", q);
        }
        assert!((q[5] - 0.1).abs() < 1e-9);
    }

    #[test]
    fn empty_accumulator_is_zero() {
        let acc = LatencyAccumulator::default();
        assert_eq!(acc.quantiles(), [0.0; 6]);
    }
}
