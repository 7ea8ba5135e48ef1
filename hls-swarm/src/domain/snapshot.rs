//! Aggregate Snapshot (spec §3, §4.4): an immutable record produced at a
//! fixed cadence by the Statistics Aggregator.

use std::collections::HashMap;
use std::time::Instant;

use super::event::ExitCategory;

/// A rate that may be unknown on the first tick after start (spec §4.4,
/// "Rate first-tick policy"). Downstream renderers must not coerce this to
/// zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rate {
    Known(f64),
    Unknown,
}

impl Rate {
    pub fn value_or_zero(&self) -> f64 {
        match self {
            Rate::Known(v) => *v,
            Rate::Unknown => 0.0,
        }
    }
}

/// Throughput over several rolling windows, in bytes/second.
#[derive(Debug, Clone, Copy, Default)]
pub struct Throughput {
    pub window_1s: f64,
    pub window_30s: f64,
    pub window_60s: f64,
    pub window_300s: f64,
}

/// Percentile ladder: P25 <= P50 <= P75 <= P95 <= P99 <= Max.
#[derive(Debug, Clone, Copy, Default)]
pub struct LatencyQuantiles {
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
}

impl LatencyQuantiles {
    pub fn from_array(v: [f64; 6]) -> Self {
        Self {
            p25: v[0],
            p50: v[1],
            p75: v[2],
            p95: v[3],
            p99: v[4],
            max: v[5],
        }
    }

    /// Max-aggregation across clients per percentile (spec §4.4): the
    /// worst client's percentile, not a merged digest. Order-independent.
    pub fn max_aggregate<'a>(items: impl Iterator<Item = &'a LatencyQuantiles>) -> Self {
        items.fold(Self::default(), |acc, q| Self {
            p25: acc.p25.max(q.p25),
            p50: acc.p50.max(q.p50),
            p75: acc.p75.max(q.p75),
            p95: acc.p95.max(q.p95),
            p99: acc.p99.max(q.p99),
            max: acc.max.max(q.max),
        })
    }
}

/// Active-client health bins, derived from each client's instantaneous
/// speed (spec open question #2: instantaneous, not smoothed).
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthBins {
    pub above_realtime: u32,
    pub below_realtime: u32,
    pub stalled: u32,
}

impl HealthBins {
    pub fn active(&self) -> u32 {
        self.above_realtime + self.below_realtime + self.stalled
    }
}

/// An immutable record produced at a fixed cadence (default 200 ms),
/// totally ordered by generation timestamp (spec §5 "Ordering guarantees").
#[derive(Debug, Clone)]
pub struct AggregateSnapshot {
    pub generated_at: Instant,
    pub active_clients: u32,
    pub target_clients: u32,
    pub ramp_progress: f64,

    pub manifest_requests_total: u64,
    pub segment_requests_total: u64,
    pub bytes_downloaded_total: u64,
    pub http_errors_total: HashMap<u16, u64>,
    pub client_exits_total: HashMap<ExitCategory, u64>,
    pub restarts_total: u64,

    pub request_rate: Rate,
    pub segment_throughput: Throughput,

    pub segment_latency: LatencyQuantiles,
    pub manifest_latency: LatencyQuantiles,

    pub health: HealthBins,

    pub lines_dropped: HashMap<&'static str, u64>,
    pub lines_parsed: HashMap<&'static str, u64>,
    pub drop_rate: f64,
    pub peak_drop_rate: f64,
}

impl AggregateSnapshot {
    /// Invariant 1 (spec §8): active == above + below + stalled.
    pub fn check_health_invariant(&self) -> bool {
        self.active_clients == self.health.active()
    }

    /// Invariant 2 (spec §8): quantile ladder is non-decreasing.
    pub fn check_quantile_invariant(&self) -> bool {
        let q = &self.segment_latency;
        q.p25 <= q.p50 && q.p50 <= q.p75 && q.p75 <= q.p95 && q.p95 <= q.p99 && q.p99 <= q.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_aggregate_is_order_independent() {
        let a = LatencyQuantiles {
            p25: 1.0,
            p50: 2.0,
            p75: 3.0,
            p95: 4.0,
            p99: 5.0,
            max: 6.0,
        };
        let b = LatencyQuantiles {
            p25: 2.0,
            p50: 1.0,
            p75: 5.0,
            p95: 3.0,
            p99: 4.0,
            max: 10.0,
        };
        let forward = LatencyQuantiles::max_aggregate([&a, &b].into_iter());
        let shuffled = LatencyQuantiles::max_aggregate([&b, &a].into_iter());
        assert_eq!(forward.max, shuffled.max);
        assert_eq!(forward.p50, shuffled.p50);
        assert_eq!(forward.max, 10.0);
    }

    #[test]
    fn health_bins_sum_to_active() {
        let bins = HealthBins {
            above_realtime: 3,
            below_realtime: 2,
            stalled: 1,
        };
        assert_eq!(bins.active(), 6);
    }
}
