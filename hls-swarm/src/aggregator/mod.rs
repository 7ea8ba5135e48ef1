//! Statistics Aggregator (spec §4.4): merges per-client snapshots into a
//! single immutable Aggregate Snapshot on a fixed tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::time::{Duration, Instant};

use crate::domain::{
    AggregateSnapshot, ExitCategory, HealthBins, LatencyQuantiles, PerClientStats, Rate,
    StatsRegistry, Throughput,
};

/// Prior counters retained to compute rates as `(current - previous) /
/// measured_elapsed` (spec §4.4 "Aggregation rules").
#[derive(Default, Clone, Copy)]
struct PriorCounters {
    manifest_requests: u64,
    segment_requests: u64,
    bytes_downloaded: u64,
}

/// Throughput sample history for the 1/30/60/300 s rolling windows.
struct ThroughputHistory {
    samples: std::collections::VecDeque<(Instant, u64)>,
}

impl ThroughputHistory {
    fn new() -> Self {
        Self {
            samples: std::collections::VecDeque::new(),
        }
    }

    fn push(&mut self, now: Instant, total_bytes: u64) {
        self.samples.push_back((now, total_bytes));
        let cutoff = now - Duration::from_secs(300);
        while let Some(&(t, _)) = self.samples.front() {
            if t < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn rate_over(&self, now: Instant, window: Duration) -> f64 {
        let cutoff = now - window;
        let oldest = self.samples.iter().find(|(t, _)| *t >= cutoff);
        match (oldest, self.samples.back()) {
            (Some(&(t0, b0)), Some(&(t1, b1))) if t1 > t0 => {
                (b1.saturating_sub(b0)) as f64 / (t1 - t0).as_secs_f64()
            }
            _ => 0.0,
        }
    }
}

/// Atomically-published pointer to the most recent snapshot (spec §5
/// "Aggregate snapshot pointer").
pub struct SnapshotPublisher {
    current: AtomicPtr<AggregateSnapshot>,
}

impl SnapshotPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            current: AtomicPtr::new(std::ptr::null_mut()),
        })
    }

    pub fn publish(&self, snapshot: AggregateSnapshot) {
        let boxed = Box::into_raw(Box::new(snapshot));
        let old = self.current.swap(boxed, Ordering::AcqRel);
        if !old.is_null() {
            unsafe {
                drop(Box::from_raw(old));
            }
        }
    }

    /// Readers clone the snapshot out from behind the pointer (spec §5).
    pub fn latest(&self) -> Option<AggregateSnapshot> {
        let ptr = self.current.load(Ordering::Acquire);
        if ptr.is_null() {
            return None;
        }
        Some(unsafe { (*ptr).clone() })
    }
}

impl Drop for SnapshotPublisher {
    fn drop(&mut self) {
        let ptr = self.current.swap(std::ptr::null_mut(), Ordering::AcqRel);
        if !ptr.is_null() {
            unsafe {
                drop(Box::from_raw(ptr));
            }
        }
    }
}

/// Merges per-client stats into one immutable Aggregate Snapshot on every
/// tick. Holds only immutable snapshot copies; never mutates parser state
/// (spec §3 "Ownership").
pub struct Aggregator {
    stats_registry: StatsRegistry,
    prior: Option<PriorCounters>,
    last_tick: Option<Instant>,
    throughput: ThroughputHistory,
    peak_drop_rate: f64,
    target_clients: u32,
}

impl Aggregator {
    pub fn new(stats_registry: StatsRegistry, target_clients: u32) -> Self {
        Self {
            stats_registry,
            prior: None,
            last_tick: None,
            throughput: ThroughputHistory::new(),
            peak_drop_rate: 0.0,
            target_clients,
        }
    }

    /// Produces one Aggregate Snapshot from the current client stats plus
    /// supervisor-owned counters.
    pub fn tick(
        &mut self,
        active_clients: u32,
        ramp_progress: f64,
        exits_total: &HashMap<ExitCategory, u64>,
        restarts_total: u64,
    ) -> AggregateSnapshot {
        let now = Instant::now();
        let snapshots: Vec<PerClientStats> = self
            .stats_registry
            .iter()
            .map(|entry| entry.value().lock().clone())
            .collect();

        let manifest_requests_total: u64 = snapshots.iter().map(|s| s.manifests_fetched).sum();
        let segment_requests_total: u64 = snapshots.iter().map(|s| s.segments_downloaded).sum();
        let bytes_downloaded_total: u64 = snapshots.iter().map(|s| s.bytes_downloaded).sum();

        let mut lines_dropped: HashMap<&'static str, u64> = HashMap::new();
        let mut lines_parsed: HashMap<&'static str, u64> = HashMap::new();
        for s in &snapshots {
            for (stream, count) in &s.lines_dropped {
                *lines_dropped.entry(stream).or_insert(0) += count;
            }
            for (stream, count) in &s.lines_parsed {
                *lines_parsed.entry(stream).or_insert(0) += count;
            }
        }
        let lines_dropped_total: u64 = lines_dropped.values().sum();
        let lines_parsed_total: u64 = lines_parsed.values().sum();

        let mut http_errors_total: HashMap<u16, u64> = HashMap::new();
        for s in &snapshots {
            for (code, count) in &s.http_errors_by_status {
                *http_errors_total.entry(*code).or_insert(0) += count;
            }
        }

        self.throughput.push(now, bytes_downloaded_total);

        let segment_latency = LatencyQuantiles::max_aggregate(
            snapshots
                .iter()
                .map(|s| LatencyQuantiles::from_array(s.segment_latency.quantiles()))
                .collect::<Vec<_>>()
                .iter(),
        );
        let manifest_latency = LatencyQuantiles::max_aggregate(
            snapshots
                .iter()
                .map(|s| LatencyQuantiles::from_array(s.manifest_latency.quantiles()))
                .collect::<Vec<_>>()
                .iter(),
        );

        let health = snapshots.iter().fold(HealthBins::default(), |mut bins, s| {
            if s.last_speed == 0.0 {
                bins.stalled += 1;
            } else if s.last_speed >= 1.0 {
                bins.above_realtime += 1;
            } else {
                bins.below_realtime += 1;
            }
            bins
        });

        // Rate first-tick policy (spec §4.4): report Unknown rather than 0
        // when there is no previous snapshot to diff against.
        let request_rate = match (self.prior, self.last_tick) {
            (Some(prior), Some(last_tick)) => {
                let elapsed = now.duration_since(last_tick).as_secs_f64();
                if elapsed > 0.0 {
                    let delta = (segment_requests_total + manifest_requests_total)
                        .saturating_sub(prior.segment_requests + prior.manifest_requests);
                    Rate::Known(delta as f64 / elapsed)
                } else {
                    Rate::Unknown
                }
            }
            _ => Rate::Unknown,
        };

        self.prior = Some(PriorCounters {
            manifest_requests: manifest_requests_total,
            segment_requests: segment_requests_total,
            bytes_downloaded: bytes_downloaded_total,
        });
        self.last_tick = Some(now);

        let total_lines = lines_parsed_total + lines_dropped_total;
        let drop_rate = if total_lines > 0 {
            lines_dropped_total as f64 / total_lines as f64
        } else {
            0.0
        };
        self.peak_drop_rate = self.peak_drop_rate.max(drop_rate);

        AggregateSnapshot {
            generated_at: now,
            active_clients,
            target_clients: self.target_clients,
            ramp_progress,
            manifest_requests_total,
            segment_requests_total,
            bytes_downloaded_total,
            http_errors_total,
            client_exits_total: exits_total.clone(),
            restarts_total,
            request_rate,
            segment_throughput: Throughput {
                window_1s: self.throughput.rate_over(now, Duration::from_secs(1)),
                window_30s: self.throughput.rate_over(now, Duration::from_secs(30)),
                window_60s: self.throughput.rate_over(now, Duration::from_secs(60)),
                window_300s: self.throughput.rate_over(now, Duration::from_secs(300)),
            },
            segment_latency,
            manifest_latency,
            health,
            lines_dropped,
            lines_parsed,
            drop_rate,
            peak_drop_rate: self.peak_drop_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::new_stats_registry;

    #[test]
    fn first_tick_rate_is_unknown() {
        let registry = new_stats_registry();
        let mut aggregator = Aggregator::new(registry, 5);
        let snapshot = aggregator.tick(0, 0.0, &HashMap::new(), 0);
        assert_eq!(snapshot.request_rate, Rate::Unknown);
    }

    #[test]
    fn health_invariant_holds() {
        let registry = new_stats_registry();
        registry.insert(
            1,
            std::sync::Arc::new(parking_lot::Mutex::new(PerClientStats::new(Instant::now()))),
        );
        let mut aggregator = Aggregator::new(registry, 1);
        let snapshot = aggregator.tick(1, 1.0, &HashMap::new(), 0);
        assert!(snapshot.check_health_invariant());
    }

    #[test]
    fn quantile_invariant_holds_when_empty() {
        let registry = new_stats_registry();
        let mut aggregator = Aggregator::new(registry, 0);
        let snapshot = aggregator.tick(0, 1.0, &HashMap::new(), 0);
        assert!(snapshot.check_quantile_invariant());
    }

    #[test]
    fn identical_counters_yield_zero_rate_on_second_tick() {
        let registry = new_stats_registry();
        let mut aggregator = Aggregator::new(registry, 0);
        let _ = aggregator.tick(0, 1.0, &HashMap::new(), 0);
        std::thread::sleep(Duration::from_millis(5));
        let snapshot = aggregator.tick(0, 1.0, &HashMap::new(), 0);
        assert_eq!(snapshot.request_rate, Rate::Known(0.0));
    }
}
