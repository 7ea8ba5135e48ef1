//! Core data model (spec §3): Client, Event, Per-Client Stats, Aggregate Snapshot.

mod client;
mod event;
mod snapshot;
mod stats;

pub use client::{ClientHandle, ClientState};
pub use event::{Event, ExitCategory, ExitCode};
pub use snapshot::{AggregateSnapshot, HealthBins, LatencyQuantiles, Rate, Throughput};
pub use stats::{
    ClientStatsSnapshot, PerClientStats, SharedStats, StatsRegistry, new_stats_registry,
};
