//! hls-swarm: an HLS load-generation and observability platform.
//!
//! Spawns and supervises a swarm of external media-client child processes,
//! parses their debug output into structured events, aggregates real-time
//! statistics with T-Digest sketches, and exposes them over Prometheus.

pub mod aggregator;
pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod origin;
pub mod orchestrator;
pub mod parser;
pub mod pipeline;
pub mod preflight;
pub mod segment_cache;
pub mod supervisor;

pub use error::{Error, Result};
