//! Metrics exposition (spec §6): Prometheus text format plus the health
//! checker backing `/health` and `/ready`.

mod health;
mod prometheus;

pub use health::{ComponentHealth, HealthChecker, HealthStatus, SystemHealth};
pub use prometheus::PrometheusExporter;
