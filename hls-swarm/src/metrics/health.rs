//! Health checking (spec §4.7 "health/ready"), trimmed from the teacher's
//! general-purpose health checker down to the components this binary has:
//! the supervisor's active-client count and the aggregator's snapshot age.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Health status of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    #[default]
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
}

impl ComponentHealth {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub components: Vec<ComponentHealth>,
    pub uptime_secs: u64,
}

impl SystemHealth {
    pub fn is_ready(&self) -> bool {
        matches!(self.status, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

/// Evaluates overall health from supervisor/aggregator facts rather than a
/// registry of arbitrary check closures (the teacher's version), since this
/// binary only ever has two components to check.
pub struct HealthChecker {
    start_time: Instant,
    /// A snapshot older than this is treated as the aggregator having
    /// stalled (spec §4.4 "tick cadence").
    stale_after: Duration,
}

impl HealthChecker {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            start_time: Instant::now(),
            stale_after,
        }
    }

    pub fn check(
        &self,
        active_clients: u32,
        target_clients: u32,
        last_snapshot_age: Option<Duration>,
    ) -> SystemHealth {
        let aggregator = match last_snapshot_age {
            None => ComponentHealth::degraded("aggregator", "no snapshot published yet"),
            Some(age) if age > self.stale_after => {
                ComponentHealth::unhealthy("aggregator", format!("snapshot stale ({age:?})"))
            }
            Some(_) => ComponentHealth::healthy("aggregator"),
        };

        let clients = if target_clients == 0 {
            ComponentHealth::healthy("clients")
        } else if active_clients == 0 {
            ComponentHealth::unhealthy("clients", "no active clients")
        } else if active_clients < target_clients {
            ComponentHealth::degraded("clients", format!("{active_clients}/{target_clients} active"))
        } else {
            ComponentHealth::healthy("clients")
        };

        let components = vec![aggregator, clients];
        let status = components
            .iter()
            .map(|c| c.status)
            .max_by_key(|s| match s {
                HealthStatus::Healthy => 0,
                HealthStatus::Unknown => 1,
                HealthStatus::Degraded => 2,
                HealthStatus::Unhealthy => 3,
            })
            .unwrap_or_default();

        SystemHealth {
            status,
            components,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn healthy_when_snapshot_fresh_and_clients_at_target() {
        let checker = HealthChecker::new(Duration::from_secs(5));
        let health = checker.check(3, 3, Some(Duration::from_millis(200)));
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.is_ready());
    }

    #[test]
    fn unhealthy_when_snapshot_stale() {
        let checker = HealthChecker::new(Duration::from_secs(5));
        let health = checker.check(3, 3, Some(Duration::from_secs(10)));
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert!(!health.is_ready());
    }

    #[test]
    fn degraded_while_ramping_up() {
        let checker = HealthChecker::new(Duration::from_secs(5));
        let health = checker.check(1, 3, Some(Duration::from_millis(200)));
        assert_eq!(health.status, HealthStatus::Degraded);
        assert!(health.is_ready());
    }

    #[test]
    fn zero_target_clients_never_unhealthy_on_client_count() {
        let checker = HealthChecker::new(Duration::from_secs(5));
        let health = checker.check(0, 0, Some(Duration::from_millis(50)));
        assert_eq!(health.status, HealthStatus::Healthy);
    }
}
