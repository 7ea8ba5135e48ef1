//! Configuration contract (spec §6) and validation.

mod cli;

pub use cli::Cli;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Variant-selection policy for the child media client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    #[default]
    All,
    Highest,
    Lowest,
    First,
}

impl std::str::FromStr for Variant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "highest" => Ok(Self::Highest),
            "lowest" => Ok(Self::Lowest),
            "first" => Ok(Self::First),
            other => Err(Error::config(format!("invalid variant: {other}"))),
        }
    }
}

/// Policy applied when upfront variant discovery fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProbeFailurePolicy {
    #[default]
    Fallback,
    Fail,
}

impl std::str::FromStr for ProbeFailurePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fallback" => Ok(Self::Fallback),
            "fail" => Ok(Self::Fail),
            other => Err(Error::config(format!("invalid probe_failure_policy: {other}"))),
        }
    }
}

/// Fully resolved, validated configuration for one orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub clients: u32,
    pub ramp_rate: u32,
    pub ramp_jitter: Duration,
    pub duration: Duration,
    pub stream_url: String,
    pub variant: Variant,
    pub timeout: Duration,
    pub reconnect: bool,
    pub reconnect_delay_max: Duration,
    pub seg_max_retry: u32,
    pub target_duration: Duration,
    pub restart_on_stall: bool,
    pub metrics_addr: String,
    pub stats_buffer: usize,
    pub stats_drop_threshold: f64,
    pub origin_metrics_url: Option<String>,
    pub nginx_metrics_url: Option<String>,
    pub origin_metrics_host: Option<String>,
    pub origin_metrics_node_port: u16,
    pub origin_metrics_nginx_port: u16,
    pub origin_metrics_interval: Duration,
    pub origin_metrics_window: Duration,
    pub prom_client_metrics: bool,
    pub probe_failure_policy: ProbeFailurePolicy,
    pub segment_size_url: Option<String>,
    pub segment_size_window: usize,
    pub segment_size_interval: Duration,
    pub segment_size_jitter: Duration,
}

impl Config {
    /// Validate the configuration contract (spec §7 "Config validation failure").
    pub fn validate(&self) -> Result<()> {
        if self.clients < 1 {
            return Err(Error::config("clients must be >= 1"));
        }
        if self.ramp_rate < 1 {
            return Err(Error::config("ramp_rate must be >= 1"));
        }
        if self.stream_url.trim().is_empty() {
            return Err(Error::config("stream_url must not be empty"));
        }
        if self.metrics_addr.trim().is_empty() {
            return Err(Error::config("metrics_addr must not be empty"));
        }
        if self.stats_buffer == 0 {
            return Err(Error::config("stats_buffer must be >= 1"));
        }
        let window_secs = self.origin_metrics_window.as_secs();
        if !(10..=300).contains(&window_secs) {
            return Err(Error::config(
                "origin_metrics_window must be within [10, 300] seconds",
            ));
        }
        Ok(())
    }

    /// Node-exporter and nginx-exporter URLs, resolving the `host` shorthand
    /// (spec §6 "Scraped endpoints") when explicit URLs are absent.
    pub fn resolved_origin_urls(&self) -> (Option<String>, Option<String>) {
        if self.origin_metrics_url.is_some() || self.nginx_metrics_url.is_some() {
            return (self.origin_metrics_url.clone(), self.nginx_metrics_url.clone());
        }
        match &self.origin_metrics_host {
            Some(host) => (
                Some(format!("http://{host}:{}/metrics", self.origin_metrics_node_port)),
                Some(format!("http://{host}:{}/metrics", self.origin_metrics_nginx_port)),
            ),
            None => (None, None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::str::FromStr;

    #[rstest]
    #[case("all", Variant::All)]
    #[case("ALL", Variant::All)]
    #[case("highest", Variant::Highest)]
    #[case("lowest", Variant::Lowest)]
    #[case("first", Variant::First)]
    fn parses_valid_variant(#[case] input: &str, #[case] expected: Variant) {
        assert_eq!(Variant::from_str(input).unwrap(), expected);
    }

    #[test]
    fn rejects_unknown_variant() {
        assert!(Variant::from_str("bogus").is_err());
    }

    fn valid_config() -> Config {
        Config {
            clients: 10,
            ramp_rate: 5,
            ramp_jitter: Duration::ZERO,
            duration: Duration::ZERO,
            stream_url: "http://origin/stream.m3u8".into(),
            variant: Variant::All,
            timeout: Duration::from_secs(10),
            reconnect: true,
            reconnect_delay_max: Duration::from_secs(5),
            seg_max_retry: 3,
            target_duration: Duration::from_secs(6),
            restart_on_stall: true,
            metrics_addr: "0.0.0.0:9300".into(),
            stats_buffer: 1000,
            stats_drop_threshold: 0.05,
            origin_metrics_url: None,
            nginx_metrics_url: None,
            origin_metrics_host: None,
            origin_metrics_node_port: 9100,
            origin_metrics_nginx_port: 9113,
            origin_metrics_interval: Duration::from_secs(5),
            origin_metrics_window: Duration::from_secs(30),
            prom_client_metrics: false,
            probe_failure_policy: ProbeFailurePolicy::Fallback,
            segment_size_url: None,
            segment_size_window: 300,
            segment_size_interval: Duration::from_secs(1),
            segment_size_jitter: Duration::from_millis(500),
        }
    }

    #[test]
    fn rejects_zero_clients() {
        let mut c = valid_config();
        c.clients = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn rejects_window_out_of_range() {
        let mut c = valid_config();
        c.origin_metrics_window = Duration::from_secs(5);
        assert!(c.validate().is_err());
    }

    #[test]
    fn resolves_host_shorthand() {
        let mut c = valid_config();
        c.origin_metrics_host = Some("origin".into());
        let (node, nginx) = c.resolved_origin_urls();
        assert_eq!(node.as_deref(), Some("http://origin:9100/metrics"));
        assert_eq!(nginx.as_deref(), Some("http://origin:9113/metrics"));
    }

    #[test]
    fn explicit_urls_win_over_host_shorthand() {
        let mut c = valid_config();
        c.origin_metrics_host = Some("origin".into());
        c.origin_metrics_url = Some("http://custom/metrics".into());
        let (node, _nginx) = c.resolved_origin_urls();
        assert_eq!(node.as_deref(), Some("http://custom/metrics"));
    }
}
