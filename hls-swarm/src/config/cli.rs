//! Command-line interface, mirroring the Configuration contract (spec §6).
//!
//! Precedence is CLI flag > environment variable > TOML file > built-in
//! default. clap resolves the first two layers itself (an `env = "..."`
//! attribute is only consulted when the flag is absent); every field here is
//! `Option` with no `default_value`, so that clap leaves it `None` when
//! neither a flag nor its environment variable was supplied. `into_config`
//! then falls through to the TOML file and finally the constant below.

use std::time::Duration;

use clap::Parser;

use super::{Config, ProbeFailurePolicy, Variant};
use crate::error::Result;

const DEFAULT_CLIENTS: u32 = 10;
const DEFAULT_RAMP_RATE: u32 = 5;
const DEFAULT_RAMP_JITTER_MS: u64 = 0;
const DEFAULT_DURATION_SECS: u64 = 0;
const DEFAULT_VARIANT: &str = "all";
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_RECONNECT: bool = true;
const DEFAULT_RECONNECT_DELAY_MAX_SECS: u64 = 5;
const DEFAULT_SEG_MAX_RETRY: u32 = 3;
const DEFAULT_TARGET_DURATION_SECS: u64 = 6;
const DEFAULT_RESTART_ON_STALL: bool = true;
const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9300";
const DEFAULT_STATS_BUFFER: usize = 1000;
const DEFAULT_STATS_DROP_THRESHOLD: f64 = 0.05;
const DEFAULT_ORIGIN_METRICS_NODE_PORT: u16 = 9100;
const DEFAULT_ORIGIN_METRICS_NGINX_PORT: u16 = 9113;
const DEFAULT_ORIGIN_METRICS_INTERVAL_SECS: u64 = 5;
const DEFAULT_ORIGIN_METRICS_WINDOW_SECS: u64 = 30;
const DEFAULT_PROM_CLIENT_METRICS: bool = false;
const DEFAULT_PROBE_FAILURE_POLICY: &str = "fallback";
const DEFAULT_SEGMENT_SIZE_WINDOW: usize = 300;
const DEFAULT_SEGMENT_SIZE_INTERVAL_SECS: u64 = 1;
const DEFAULT_SEGMENT_SIZE_JITTER_MS: u64 = 500;

#[derive(Debug, Parser)]
#[command(name = "hls-swarm", about = "HLS load-generation and observability swarm")]
pub struct Cli {
    /// The HLS stream URL. May instead come from the TOML file's
    /// `stream_url` key when omitted here.
    pub stream_url: Option<String>,

    /// Optional TOML config file; CLI flags and env vars take priority.
    #[arg(long, env = "HLS_SWARM_CONFIG_FILE")]
    pub config_file: Option<String>,

    #[arg(long, env = "HLS_SWARM_CLIENTS")]
    pub clients: Option<u32>,

    #[arg(long, env = "HLS_SWARM_RAMP_RATE")]
    pub ramp_rate: Option<u32>,

    #[arg(long, env = "HLS_SWARM_RAMP_JITTER_MS")]
    pub ramp_jitter_ms: Option<u64>,

    #[arg(long, env = "HLS_SWARM_DURATION_SECS")]
    pub duration_secs: Option<u64>,

    #[arg(long, env = "HLS_SWARM_VARIANT")]
    pub variant: Option<String>,

    #[arg(long, env = "HLS_SWARM_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    #[arg(long, env = "HLS_SWARM_RECONNECT")]
    pub reconnect: Option<bool>,

    #[arg(long, env = "HLS_SWARM_RECONNECT_DELAY_MAX_SECS")]
    pub reconnect_delay_max_secs: Option<u64>,

    #[arg(long, env = "HLS_SWARM_SEG_MAX_RETRY")]
    pub seg_max_retry: Option<u32>,

    #[arg(long, env = "HLS_SWARM_TARGET_DURATION_SECS")]
    pub target_duration_secs: Option<u64>,

    #[arg(long, env = "HLS_SWARM_RESTART_ON_STALL")]
    pub restart_on_stall: Option<bool>,

    #[arg(long, env = "HLS_SWARM_METRICS_ADDR")]
    pub metrics_addr: Option<String>,

    #[arg(long, env = "HLS_SWARM_STATS_BUFFER")]
    pub stats_buffer: Option<usize>,

    #[arg(long, env = "HLS_SWARM_STATS_DROP_THRESHOLD")]
    pub stats_drop_threshold: Option<f64>,

    #[arg(long, env = "HLS_SWARM_ORIGIN_METRICS_URL")]
    pub origin_metrics_url: Option<String>,

    #[arg(long, env = "HLS_SWARM_NGINX_METRICS_URL")]
    pub nginx_metrics_url: Option<String>,

    #[arg(long, env = "HLS_SWARM_ORIGIN_METRICS_HOST")]
    pub origin_metrics_host: Option<String>,

    #[arg(long, env = "HLS_SWARM_ORIGIN_METRICS_NODE_PORT")]
    pub origin_metrics_node_port: Option<u16>,

    #[arg(long, env = "HLS_SWARM_ORIGIN_METRICS_NGINX_PORT")]
    pub origin_metrics_nginx_port: Option<u16>,

    #[arg(long, env = "HLS_SWARM_ORIGIN_METRICS_INTERVAL_SECS")]
    pub origin_metrics_interval_secs: Option<u64>,

    #[arg(long, env = "HLS_SWARM_ORIGIN_METRICS_WINDOW_SECS")]
    pub origin_metrics_window_secs: Option<u64>,

    #[arg(long, env = "HLS_SWARM_PROM_CLIENT_METRICS")]
    pub prom_client_metrics: Option<bool>,

    #[arg(long, env = "HLS_SWARM_PROBE_FAILURE_POLICY")]
    pub probe_failure_policy: Option<String>,

    #[arg(long, env = "HLS_SWARM_SEGMENT_SIZE_URL")]
    pub segment_size_url: Option<String>,

    #[arg(long, env = "HLS_SWARM_SEGMENT_SIZE_WINDOW")]
    pub segment_size_window: Option<usize>,

    #[arg(long, env = "HLS_SWARM_SEGMENT_SIZE_INTERVAL_SECS")]
    pub segment_size_interval_secs: Option<u64>,

    #[arg(long, env = "HLS_SWARM_SEGMENT_SIZE_JITTER_MS")]
    pub segment_size_jitter_ms: Option<u64>,
}

impl Cli {
    /// Resolve CLI flags, environment variables, and an optional
    /// lower-priority TOML file into a validated `Config`.
    pub fn into_config(self) -> Result<Config> {
        let file = match &self.config_file {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| crate::error::Error::config(format!("reading {path}: {e}")))?;
                toml::from_str(&text)
                    .map_err(|e| crate::error::Error::config(format!("parsing {path}: {e}")))?
            }
            None => FileConfig::default(),
        };

        let config = Config {
            clients: self.clients.or(file.clients).unwrap_or(DEFAULT_CLIENTS),
            ramp_rate: self.ramp_rate.or(file.ramp_rate).unwrap_or(DEFAULT_RAMP_RATE),
            ramp_jitter: Duration::from_millis(
                self.ramp_jitter_ms.or(file.ramp_jitter_ms).unwrap_or(DEFAULT_RAMP_JITTER_MS),
            ),
            duration: Duration::from_secs(
                self.duration_secs.or(file.duration_secs).unwrap_or(DEFAULT_DURATION_SECS),
            ),
            stream_url: self.stream_url.or(file.stream_url).unwrap_or_default(),
            variant: self
                .variant
                .or(file.variant)
                .unwrap_or_else(|| DEFAULT_VARIANT.to_string())
                .parse::<Variant>()?,
            timeout: Duration::from_secs(
                self.timeout_secs.or(file.timeout_secs).unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
            reconnect: self.reconnect.or(file.reconnect).unwrap_or(DEFAULT_RECONNECT),
            reconnect_delay_max: Duration::from_secs(
                self.reconnect_delay_max_secs
                    .or(file.reconnect_delay_max_secs)
                    .unwrap_or(DEFAULT_RECONNECT_DELAY_MAX_SECS),
            ),
            seg_max_retry: self.seg_max_retry.or(file.seg_max_retry).unwrap_or(DEFAULT_SEG_MAX_RETRY),
            target_duration: Duration::from_secs(
                self.target_duration_secs
                    .or(file.target_duration_secs)
                    .unwrap_or(DEFAULT_TARGET_DURATION_SECS),
            ),
            restart_on_stall: self
                .restart_on_stall
                .or(file.restart_on_stall)
                .unwrap_or(DEFAULT_RESTART_ON_STALL),
            metrics_addr: self
                .metrics_addr
                .or(file.metrics_addr)
                .unwrap_or_else(|| DEFAULT_METRICS_ADDR.to_string()),
            stats_buffer: self.stats_buffer.or(file.stats_buffer).unwrap_or(DEFAULT_STATS_BUFFER),
            stats_drop_threshold: self
                .stats_drop_threshold
                .or(file.stats_drop_threshold)
                .unwrap_or(DEFAULT_STATS_DROP_THRESHOLD),
            origin_metrics_url: self.origin_metrics_url.or(file.origin_metrics_url),
            nginx_metrics_url: self.nginx_metrics_url.or(file.nginx_metrics_url),
            origin_metrics_host: self.origin_metrics_host.or(file.origin_metrics_host),
            origin_metrics_node_port: self
                .origin_metrics_node_port
                .or(file.origin_metrics_node_port)
                .unwrap_or(DEFAULT_ORIGIN_METRICS_NODE_PORT),
            origin_metrics_nginx_port: self
                .origin_metrics_nginx_port
                .or(file.origin_metrics_nginx_port)
                .unwrap_or(DEFAULT_ORIGIN_METRICS_NGINX_PORT),
            origin_metrics_interval: Duration::from_secs(
                self.origin_metrics_interval_secs
                    .or(file.origin_metrics_interval_secs)
                    .unwrap_or(DEFAULT_ORIGIN_METRICS_INTERVAL_SECS),
            ),
            origin_metrics_window: Duration::from_secs(
                self.origin_metrics_window_secs
                    .or(file.origin_metrics_window_secs)
                    .unwrap_or(DEFAULT_ORIGIN_METRICS_WINDOW_SECS),
            ),
            prom_client_metrics: self
                .prom_client_metrics
                .or(file.prom_client_metrics)
                .unwrap_or(DEFAULT_PROM_CLIENT_METRICS),
            probe_failure_policy: self
                .probe_failure_policy
                .or(file.probe_failure_policy)
                .unwrap_or_else(|| DEFAULT_PROBE_FAILURE_POLICY.to_string())
                .parse::<ProbeFailurePolicy>()?,
            segment_size_url: self.segment_size_url.or(file.segment_size_url),
            segment_size_window: self
                .segment_size_window
                .or(file.segment_size_window)
                .unwrap_or(DEFAULT_SEGMENT_SIZE_WINDOW),
            segment_size_interval: Duration::from_secs(
                self.segment_size_interval_secs
                    .or(file.segment_size_interval_secs)
                    .unwrap_or(DEFAULT_SEGMENT_SIZE_INTERVAL_SECS),
            ),
            segment_size_jitter: Duration::from_millis(
                self.segment_size_jitter_ms
                    .or(file.segment_size_jitter_ms)
                    .unwrap_or(DEFAULT_SEGMENT_SIZE_JITTER_MS),
            ),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Lower-priority overrides sourced from an optional TOML file. Every field
/// mirrors a `Cli` flag; `None` here falls through to that flag's built-in
/// default in `into_config`.
#[derive(Debug, Default, serde::Deserialize)]
struct FileConfig {
    stream_url: Option<String>,
    clients: Option<u32>,
    ramp_rate: Option<u32>,
    ramp_jitter_ms: Option<u64>,
    duration_secs: Option<u64>,
    variant: Option<String>,
    timeout_secs: Option<u64>,
    reconnect: Option<bool>,
    reconnect_delay_max_secs: Option<u64>,
    seg_max_retry: Option<u32>,
    target_duration_secs: Option<u64>,
    restart_on_stall: Option<bool>,
    metrics_addr: Option<String>,
    stats_buffer: Option<usize>,
    stats_drop_threshold: Option<f64>,
    origin_metrics_url: Option<String>,
    nginx_metrics_url: Option<String>,
    origin_metrics_host: Option<String>,
    origin_metrics_node_port: Option<u16>,
    origin_metrics_nginx_port: Option<u16>,
    origin_metrics_interval_secs: Option<u64>,
    origin_metrics_window_secs: Option<u64>,
    prom_client_metrics: Option<bool>,
    probe_failure_policy: Option<String>,
    segment_size_url: Option<String>,
    segment_size_window: Option<usize>,
    segment_size_interval_secs: Option<u64>,
    segment_size_jitter_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_with_stream_url(url: &str) -> Cli {
        Cli {
            stream_url: Some(url.to_string()),
            config_file: None,
            clients: None,
            ramp_rate: None,
            ramp_jitter_ms: None,
            duration_secs: None,
            variant: None,
            timeout_secs: None,
            reconnect: None,
            reconnect_delay_max_secs: None,
            seg_max_retry: None,
            target_duration_secs: None,
            restart_on_stall: None,
            metrics_addr: None,
            stats_buffer: None,
            stats_drop_threshold: None,
            origin_metrics_url: None,
            nginx_metrics_url: None,
            origin_metrics_host: None,
            origin_metrics_node_port: None,
            origin_metrics_nginx_port: None,
            origin_metrics_interval_secs: None,
            origin_metrics_window_secs: None,
            prom_client_metrics: None,
            probe_failure_policy: None,
            segment_size_url: None,
            segment_size_window: None,
            segment_size_interval_secs: None,
            segment_size_jitter_ms: None,
        }
    }

    #[test]
    fn bare_cli_resolves_to_built_in_defaults() {
        let config = cli_with_stream_url("http://origin/stream.m3u8").into_config().unwrap();
        assert_eq!(config.clients, DEFAULT_CLIENTS);
        assert_eq!(config.metrics_addr, DEFAULT_METRICS_ADDR);
        assert_eq!(config.variant, Variant::All);
    }

    #[test]
    fn toml_file_fills_in_fields_cli_left_unset() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("hls-swarm-test-{}.toml", std::process::id()));
        std::fs::write(&path, "clients = 42\nmetrics_addr = \"0.0.0.0:9999\"\n").unwrap();

        let mut cli = cli_with_stream_url("http://origin/stream.m3u8");
        cli.config_file = Some(path.to_string_lossy().into_owned());
        let config = cli.into_config().unwrap();

        assert_eq!(config.clients, 42);
        assert_eq!(config.metrics_addr, "0.0.0.0:9999");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn explicit_cli_flag_wins_over_toml_file() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("hls-swarm-test-override-{}.toml", std::process::id()));
        std::fs::write(&path, "clients = 42\n").unwrap();

        let mut cli = cli_with_stream_url("http://origin/stream.m3u8");
        cli.config_file = Some(path.to_string_lossy().into_owned());
        cli.clients = Some(7);
        let config = cli.into_config().unwrap();

        assert_eq!(config.clients, 7);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn toml_file_can_supply_stream_url() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("hls-swarm-test-url-{}.toml", std::process::id()));
        std::fs::write(&path, "stream_url = \"http://origin/from-file.m3u8\"\n").unwrap();

        let mut cli = Cli {
            config_file: Some(path.to_string_lossy().into_owned()),
            ..cli_with_stream_url("")
        };
        cli.stream_url = None;
        let config = cli.into_config().unwrap();

        assert_eq!(config.stream_url, "http://origin/from-file.m3u8");
        std::fs::remove_file(&path).ok();
    }
}
