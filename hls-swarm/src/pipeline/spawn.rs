//! Spawning the external media-client child process (spec §6 "Child-process
//! interface").

use std::process::Stdio;
use std::time::Duration;

use process_utils::tokio_command;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStderr, ChildStdout};
use tracing::{debug, warn};

use crate::config::{Config, Variant};
use crate::error::{Error, Result};

/// Constructs the argument vector for the child media client.
///
/// Progress is routed to stdout as `key=value` records (`-progress
/// pipe:1`); debug logging stays on stderr, matching the separation the
/// parser relies on (spec §4.2 "Progress channel isolation").
pub fn build_args(config: &Config) -> Vec<String> {
    let mut args = vec![
        "-loglevel".to_string(),
        "debug".to_string(),
        "-progress".to_string(),
        "pipe:1".to_string(),
        "-user_agent".to_string(),
        "hls-swarm".to_string(),
        "-timeout".to_string(),
        config.timeout.as_micros().to_string(),
    ];

    if config.reconnect {
        args.extend([
            "-reconnect".to_string(),
            "1".to_string(),
            "-reconnect_delay_max".to_string(),
            config.reconnect_delay_max.as_secs().to_string(),
        ]);
    }

    args.extend(["-seg_max_retry".to_string(), config.seg_max_retry.to_string()]);

    match config.variant {
        Variant::All => {}
        Variant::Highest => args.extend(["-hls_variant".to_string(), "highest".to_string()]),
        Variant::Lowest => args.extend(["-hls_variant".to_string(), "lowest".to_string()]),
        Variant::First => args.extend(["-hls_variant".to_string(), "first".to_string()]),
    }

    args.extend(["-i".to_string(), config.stream_url.clone()]);
    args.extend(["-c".to_string(), "copy".to_string(), "-f".to_string(), "null".to_string(), "-".to_string()]);
    args
}

/// A spawned client's live process handle plus its two channels.
pub struct SpawnedClient {
    pub child: Child,
    pub progress: ChildStdout,
    pub stderr: ChildStderr,
}

/// Spawns the child media-client binary.
///
/// Resource acquisition is scoped: opening the process and its pipes is one
/// fallible step. On partial failure (e.g. a pipe that failed to attach)
/// the child is killed before the error propagates (spec §9 "Scoped
/// resource acquisition").
pub fn spawn(binary: &str, config: &Config) -> Result<SpawnedClient> {
    let args = build_args(config);
    let mut command = tokio_command(binary);
    command
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(Error::Spawn)?;

    let progress = match child.stdout.take() {
        Some(s) => s,
        None => {
            let _ = child.start_kill();
            return Err(Error::Other("child stdout pipe unavailable".into()));
        }
    };
    let stderr = match child.stderr.take() {
        Some(s) => s,
        None => {
            let _ = child.start_kill();
            return Err(Error::Other("child stderr pipe unavailable".into()));
        }
    };

    Ok(SpawnedClient {
        child,
        progress,
        stderr,
    })
}

/// Requests a graceful stop by writing `q` to the child's stdin, then kills
/// it if it has not exited within `grace_period` (spec §5 "Cancellation").
pub async fn stop_gracefully(child: &mut Child, grace_period: Duration) {
    if let Some(mut stdin) = child.stdin.take() {
        debug!("requesting graceful client stop");
        let _ = stdin.write_all(b"q").await;
        let _ = stdin.flush().await;
        let _ = stdin.shutdown().await;
    }

    tokio::select! {
        status = child.wait() => {
            debug!("client exited gracefully: {:?}", status);
        }
        _ = tokio::time::sleep(grace_period) => {
            warn!("client did not exit within grace period; killing");
            let _ = child.kill().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn base_config() -> Config {
        Config {
            clients: 1,
            ramp_rate: 1,
            ramp_jitter: StdDuration::ZERO,
            duration: StdDuration::ZERO,
            stream_url: "http://origin/stream.m3u8".into(),
            variant: Variant::All,
            timeout: StdDuration::from_secs(10),
            reconnect: true,
            reconnect_delay_max: StdDuration::from_secs(5),
            seg_max_retry: 3,
            target_duration: StdDuration::from_secs(6),
            restart_on_stall: true,
            metrics_addr: "0.0.0.0:9300".into(),
            stats_buffer: 1000,
            stats_drop_threshold: 0.05,
            origin_metrics_url: None,
            nginx_metrics_url: None,
            origin_metrics_host: None,
            origin_metrics_node_port: 9100,
            origin_metrics_nginx_port: 9113,
            origin_metrics_interval: StdDuration::from_secs(5),
            origin_metrics_window: StdDuration::from_secs(30),
            prom_client_metrics: false,
            probe_failure_policy: crate::config::ProbeFailurePolicy::Fallback,
            segment_size_url: None,
            segment_size_window: 300,
            segment_size_interval: StdDuration::from_secs(1),
            segment_size_jitter: StdDuration::from_millis(500),
        }
    }

    #[test]
    fn args_carry_debug_log_level_and_progress_pipe() {
        let args = build_args(&base_config());
        assert!(args.windows(2).any(|w| w == ["-loglevel", "debug"]));
        assert!(args.windows(2).any(|w| w == ["-progress", "pipe:1"]));
        assert!(args.contains(&"http://origin/stream.m3u8".to_string()));
    }

    #[test]
    fn reconnect_flags_present_when_enabled() {
        let args = build_args(&base_config());
        assert!(args.contains(&"-reconnect".to_string()));
    }
}
