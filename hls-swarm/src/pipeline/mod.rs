//! Client Pipeline (spec §4.2): binds one child process to its parser via
//! bounded channels, handling progress/stderr separately with per-stream
//! drop accounting.

mod reader;
mod spawn;

pub use spawn::{build_args, spawn as spawn_child, stop_gracefully};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::{ExitCategory, ExitCode, PerClientStats, SharedStats};
use crate::error::Result;
use crate::parser::Parser;
use crate::segment_cache::SegmentSizeLookup;

/// Outcome of one run of a client pipeline, published to the supervisor.
pub struct PipelineOutcome {
    pub exit_category: ExitCategory,
    pub final_stats: PerClientStats,
}

/// Runs a single client end-to-end: spawn, read both channels under
/// backpressure, parse, and report a final outcome on exit.
///
/// Every parsed line advances `parser.stats().last_progress`, published to
/// `shared_stats` so the supervisor can read a client's last-progress clock
/// from the same shared slot the aggregator reads, without taking ownership
/// of parser state (spec §4.3 "Stall detection").
pub async fn run_client(
    id: u64,
    binary: &str,
    config: &crate::config::Config,
    segment_sizes: Option<Arc<dyn SegmentSizeLookup>>,
    cancel: CancellationToken,
    shared_stats: Option<SharedStats>,
) -> Result<PipelineOutcome> {
    let buffer = config.stats_buffer;
    let spawned = spawn::spawn(binary, config)?;
    let mut child = spawned.child;

    let (progress_tx, mut progress_rx) = mpsc::channel::<String>(buffer);
    let (stderr_tx, mut stderr_rx) = mpsc::channel::<String>(buffer);

    let mut parser = Parser::new(Instant::now(), segment_sizes);

    let progress_dropped = Arc::new(AtomicU64::new(0));
    let stderr_dropped = Arc::new(AtomicU64::new(0));

    let progress_cancel = cancel.clone();
    let progress_reader = spawned.progress;
    let progress_task = tokio::spawn(reader_task(
        progress_reader,
        progress_tx,
        progress_cancel,
        progress_dropped.clone(),
    ));

    let stderr_cancel = cancel.clone();
    let stderr_reader = spawned.stderr;
    let stderr_task = tokio::spawn(reader_task(
        stderr_reader,
        stderr_tx,
        stderr_cancel,
        stderr_dropped.clone(),
    ));

    let exit_code = loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                stop_gracefully(&mut child, Duration::from_secs(5)).await;
                break ExitCode::Signal(15);
            }

            line = progress_rx.recv() => {
                match line {
                    Some(line) => {
                        parser.feed_line(&line, Instant::now(), "progress");
                        publish_stats(&shared_stats, &parser);
                    }
                    None => {}
                }
            }

            line = stderr_rx.recv() => {
                if let Some(line) = line {
                    parser.feed_line(&line, Instant::now(), "stderr");
                    publish_stats(&shared_stats, &parser);
                }
            }

            status = child.wait() => {
                let code = match status {
                    Ok(status) => exit_code_from_status(status),
                    Err(e) => {
                        warn!("error waiting for client {id}: {e}");
                        ExitCode::Code(-1)
                    }
                };
                break code;
            }
        }
    };

    // Drain both queues with a short deadline before reporting final stats
    // (spec §4.2 "Exit").
    drain_with_deadline(&mut progress_rx, &mut parser, Duration::from_millis(200), "progress").await;
    drain_with_deadline(&mut stderr_rx, &mut parser, Duration::from_millis(200), "stderr").await;

    progress_task.abort();
    stderr_task.abort();

    let (_, category) = parser.on_exit(exit_code);
    debug!("client {id} exited: {category:?}");

    for _ in 0..progress_dropped.load(Ordering::Relaxed) {
        parser.record_dropped_line("progress");
    }
    for _ in 0..stderr_dropped.load(Ordering::Relaxed) {
        parser.record_dropped_line("stderr");
    }
    publish_stats(&shared_stats, &parser);

    Ok(PipelineOutcome {
        exit_category: category,
        final_stats: parser.stats().clone(),
    })
}

/// Publishes a copy of the parser's current stats to the shared slot the
/// aggregator reads from. The lock is held only for the duration of the
/// clone, never across an `.await` (spec §5 "Shared resources").
fn publish_stats(shared: &Option<SharedStats>, parser: &Parser) {
    if let Some(shared) = shared {
        *shared.lock() = parser.stats().clone();
    }
}

async fn drain_with_deadline(
    rx: &mut mpsc::Receiver<String>,
    parser: &mut Parser,
    deadline: Duration,
    stream: &'static str,
) {
    let deadline = tokio::time::Instant::now() + deadline;
    loop {
        tokio::select! {
            line = rx.recv() => {
                match line {
                    Some(line) => { parser.feed_line(&line, Instant::now(), stream); }
                    None => break,
                }
            }
            _ = tokio::time::sleep_until(deadline) => break,
        }
    }
}

async fn reader_task<R>(
    reader: R,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
    dropped: Arc<AtomicU64>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line_reader = reader::LineReader::new(reader);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            result = line_reader.next_line() => {
                match result {
                    Ok(Some(line)) => {
                        // Reading never blocks on process I/O: a full queue
                        // drops the line rather than awaiting capacity
                        // (spec §4.1 "Backpressure and drops").
                        if tx.try_send(line).is_err() {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Ok(None) => return,
                    Err(_) => return,
                }
            }
        }
    }
}

fn exit_code_from_status(status: std::process::ExitStatus) -> ExitCode {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitCode::Signal(signal);
        }
    }
    ExitCode::Code(status.code().unwrap_or(-1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_from_normal_status() {
        let status = std::process::Command::new("true")
            .status()
            .expect("spawning `true` should always succeed on the test host");
        assert!(matches!(exit_code_from_status(status), ExitCode::Code(0)));
    }

    #[cfg(unix)]
    #[test]
    fn exit_code_from_signaled_status() {
        use std::os::unix::process::ExitStatusExt;
        let status = std::process::ExitStatus::from_raw(9);
        assert!(matches!(exit_code_from_status(status), ExitCode::Signal(9)));
    }
}
