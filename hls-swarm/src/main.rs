use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use hls_swarm::config::Cli;
use hls_swarm::logging::init_logging;
use hls_swarm::orchestrator::Orchestrator;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let cli = Cli::parse();
    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e}");
            return ExitCode::from(1);
        }
    };

    info!(
        "starting hls-swarm v{}: {} clients against {}",
        env!("CARGO_PKG_VERSION"),
        config.clients,
        config.stream_url
    );

    let cancel = CancellationToken::new();
    let run_cancel = cancel.clone();
    let orchestrator = Orchestrator::new("ffmpeg", config);

    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received SIGINT, initiating shutdown");
            }
            _ = wait_for_sigterm() => {
                info!("received SIGTERM, initiating shutdown");
            }
        }
        cancel.cancel();
    });

    match orchestrator.run(run_cancel).await {
        Ok(summary) => {
            print_exit_summary(&summary);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("fatal error: {e}");
            ExitCode::from(1)
        }
    }
}

fn print_exit_summary(summary: &hls_swarm::orchestrator::ExitSummary) {
    info!(
        "shutdown complete: {}/{} clients stopped gracefully, {} forced, peak active {}, restarts {}",
        summary.shutdown.graceful_stops,
        summary.shutdown.total_clients,
        summary.shutdown.forced_terminations,
        summary.peak_active,
        summary.restarts_total,
    );
    for (category, count) in &summary.exits_total {
        info!("exit category {}: {count}", category.as_str());
    }
    if summary.shutdown.forced_terminations > 0 {
        warn!(
            "{} clients required forced termination",
            summary.shutdown.forced_terminations
        );
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    sigterm.recv().await;
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
