//! Logging setup.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the global `tracing` subscriber.
///
/// Filter defaults to `hls_swarm=info` and is overridable via `RUST_LOG` or
/// `HLS_SWARM_LOG`. Unlike a long-running service with a persisted filter,
/// the swarm has no config store to push reloads through, so this is a
/// one-shot init performed once at startup.
pub fn init_logging() {
    let filter = std::env::var("HLS_SWARM_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "hls_swarm=info".to_string());

    let env_filter = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();
}
