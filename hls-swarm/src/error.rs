//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
///
/// Only failures that are fatal before or across client lifetimes are
/// represented here. In-loop recoverable conditions (parse errors, scrape
/// failures, dropped lines) are counters, never `Error` values.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("preflight check failed: {0}")]
    Preflight(String),

    #[error("failed to spawn client process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("origin scrape failed: {0}")]
    Scrape(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn preflight(msg: impl Into<String>) -> Self {
        Self::Preflight(msg.into())
    }

    pub fn scrape(msg: impl Into<String>) -> Self {
        Self::Scrape(msg.into())
    }
}
