//! Preflight checks (spec §4.7): fail fast before ramping up any clients.

use tracing::warn;

use crate::config::Config;
use crate::error::{Error, Result};

/// Verifies the child binary exists and is executable, and that the
/// process/file-descriptor budget can plausibly accommodate `clients`
/// concurrent ffmpeg-like children.
pub fn run(binary: &str, config: &Config) -> Result<()> {
    check_binary(binary)?;
    check_fd_limit(config.clients)?;
    Ok(())
}

fn check_binary(binary: &str) -> Result<()> {
    let path = std::path::Path::new(binary);
    if path.is_absolute() || path.components().count() > 1 {
        if !path.exists() {
            return Err(Error::preflight(format!("binary not found: {binary}")));
        }
        return Ok(());
    }

    let found = std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(binary).is_file()))
        .unwrap_or(false);
    if !found {
        return Err(Error::preflight(format!("binary not found on PATH: {binary}")));
    }
    Ok(())
}

/// Each client holds roughly 3 pipe fds (stdin/stdout/stderr) plus whatever
/// sockets the child itself opens; warn at a conservative threshold rather
/// than querying the kernel limit directly.
const FDS_PER_CLIENT_ESTIMATE: u32 = 8;
const CONSERVATIVE_FD_BUDGET: u32 = 1024;

fn check_fd_limit(clients: u32) -> Result<()> {
    let needed = clients.saturating_mul(FDS_PER_CLIENT_ESTIMATE);
    if needed > CONSERVATIVE_FD_BUDGET {
        warn!(
            "requested {clients} clients may exceed a conservative file descriptor budget \
             ({CONSERVATIVE_FD_BUDGET}); consider raising it with `ulimit -n`"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_absolute_binary() {
        let err = check_binary("/nonexistent/definitely/not/a/real/binary").unwrap_err();
        assert!(matches!(err, Error::Preflight(_)));
    }

    #[test]
    fn accepts_binary_present_on_path() {
        assert!(check_binary("sh").is_ok());
    }
}
