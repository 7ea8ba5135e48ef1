//! Typed events emitted by the Debug Event Parser (spec §3, §4.1).

use std::time::Instant;

/// A typed record emitted while parsing one client's debug log stream.
///
/// Invariant: every `SegmentStart` is followed by at most one
/// `SegmentComplete` for the same URL; unmatched starts time out and are
/// counted as failed.
#[derive(Debug, Clone)]
pub enum Event {
    HttpRequest {
        method: String,
        url: String,
        timestamp: Instant,
    },
    SegmentStart {
        url: String,
        client_time: Instant,
    },
    SegmentComplete {
        url: String,
        client_time: Instant,
        wall_time: std::time::Duration,
        bytes: Option<u64>,
    },
    ManifestOpen {
        url: String,
    },
    ManifestComplete {
        url: String,
        wall_time: std::time::Duration,
    },
    TcpConnectStart {
        peer: String,
    },
    TcpConnected {
        peer: String,
    },
    SequenceChange {
        old: u64,
        new: u64,
    },
    BytesRead {
        n: u64,
    },
    HttpStatus {
        code: u16,
    },
    ExitObserved {
        code: ExitCode,
    },
}

/// Raw process exit status before classification.
#[derive(Debug, Clone, Copy)]
pub enum ExitCode {
    Code(i32),
    Signal(i32),
}

/// Exit categorization (spec §4.3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitCategory {
    Success,
    Error,
    Signal,
}

impl ExitCategory {
    pub fn classify(code: ExitCode) -> Self {
        match code {
            ExitCode::Code(0) => Self::Success,
            ExitCode::Code(1..=127) => Self::Error,
            ExitCode::Code(_) => Self::Error,
            ExitCode::Signal(_) => Self::Signal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Signal => "signal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ExitCode::Code(0), ExitCategory::Success)]
    #[case(ExitCode::Code(1), ExitCategory::Error)]
    #[case(ExitCode::Code(127), ExitCategory::Error)]
    #[case(ExitCode::Code(255), ExitCategory::Error)]
    #[case(ExitCode::Signal(9), ExitCategory::Signal)]
    #[case(ExitCode::Signal(15), ExitCategory::Signal)]
    fn classifies_exit_codes(#[case] code: ExitCode, #[case] expected: ExitCategory) {
        assert_eq!(ExitCategory::classify(code), expected);
    }
}
