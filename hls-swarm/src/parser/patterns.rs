//! Anchored regular expressions recognized by the Debug Event Parser
//! (spec §4.1).

use regex::Regex;
use std::sync::LazyLock;

/// Keywords used by the fast prefilter to reject uninteresting lines before
/// any regex runs.
pub const PREFILTER_KEYWORDS: &[&str] = &[
    "HLS",
    "HTTP",
    "TCP",
    "Opening",
    "Skip",
    "Format",
    "Statistics",
    "Media sequence",
];

/// Returns `true` if the line contains none of the prefilter keywords and
/// can be skipped without attempting pattern matching.
pub fn prefilter_reject(line: &str) -> bool {
    !PREFILTER_KEYWORDS.iter().any(|kw| line.contains(kw))
}

pub static HTTP_REQUEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^request:\s*(?P<method>[A-Z]+)\s+(?P<path>\S+)\s+HTTP/").unwrap());

pub static OPENING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Opening '(?P<url>[^']+)' for reading").unwrap());

pub static TCP_CONNECT_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Starting connection attempt to (?P<peer>\S+)").unwrap());

pub static TCP_CONNECTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Successfully connected to (?P<peer>\S+)").unwrap());

pub static MANIFEST_PROBED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Format hls probed").unwrap());

pub static MANIFEST_REFRESH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Skip \('#EXT-X-VERSION:").unwrap());

pub static SEQUENCE_CHANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Media sequence change \((?P<old>\d+)\s*->\s*(?P<new>\d+)\)").unwrap()
});

pub static STATISTICS_BYTES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Statistics:\s*(?P<n>\d+)\s*bytes read").unwrap());

pub static TOTAL_DEMUXED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Total:\s*\d+\s*packets\s*\((?P<bytes>\d+)\s*bytes\)\s*(demuxed|muxed)").unwrap());

pub static HTTP_STATUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"HTTP error (?P<code>\d{3})").unwrap());

/// An HLS segment URL, recognized by its media-segment-like extension.
pub static SEGMENT_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?P<url>\S+\.(?:ts|m4s|aac))(?:[?\s]|$)").unwrap());

/// Embedded timestamp at the start of a log line, e.g. `[1699999999.123456]`.
pub static EMBEDDED_TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[(?P<ts>\d+(?:\.\d+)?)\]").unwrap());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefilter_rejects_boring_lines() {
        assert!(prefilter_reject("just some noise"));
        assert!(!prefilter_reject("request: GET /seg1.ts HTTP/1.1"));
    }

    #[test]
    fn matches_sequence_change() {
        let caps = SEQUENCE_CHANGE.captures("Media sequence change (10 -> 11)").unwrap();
        assert_eq!(&caps["old"], "10");
        assert_eq!(&caps["new"], "11");
    }

    #[test]
    fn matches_http_status() {
        let caps = HTTP_STATUS.captures("HTTP error 503 Service Unavailable").unwrap();
        assert_eq!(&caps["code"], "503");
    }
}
