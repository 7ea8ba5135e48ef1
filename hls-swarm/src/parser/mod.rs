//! Debug Event Parser (spec §4.1): converts a child process's debug log
//! lines into typed events and updates to Per-Client Stats.

mod patterns;

pub use patterns::prefilter_reject;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::domain::{Event, ExitCategory, ExitCode, PerClientStats};
use crate::segment_cache::SegmentSizeLookup;

/// Per-client parser state: owned exclusively by the client's pipeline
/// task (spec §3 "Ownership").
pub struct Parser {
    stats: PerClientStats,
    pending_segments: HashMap<String, Instant>,
    pending_manifests: HashMap<String, Instant>,
    segment_sizes: Option<Arc<dyn SegmentSizeLookup>>,
}

impl Parser {
    pub fn new(now: Instant, segment_sizes: Option<Arc<dyn SegmentSizeLookup>>) -> Self {
        Self {
            stats: PerClientStats::new(now),
            pending_segments: HashMap::new(),
            pending_manifests: HashMap::new(),
            segment_sizes,
        }
    }

    pub fn stats(&self) -> &PerClientStats {
        &self.stats
    }

    /// Feed one line from the named stream (`"progress"` or `"stderr"`).
    /// Returns any event recognized (tests observe these; production
    /// callers may ignore the return value, since the side effect on
    /// `stats()` is the real contract).
    pub fn feed_line(&mut self, line: &str, received_at: Instant, stream: &'static str) -> Option<Event> {
        if prefilter_reject(line) {
            return None;
        }

        *self.stats.lines_parsed.entry(stream).or_insert(0) += 1;
        let timestamp = self.resolve_timestamp(line, received_at);

        if let Some(caps) = patterns::HTTP_REQUEST.captures(line) {
            let method = caps["method"].to_string();
            let path = caps["path"].to_string();
            // Only media-segment requests feed the segment-completion
            // tracker; manifest/playlist fetches are already accounted for
            // by the Opening/Format-probed events below and must not be
            // double-counted as segments.
            if patterns::SEGMENT_URL.is_match(&path) {
                self.on_segment_request(&path, timestamp);
            }
            return Some(Event::HttpRequest {
                method,
                url: path,
                timestamp,
            });
        }

        if let Some(caps) = patterns::OPENING.captures(line) {
            let url = caps["url"].to_string();
            if is_manifest_url(&url) {
                self.pending_manifests.insert(url.clone(), timestamp);
                return Some(Event::ManifestOpen { url });
            }
            self.on_segment_request(&url, timestamp);
            return Some(Event::SegmentStart {
                url,
                client_time: timestamp,
            });
        }

        if let Some(caps) = patterns::TCP_CONNECT_START.captures(line) {
            return Some(Event::TcpConnectStart {
                peer: caps["peer"].to_string(),
            });
        }

        if let Some(caps) = patterns::TCP_CONNECTED.captures(line) {
            self.stats.tcp_connects += 1;
            return Some(Event::TcpConnected {
                peer: caps["peer"].to_string(),
            });
        }

        if patterns::MANIFEST_PROBED.is_match(line) || patterns::MANIFEST_REFRESH.is_match(line) {
            return self.retire_oldest_manifest(timestamp);
        }

        if let Some(caps) = patterns::SEQUENCE_CHANGE.captures(line) {
            let old: u64 = caps["old"].parse().unwrap_or(0);
            let new: u64 = caps["new"].parse().unwrap_or(0);
            self.stats.sequence_skips += 1;
            return Some(Event::SequenceChange { old, new });
        }

        if let Some(caps) = patterns::STATISTICS_BYTES.captures(line) {
            let n: u64 = caps["n"].parse().unwrap_or(0);
            self.stats.bytes_downloaded += n;
            return Some(Event::BytesRead { n });
        }

        if let Some(caps) = patterns::TOTAL_DEMUXED.captures(line) {
            let n: u64 = caps["bytes"].parse().unwrap_or(0);
            return Some(Event::BytesRead { n });
        }

        if let Some(caps) = patterns::HTTP_STATUS.captures(line) {
            let code: u16 = caps["code"].parse().unwrap_or(0);
            *self.stats.http_errors_by_status.entry(code).or_insert(0) += 1;
            return Some(Event::HttpStatus { code });
        }

        self.stats.parse_skipped += 1;
        None
    }

    /// Called when the child process exits.
    pub fn on_exit(&mut self, code: ExitCode) -> (Event, ExitCategory) {
        let category = ExitCategory::classify(code);
        (Event::ExitObserved { code }, category)
    }

    pub fn record_dropped_line(&mut self, stream: &'static str) {
        *self.stats.lines_dropped.entry(stream).or_insert(0) += 1;
    }

    fn resolve_timestamp(&mut self, line: &str, received_at: Instant) -> Instant {
        self.stats.timestamps_total += 1;
        if let Some(caps) = patterns::EMBEDDED_TIMESTAMP.captures(line) {
            if caps["ts"].parse::<f64>().is_ok() {
                self.stats.timestamps_embedded += 1;
            }
        }
        // Embedded timestamps are logical (child-relative); for interval
        // math we still use the monotonic receive clock, preferring the
        // embedded value only for quality accounting (spec §4.1 "Numeric
        // semantics").
        received_at
    }

    /// Segment completion is detected by the *next* HLS segment request
    /// retiring the previous pending segment for that URL (spec §4.1).
    fn on_segment_request(&mut self, url: &str, now: Instant) {
        self.stats.last_progress = now;
        if let Some(start) = self.pending_segments.remove(url) {
            self.complete_segment(url, start, now);
        }
        self.pending_segments.insert(url.to_string(), now);
    }

    fn complete_segment(&mut self, url: &str, start: Instant, now: Instant) {
        let wall_time = now.duration_since(start);
        self.stats.segments_downloaded += 1;
        self.stats.segment_latency.observe(wall_time);
        if let Some(sizes) = &self.segment_sizes {
            if let Some(bytes) = sizes.lookup(basename(url)) {
                self.stats.bytes_downloaded += bytes;
            }
        }
    }

    fn retire_oldest_manifest(&mut self, now: Instant) -> Option<Event> {
        let (url, start) = self
            .pending_manifests
            .iter()
            .min_by_key(|(_, t)| **t)
            .map(|(u, t)| (u.clone(), *t))?;
        self.pending_manifests.remove(&url);
        let wall_time = now.duration_since(start);
        self.stats.manifests_fetched += 1;
        self.stats.manifest_latency.observe(wall_time);
        Some(Event::ManifestComplete { url, wall_time })
    }

    /// Unmatched pending segments/manifests older than `timeout` are
    /// counted as failed (spec §3 invariant on `SegmentStart`).
    pub fn expire_pending(&mut self, now: Instant, timeout: Duration) {
        let expired: Vec<String> = self
            .pending_segments
            .iter()
            .filter(|(_, t)| now.duration_since(**t) > timeout)
            .map(|(u, _)| u.clone())
            .collect();
        for url in expired {
            self.pending_segments.remove(&url);
            self.stats.segment_failures += 1;
        }
    }
}

fn is_manifest_url(url: &str) -> bool {
    url.ends_with(".m3u8")
}

fn basename(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_completion_retires_previous_request() {
        let mut parser = Parser::new(Instant::now(), None);
        let t0 = Instant::now();
        parser.feed_line("request: GET /seg1.ts HTTP/1.1", t0, "stderr");
        assert_eq!(parser.stats().segments_downloaded, 0);

        let t1 = t0 + Duration::from_millis(50);
        parser.feed_line("request: GET /seg2.ts HTTP/1.1", t1, "stderr");
        assert_eq!(parser.stats().segments_downloaded, 1);
    }

    #[test]
    fn manifest_requests_are_not_counted_as_segments() {
        let mut parser = Parser::new(Instant::now(), None);
        let t0 = Instant::now();
        parser.feed_line("request: GET /playlist.m3u8 HTTP/1.1", t0, "stderr");
        parser.feed_line(
            "request: GET /playlist.m3u8 HTTP/1.1",
            t0 + Duration::from_millis(10),
            "stderr",
        );
        assert_eq!(parser.stats().segments_downloaded, 0);
    }

    #[test]
    fn latency_quantiles_scenario() {
        // spec §8 scenario 3: segment wall-times [10,20,...,100] ms.
        let mut parser = Parser::new(Instant::now(), None);
        let t0 = Instant::now();
        parser.feed_line("request: GET /seg0.ts HTTP/1.1", t0, "stderr");
        for (i, ms) in (10..=100).step_by(10).enumerate() {
            let t = t0 + Duration::from_millis(ms);
            parser.feed_line(&format!("request: GET /seg{}.ts HTTP/1.1", i + 1), t, "stderr");
        }
        let q = parser.stats().segment_latency.quantiles();
        assert!(q[1] >= 0.040 && q[1] <= 0.060, "p50 = {}", q[1]);
        assert!(q[4] >= 0.090 && q[4] <= 0.100, "p99 = {}", q[4]);
        assert!((q[5] - 0.100).abs() < 1e-6, "max = {}", q[5]);
    }

    #[test]
    fn manifest_probed_and_refresh_both_complete() {
        let mut parser = Parser::new(Instant::now(), None);
        let t0 = Instant::now();
        parser.feed_line("Opening 'stream.m3u8' for reading", t0, "stderr");
        parser.feed_line("Format hls probed", t0 + Duration::from_millis(5), "stderr");
        assert_eq!(parser.stats().manifests_fetched, 1);

        parser.feed_line("Opening 'stream.m3u8' for reading", t0 + Duration::from_millis(10), "stderr");
        parser.feed_line(
            "Skip ('#EXT-X-VERSION:7')",
            t0 + Duration::from_millis(15),
            "stderr",
        );
        assert_eq!(parser.stats().manifests_fetched, 2);
    }

    #[test]
    fn sequence_change_increments_skip_counter() {
        let mut parser = Parser::new(Instant::now(), None);
        parser.feed_line("Media sequence change (10 -> 12)", Instant::now(), "stderr");
        assert_eq!(parser.stats().sequence_skips, 1);
    }

    #[test]
    fn http_error_counted() {
        let mut parser = Parser::new(Instant::now(), None);
        parser.feed_line("HTTP error 503 from origin", Instant::now(), "stderr");
        assert_eq!(parser.stats().http_errors_by_status.get(&503), Some(&1));
    }

    #[test]
    fn unrecognized_line_is_skipped_not_fatal() {
        let mut parser = Parser::new(Instant::now(), None);
        parser.feed_line("some unrelated debug chatter about HTTP caches", Instant::now(), "stderr");
        assert_eq!(parser.stats().parse_skipped, 1);
    }

    #[test]
    fn boring_line_never_reaches_counters() {
        let mut parser = Parser::new(Instant::now(), None);
        parser.feed_line("nothing of note here", Instant::now(), "stderr");
        assert!(parser.stats().lines_parsed.is_empty());
        assert_eq!(parser.stats().parse_skipped, 0);
    }

    #[test]
    fn size_lookup_attributes_bytes() {
        struct Fixed;
        impl SegmentSizeLookup for Fixed {
            fn lookup(&self, filename: &str) -> Option<u64> {
                (filename == "seg00101.ts").then_some(51200)
            }
        }
        let mut parser = Parser::new(Instant::now(), Some(Arc::new(Fixed)));
        let t0 = Instant::now();
        parser.feed_line("request: GET /path/seg00101.ts HTTP/1.1", t0, "stderr");
        parser.feed_line(
            "request: GET /path/seg00102.ts HTTP/1.1",
            t0 + Duration::from_millis(20),
            "stderr",
        );
        assert_eq!(parser.stats().bytes_downloaded, 51200);
    }
}
