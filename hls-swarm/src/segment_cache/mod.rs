//! Segment-Size Scraper (spec §4.5): a read-heavy lookup table of content
//! sizes by filename, refreshed from an external JSON endpoint.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use serde::Deserialize;
use tokio::sync::Notify;
use tokio::time::Instant as TokioInstant;
use tracing::warn;

const MAX_RESPONSE_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct SegmentEntry {
    name: String,
    size: u64,
}

/// Read-only view the parser uses to attribute bytes to a segment filename.
/// Decouples the parser from the scraper's refresh machinery.
pub trait SegmentSizeLookup: Send + Sync {
    fn lookup(&self, filename: &str) -> Option<u64>;
}

/// Concurrent `{filename -> size}` map with a bounded rolling window over
/// numerically-suffixed segment filenames. Entries without a parseable
/// numeric suffix (manifests) are retained indefinitely.
pub struct SegmentSizeCache {
    sizes: DashMap<String, u64>,
    window: usize,
    first_scrape: Notify,
    has_scraped: std::sync::atomic::AtomicBool,
    scrape_errors: std::sync::atomic::AtomicU64,
}

impl SegmentSizeCache {
    pub fn new(window: usize) -> Arc<Self> {
        Arc::new(Self {
            sizes: DashMap::new(),
            window,
            first_scrape: Notify::new(),
            has_scraped: std::sync::atomic::AtomicBool::new(false),
            scrape_errors: std::sync::atomic::AtomicU64::new(0),
        })
    }

    /// Replace entries from a freshly fetched listing and evict entries
    /// whose numeric suffix falls outside `[highest-window+1, highest]`.
    fn apply(&self, entries: Vec<SegmentEntry>) {
        let mut highest: Option<u64> = None;
        for entry in &entries {
            self.sizes.insert(entry.name.clone(), entry.size);
            if let Some(n) = numeric_suffix(&entry.name) {
                highest = Some(highest.map_or(n, |h: u64| h.max(n)));
            }
        }

        if let Some(highest) = highest {
            let floor = highest.saturating_sub(self.window as u64 - 1);
            self.sizes.retain(|name, _| match numeric_suffix(name) {
                Some(n) => n >= floor && n <= highest,
                None => true,
            });
        }

        if !self.has_scraped.swap(true, std::sync::atomic::Ordering::SeqCst) {
            self.first_scrape.notify_waiters();
        }
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    pub fn scrape_errors(&self) -> u64 {
        self.scrape_errors.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Blocks the caller until at least one successful scrape has occurred,
    /// so clients do not start before sizes are known.
    pub async fn wait_for_first_scrape(&self, timeout: Duration) -> bool {
        if self.has_scraped.load(std::sync::atomic::Ordering::SeqCst) {
            return true;
        }
        let notified = self.first_scrape.notified();
        tokio::select! {
            _ = notified => true,
            _ = tokio::time::sleep(timeout) => {
                self.has_scraped.load(std::sync::atomic::Ordering::SeqCst)
            }
        }
    }
}

impl SegmentSizeLookup for SegmentSizeCache {
    fn lookup(&self, filename: &str) -> Option<u64> {
        self.sizes.get(filename).map(|v| *v)
    }
}

/// Extracts the trailing run of digits from a filename stem, e.g.
/// `seg00123.ts` -> `123`. Filenames without one (playlists) return `None`.
fn numeric_suffix(name: &str) -> Option<u64> {
    let stem = name.rsplit_once('.').map(|(s, _)| s).unwrap_or(name);
    let digits: String = stem.chars().rev().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.chars().rev().collect::<String>().parse().ok()
}

/// Periodically fetches the segment listing on an interval with uniform
/// jitter, using a single reusable timer (spec §4.5 "Scheduling").
pub async fn run_scraper(
    cache: Arc<SegmentSizeCache>,
    client: reqwest::Client,
    url: String,
    interval: Duration,
    jitter: Duration,
    cancel: tokio_util::sync::CancellationToken,
) {
    loop {
        let sleep_for = jittered(interval, jitter);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep_until(TokioInstant::now() + sleep_for) => {}
        }

        match fetch_once(&client, &url).await {
            Ok(entries) => cache.apply(entries),
            Err(e) => {
                cache.scrape_errors.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                warn!("segment size scrape failed: {e}");
            }
        }
    }
}

fn jittered(interval: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return interval;
    }
    let jitter_ms = jitter.as_millis() as i64;
    let delta = rand::rng().random_range(-jitter_ms..=jitter_ms);
    let total_ms = (interval.as_millis() as i64 + delta).max(0);
    Duration::from_millis(total_ms as u64)
}

/// Reads the response body one chunk at a time, rejecting as soon as the
/// running total exceeds the cap rather than buffering the full body first
/// (spec §4.5 "Safety" — bound memory against an oversized or malicious
/// response).
async fn fetch_once(client: &reqwest::Client, url: &str) -> Result<Vec<SegmentEntry>, String> {
    let mut response = client.get(url).send().await.map_err(|e| e.to_string())?;
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(|e| e.to_string())? {
        if body.len() + chunk.len() > MAX_RESPONSE_BYTES {
            return Err(format!("response exceeded {MAX_RESPONSE_BYTES} bytes"));
        }
        body.extend_from_slice(&chunk);
    }
    serde_json::from_slice(&body).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_suffix_extraction() {
        assert_eq!(numeric_suffix("seg00123.ts"), Some(123));
        assert_eq!(numeric_suffix("stream.m3u8"), None);
    }

    #[test]
    fn eviction_keeps_window_and_manifests() {
        let cache = SegmentSizeCache::new(300);
        let mut entries: Vec<SegmentEntry> = (1..=400)
            .map(|i| SegmentEntry {
                name: format!("seg{i:05}.ts"),
                size: 1000,
            })
            .collect();
        entries.push(SegmentEntry {
            name: "stream.m3u8".into(),
            size: 420,
        });
        cache.apply(entries);

        assert!(cache.lookup("seg00101.ts").is_none(), "evicted: outside window");
        assert!(cache.lookup("seg00400.ts").is_some());
        assert_eq!(cache.lookup("stream.m3u8"), Some(420));
        assert!(cache.len() <= 301);
    }

    #[test]
    fn size_lookup_attribution() {
        let cache = SegmentSizeCache::new(300);
        cache.apply(vec![
            SegmentEntry {
                name: "seg00101.ts".into(),
                size: 51200,
            },
            SegmentEntry {
                name: "stream.m3u8".into(),
                size: 420,
            },
        ]);
        let lookup: &dyn SegmentSizeLookup = &*cache;
        assert_eq!(lookup.lookup("seg00101.ts"), Some(51200));
    }

    #[tokio::test]
    async fn wait_for_first_scrape_returns_once_scraped() {
        let cache = SegmentSizeCache::new(10);
        cache.apply(vec![SegmentEntry {
            name: "a.ts".into(),
            size: 1,
        }]);
        assert!(cache.wait_for_first_scrape(Duration::from_millis(10)).await);
    }
}
