//! Origin Metrics Scraper (spec §4.6): polls node-exporter-like and
//! nginx-exporter-like Prometheus endpoints on a fixed interval and
//! maintains a rolling-window rate sketch.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::time::{Duration, Instant};

use prometheus_parse::Scrape;
use tdigest::TDigest;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// One fully-resolved reading of the scraped endpoints.
#[derive(Debug, Clone, Default)]
pub struct OriginMetrics {
    pub cpu_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub network_rx_bytes_per_sec: f64,
    pub network_tx_bytes_per_sec: f64,
    pub nginx_active_connections: Option<f64>,
    pub nginx_request_rate: Option<f64>,
    pub nginx_avg_duration_seconds: Option<f64>,
}

/// Published atomically; readers clone the latest value (spec §5).
#[derive(Debug, Clone)]
pub struct OriginSnapshot {
    pub generated_at: Instant,
    pub metrics: OriginMetrics,
    /// False if either endpoint failed on the most recent cycle (spec §4.6
    /// "Failure semantics").
    pub healthy: bool,
    pub error: Option<String>,
    pub rate_p50: f64,
    pub rate_max: f64,
}

struct RollingWindow {
    window: Duration,
    samples: VecDeque<(Instant, f64)>,
    digest: TDigest,
}

impl RollingWindow {
    fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
            digest: TDigest::new_with_size(100),
        }
    }

    fn push(&mut self, now: Instant, value: f64) {
        self.samples.push_back((now, value));
        let cutoff = now - self.window;
        while let Some(&(t, _)) = self.samples.front() {
            if t < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        // Rebuilt from only the still-windowed samples on every push, since
        // `TDigest` has no eviction of its own: merging into the previous
        // digest would keep contributing values that just fell out of the
        // window (spec §4.6 "evict samples older than now - window").
        self.digest = TDigest::new_with_size(100)
            .merge_unsorted(self.samples.iter().map(|(_, v)| *v).collect::<Vec<_>>());
    }

    fn p50(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.digest.estimate_quantile(0.5)
    }

    fn max(&self) -> f64 {
        self.samples.iter().map(|(_, v)| *v).fold(0.0, f64::max)
    }
}

/// Counters recorded from the previous cycle, used to compute rates.
#[derive(Default, Clone, Copy)]
struct PriorCounters {
    cpu_idle: f64,
    cpu_total: f64,
    network_rx: f64,
    network_tx: f64,
    nginx_requests: f64,
    at: Option<Instant>,
}

/// Published atomic pointer, mirroring the aggregate snapshot publisher
/// (spec §5 "Origin metrics snapshot").
pub struct OriginPublisher {
    current: AtomicPtr<OriginSnapshot>,
}

impl OriginPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            current: AtomicPtr::new(std::ptr::null_mut()),
        })
    }

    fn publish(&self, snapshot: OriginSnapshot) {
        let boxed = Box::into_raw(Box::new(snapshot));
        let old = self.current.swap(boxed, Ordering::AcqRel);
        if !old.is_null() {
            unsafe {
                drop(Box::from_raw(old));
            }
        }
    }

    pub fn latest(&self) -> Option<OriginSnapshot> {
        let ptr = self.current.load(Ordering::Acquire);
        if ptr.is_null() {
            return None;
        }
        Some(unsafe { (*ptr).clone() })
    }
}

impl Drop for OriginPublisher {
    fn drop(&mut self) {
        let ptr = self.current.swap(std::ptr::null_mut(), Ordering::AcqRel);
        if !ptr.is_null() {
            unsafe {
                drop(Box::from_raw(ptr));
            }
        }
    }
}

pub struct OriginScraper {
    client: reqwest::Client,
    node_url: Option<String>,
    nginx_url: Option<String>,
    interval: Duration,
    publisher: Arc<OriginPublisher>,
    network_window: RollingWindow,
    prior: PriorCounters,
    last_good: OriginMetrics,
}

impl OriginScraper {
    pub fn new(
        (node_url, nginx_url): (Option<String>, Option<String>),
        interval: Duration,
        window: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            node_url,
            nginx_url,
            interval,
            publisher: OriginPublisher::new(),
            network_window: RollingWindow::new(window),
            prior: PriorCounters::default(),
            last_good: OriginMetrics::default(),
        }
    }

    pub fn publisher(&self) -> Arc<OriginPublisher> {
        self.publisher.clone()
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        if self.node_url.is_none() && self.nginx_url.is_none() {
            return;
        }
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            self.tick().await;
        }
    }

    async fn tick(&mut self) {
        let now = Instant::now();
        let mut errors = Vec::new();

        let node_scrape = match &self.node_url {
            Some(url) => match fetch_scrape(&self.client, url).await {
                Ok(s) => Some(s),
                Err(e) => {
                    errors.push(format!("node-exporter: {e}"));
                    None
                }
            },
            None => None,
        };

        let nginx_scrape = match &self.nginx_url {
            Some(url) => match fetch_scrape(&self.client, url).await {
                Ok(s) => Some(s),
                Err(e) => {
                    errors.push(format!("nginx-exporter: {e}"));
                    None
                }
            },
            None => None,
        };

        let mut metrics = self.last_good.clone();
        let elapsed = self.prior.at.map(|at| now.duration_since(at).as_secs_f64()).filter(|e| *e > 0.0);

        if let Some(scrape) = &node_scrape {
            let idle = sum_metric(scrape, "node_cpu_seconds_total", Some(("mode", "idle")));
            let total = sum_metric(scrape, "node_cpu_seconds_total", None);
            let rx = sum_metric(scrape, "node_network_receive_bytes_total", None);
            let tx = sum_metric(scrape, "node_network_transmit_bytes_total", None);

            if let (Some(idle), Some(total), Some(elapsed)) = (idle, total, elapsed) {
                let d_idle = idle - self.prior.cpu_idle;
                let d_total = total - self.prior.cpu_total;
                if d_total > 0.0 {
                    metrics.cpu_percent = (1.0 - (d_idle / d_total)).clamp(0.0, 1.0) * 100.0;
                }
                let _ = elapsed;
            }
            if let (Some(rx), Some(elapsed)) = (rx, elapsed) {
                metrics.network_rx_bytes_per_sec = (rx - self.prior.network_rx).max(0.0) / elapsed;
                self.network_window.push(now, metrics.network_rx_bytes_per_sec);
            }
            if let (Some(tx), Some(elapsed)) = (tx, elapsed) {
                metrics.network_tx_bytes_per_sec = (tx - self.prior.network_tx).max(0.0) / elapsed;
            }

            if let Some(total_mem) = first_metric(scrape, "node_memory_MemTotal_bytes") {
                metrics.memory_total_bytes = total_mem as u64;
            }
            if let Some(avail) = first_metric(scrape, "node_memory_MemAvailable_bytes") {
                metrics.memory_used_bytes = (metrics.memory_total_bytes as f64 - avail).max(0.0) as u64;
            }

            self.prior.cpu_idle = idle.unwrap_or(self.prior.cpu_idle);
            self.prior.cpu_total = total.unwrap_or(self.prior.cpu_total);
            self.prior.network_rx = rx.unwrap_or(self.prior.network_rx);
            self.prior.network_tx = tx.unwrap_or(self.prior.network_tx);
        }

        if let Some(scrape) = &nginx_scrape {
            metrics.nginx_active_connections = first_metric(scrape, "nginx_connections_active");
            let requests = first_metric(scrape, "nginx_http_requests_total");
            if let (Some(requests), Some(elapsed)) = (requests, elapsed) {
                metrics.nginx_request_rate = Some((requests - self.prior.nginx_requests).max(0.0) / elapsed);
                self.prior.nginx_requests = requests;
            }
            let sum = first_metric(scrape, "nginx_http_request_duration_seconds_sum");
            let count = first_metric(scrape, "nginx_http_request_duration_seconds_count");
            if let (Some(sum), Some(count)) = (sum, count)
                && count > 0.0
            {
                metrics.nginx_avg_duration_seconds = Some(sum / count);
            }
        }

        self.prior.at = Some(now);
        self.last_good = metrics.clone();

        let healthy = errors.is_empty();
        let error = (!errors.is_empty()).then(|| errors.join("; "));
        if let Some(err) = &error {
            warn!("origin scraper cycle had failures: {err}");
        }

        self.publisher.publish(OriginSnapshot {
            generated_at: now,
            metrics,
            healthy,
            error,
            rate_p50: self.network_window.p50(),
            rate_max: self.network_window.max(),
        });
    }
}

async fn fetch_scrape(client: &reqwest::Client, url: &str) -> Result<Scrape, String> {
    let body = client
        .get(url)
        .send()
        .await
        .map_err(|e| e.to_string())?
        .text()
        .await
        .map_err(|e| e.to_string())?;
    Scrape::parse(body.lines().map(|l| Ok(l.to_string()))).map_err(|e| e.to_string())
}

fn sum_metric(scrape: &Scrape, name: &str, label: Option<(&str, &str)>) -> Option<f64> {
    let mut found = false;
    let total = scrape
        .samples
        .iter()
        .filter(|s| s.metric == name)
        .filter(|s| match label {
            Some((k, v)) => s.labels.get(k) == Some(v),
            None => true,
        })
        .filter_map(|s| sample_value(s))
        .inspect(|_| found = true)
        .sum();
    found.then_some(total)
}

fn first_metric(scrape: &Scrape, name: &str) -> Option<f64> {
    scrape.samples.iter().find(|s| s.metric == name).and_then(sample_value)
}

fn sample_value(sample: &prometheus_parse::Sample) -> Option<f64> {
    match &sample.value {
        prometheus_parse::Value::Gauge(v) => Some(*v),
        prometheus_parse::Value::Counter(v) => Some(*v),
        prometheus_parse::Value::Untyped(v) => Some(*v),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_window_evicts_old_samples() {
        let mut window = RollingWindow::new(Duration::from_millis(50));
        let t0 = Instant::now();
        window.push(t0, 10.0);
        window.push(t0 + Duration::from_millis(100), 20.0);
        assert_eq!(window.max(), 20.0);
    }

    #[test]
    fn rolling_window_p50_excludes_evicted_samples() {
        let mut window = RollingWindow::new(Duration::from_millis(50));
        let t0 = Instant::now();
        for _ in 0..20 {
            window.push(t0, 1000.0);
        }
        // Past the window: a single low sample should now dominate p50,
        // not be diluted or outweighed by the evicted high samples.
        window.push(t0 + Duration::from_millis(100), 1.0);
        assert!(window.p50() < 10.0, "p50 = {}", window.p50());
    }

    #[test]
    fn publisher_starts_empty() {
        let publisher = OriginPublisher::new();
        assert!(publisher.latest().is_none());
    }

    #[test]
    fn scraper_disabled_when_no_urls_configured() {
        let scraper = OriginScraper::new((None, None), Duration::from_secs(5), Duration::from_secs(30));
        assert!(scraper.node_url.is_none() && scraper.nginx_url.is_none());
    }
}
