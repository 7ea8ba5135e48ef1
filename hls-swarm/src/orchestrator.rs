//! Orchestrator (spec §4.7): wires preflight, the supervisor, the
//! aggregator tick loop, the metrics server, and the scrapers together,
//! and owns the top-level shutdown sequence.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::aggregator::{Aggregator, SnapshotPublisher};
use crate::api::{self, AppState};
use crate::config::Config;
use crate::error::Result;
use crate::metrics::HealthChecker;
use crate::origin::OriginScraper;
use crate::preflight;
use crate::segment_cache::{SegmentSizeCache, SegmentSizeLookup, run_scraper as run_segment_scraper};
use crate::supervisor::Supervisor;

const AGGREGATOR_TICK: Duration = Duration::from_millis(200);
const STALL_CHECK_INTERVAL: Duration = Duration::from_secs(1);
const SNAPSHOT_STALE_AFTER: Duration = Duration::from_secs(5);
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);
const SEGMENT_SCRAPE_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Summary printed on exit (spec §4.7 "exit summary").
pub struct ExitSummary {
    pub shutdown: crate::supervisor::ShutdownReport,
    pub exits_total: std::collections::HashMap<crate::domain::ExitCategory, u64>,
    pub restarts_total: u64,
    pub peak_active: u32,
}

pub struct Orchestrator {
    config: Arc<Config>,
    binary: Arc<str>,
}

impl Orchestrator {
    pub fn new(binary: impl Into<Arc<str>>, config: Config) -> Self {
        Self {
            config: Arc::new(config),
            binary: binary.into(),
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<ExitSummary> {
        preflight::run(&self.binary, &self.config)?;

        let segment_sizes: Option<Arc<SegmentSizeCache>> = self
            .config
            .segment_size_url
            .as_ref()
            .map(|_| SegmentSizeCache::new(self.config.segment_size_window));
        if let (Some(cache), Some(url)) = (&segment_sizes, &self.config.segment_size_url) {
            let cache = cache.clone();
            let url = url.clone();
            let child = cancel.child_token();
            let interval = self.config.segment_size_interval;
            let jitter = self.config.segment_size_jitter;
            let client = reqwest::Client::new();
            tokio::spawn(run_segment_scraper(cache, client, url, interval, jitter, child));
        }

        let lookup: Option<Arc<dyn SegmentSizeLookup>> = segment_sizes
            .clone()
            .map(|c| c as Arc<dyn SegmentSizeLookup>);

        if let Some(cache) = &segment_sizes {
            if !cache.wait_for_first_scrape(SEGMENT_SCRAPE_READY_TIMEOUT).await {
                warn!(
                    "no successful segment-size scrape within {:?}; starting clients with an empty cache",
                    SEGMENT_SCRAPE_READY_TIMEOUT
                );
            }
        }

        let mut supervisor = Supervisor::new(cancel.child_token(), self.config.clients);
        supervisor.spawn_ramp(self.binary.clone(), self.config.clone(), lookup.clone());

        let publisher = SnapshotPublisher::new();
        let mut aggregator = Aggregator::new(supervisor.stats_registry(), self.config.clients);

        let origin_urls = self.config.resolved_origin_urls();
        let origin_publisher = if origin_urls.0.is_some() || origin_urls.1.is_some() {
            let scraper = OriginScraper::new(origin_urls, self.config.origin_metrics_interval, self.config.origin_metrics_window);
            let publisher = scraper.publisher();
            let child = cancel.child_token();
            tokio::spawn(scraper.run(child));
            Some(publisher)
        } else {
            None
        };

        let health_checker = Arc::new(HealthChecker::new(SNAPSHOT_STALE_AFTER));
        let api_state = AppState {
            publisher: publisher.clone(),
            origin_publisher,
            health_checker,
        };
        let metrics_addr: std::net::SocketAddr = self
            .config
            .metrics_addr
            .parse()
            .map_err(|_| crate::error::Error::config(format!("invalid metrics_addr: {}", self.config.metrics_addr)))?;
        let api_cancel = cancel.child_token();
        let api_handle = tokio::spawn(async move {
            if let Err(err) = api::run(metrics_addr, api_state, api_cancel).await {
                warn!("metrics server exited with error: {err}");
            }
        });

        let mut tick = tokio::time::interval(AGGREGATOR_TICK);
        let mut stall_check = tokio::time::interval(STALL_CHECK_INTERVAL);
        let mut peak_active = 0u32;

        let run_deadline = (!self.config.duration.is_zero())
            .then(|| tokio::time::Instant::now() + self.config.duration);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("shutdown requested, stopping {} clients", supervisor.task_count());
                    break;
                }

                _ = async { tokio::time::sleep_until(run_deadline.unwrap()).await }, if run_deadline.is_some() => {
                    info!("configured run duration elapsed; shutting down");
                    break;
                }

                Some(result) = supervisor.join_next() => {
                    match result {
                        Ok(task_result) => supervisor.handle_completion(
                            task_result,
                            self.binary.clone(),
                            self.config.clone(),
                            lookup.clone(),
                        ),
                        Err(join_err) => warn!("client task join error: {join_err}"),
                    }
                    if supervisor.task_count() == 0 && supervisor.ramp_progress() >= 1.0 {
                        info!("all clients have exited; shutting down");
                        break;
                    }
                }

                _ = tick.tick() => {
                    let active = supervisor.active_count();
                    peak_active = peak_active.max(active);
                    let snapshot = aggregator.tick(
                        active,
                        supervisor.ramp_progress(),
                        &supervisor.exits_total,
                        supervisor.restart_total(),
                    );
                    publisher.publish(snapshot);
                }

                _ = stall_check.tick() => {
                    supervisor.check_stalls(self.config.target_duration, self.config.restart_on_stall, Instant::now());
                }
            }
        }

        let shutdown = supervisor.shutdown(SHUTDOWN_DEADLINE).await;
        cancel.cancel();
        api_handle.abort();

        Ok(ExitSummary {
            exits_total: supervisor.exits_total.clone(),
            restarts_total: supervisor.restart_total(),
            shutdown,
            peak_active,
        })
    }
}
