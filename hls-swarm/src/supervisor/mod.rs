//! Supervisor (spec §4.3): lifecycle of N clients across ramp-up, stall
//! detection, exit classification, and restart-with-backoff.

mod ramp;
mod registry;
mod restart;

pub use registry::{ClientRegistry, ClientTaskResult};
pub use restart::RestartTracker;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::domain::{
    ClientHandle, ClientState, ExitCategory, PerClientStats, StatsRegistry, new_stats_registry,
};
use crate::pipeline;
use crate::segment_cache::SegmentSizeLookup;

/// Report produced by a graceful shutdown (spec §4.7, §9).
#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    pub total_clients: usize,
    pub graceful_stops: usize,
    pub forced_terminations: usize,
}

/// A client's most recently published terminal stats, kept until the
/// aggregator has merged its final snapshot.
pub struct ExitedClient {
    pub category: ExitCategory,
    pub stats: PerClientStats,
}

/// Owns the map of running clients and is the sole mutator of client state
/// (spec §4.3 "Concurrency").
pub struct Supervisor {
    registry: ClientRegistry,
    restart_tracker: RestartTracker,
    root_cancel: CancellationToken,
    target: u32,
    started: u32,
    next_id: u64,
    pub exits_total: HashMap<ExitCategory, u64>,
    pub recently_exited: Vec<ExitedClient>,
    stats_registry: StatsRegistry,
}

impl Supervisor {
    pub fn new(root_cancel: CancellationToken, target: u32) -> Self {
        Self {
            registry: ClientRegistry::new(),
            restart_tracker: RestartTracker::new(0),
            root_cancel,
            target,
            started: 0,
            next_id: 0,
            exits_total: HashMap::new(),
            recently_exited: Vec::new(),
            stats_registry: new_stats_registry(),
        }
    }

    /// The live per-client stats registry the aggregator reads from.
    pub fn stats_registry(&self) -> StatsRegistry {
        self.stats_registry.clone()
    }

    pub fn ramp_progress(&self) -> f64 {
        ramp::progress(self.started, self.target)
    }

    pub fn active_count(&self) -> u32 {
        self.registry.active_count()
    }

    pub fn restart_total(&self) -> u64 {
        self.restart_tracker.total_restarts()
    }

    /// Spawns all clients according to the ramp-up schedule, each on its
    /// own task (spec §4.3 "Ramp-up").
    pub fn spawn_ramp(
        &mut self,
        binary: Arc<str>,
        config: Arc<Config>,
        segment_sizes: Option<Arc<dyn SegmentSizeLookup>>,
    ) {
        for i in 0..self.target {
            let delay = ramp::scheduled_start(i, config.ramp_rate, config.ramp_jitter);
            let id = self.next_id;
            self.next_id += 1;

            let cancel = registry::child_token(&self.root_cancel);
            self.registry.insert(ClientHandle::new(id, cancel.clone()));
            self.started += 1;

            let shared = std::sync::Arc::new(parking_lot::Mutex::new(PerClientStats::new(Instant::now())));
            self.stats_registry.insert(id, shared.clone());

            let binary = binary.clone();
            let config = config.clone();
            let segment_sizes = segment_sizes.clone();
            self.registry.spawn_task(async move {
                tokio::time::sleep(delay).await;
                let outcome =
                    pipeline::run_client(id, &binary, &config, segment_sizes, cancel, Some(shared))
                        .await;
                ClientTaskResult { client_id: id, outcome }
            });
        }
    }

    /// Processes one completed client task: classify, record, and (per
    /// restart policy) schedule a respawn.
    pub fn handle_completion(
        &mut self,
        result: ClientTaskResult,
        binary: Arc<str>,
        config: Arc<Config>,
        segment_sizes: Option<Arc<dyn SegmentSizeLookup>>,
    ) {
        let id = result.client_id;
        match result.outcome {
            Ok(outcome) => {
                *self.exits_total.entry(outcome.exit_category).or_insert(0) += 1;
                let should_restart =
                    config.restart_on_stall && self.restart_tracker.can_restart(id);

                self.recently_exited.push(ExitedClient {
                    category: outcome.exit_category,
                    stats: outcome.final_stats,
                });

                if should_restart && !self.root_cancel.is_cancelled() {
                    let (backoff, count) = self.restart_tracker.record_restart(id);
                    info!("client {id} restarting after {backoff:?} (attempt {count})");
                    self.registry.set_state(id, ClientState::Restarting);
                    self.respawn_after(id, backoff, binary, config, segment_sizes);
                } else {
                    self.registry.set_state(id, ClientState::Exited);
                    self.registry.remove(id);
                    self.stats_registry.remove(&id);
                }
            }
            Err(join_err) => {
                warn!("client {id} task panicked: {join_err}");
                *self.exits_total.entry(ExitCategory::Error).or_insert(0) += 1;
                self.registry.set_state(id, ClientState::Exited);
                self.registry.remove(id);
                self.stats_registry.remove(&id);
            }
        }
    }

    fn respawn_after(
        &mut self,
        id: u64,
        backoff: Duration,
        binary: Arc<str>,
        config: Arc<Config>,
        segment_sizes: Option<Arc<dyn SegmentSizeLookup>>,
    ) {
        let cancel = registry::child_token(&self.root_cancel);
        if let Some(handle) = self.registry.get_mut(id) {
            handle.cancel = cancel.clone();
            handle.state = ClientState::Restarting;
        }
        let shared = std::sync::Arc::new(parking_lot::Mutex::new(PerClientStats::new(Instant::now())));
        self.stats_registry.insert(id, shared.clone());
        self.registry.spawn_task(async move {
            tokio::time::sleep(backoff).await;
            let outcome =
                pipeline::run_client(id, &binary, &config, segment_sizes, cancel, Some(shared)).await;
            ClientTaskResult { client_id: id, outcome }
        });
    }

    /// Awaits the next client task completion.
    pub async fn join_next(&mut self) -> Option<std::result::Result<ClientTaskResult, tokio::task::JoinError>> {
        self.registry.join_next().await
    }

    pub fn task_count(&self) -> usize {
        self.registry.task_count()
    }

    /// Marks clients with no progress observed for `2 * target_duration` as
    /// Stalled and, when `restart_on_stall` is set, cancels them so the
    /// pipeline loop exits and a restart is scheduled through the normal
    /// completion path (spec §4.3 "Stall detection").
    pub fn check_stalls(&mut self, target_duration: Duration, restart_on_stall: bool, now: Instant) {
        self.sync_progress_from_stats();
        for id in self.registry.stalled_ids(target_duration, now) {
            self.registry.set_state(id, ClientState::Stalled);
            if restart_on_stall {
                if let Some(handle) = self.registry.get(id) {
                    handle.cancel.cancel();
                }
            }
        }
    }

    /// Pulls each live client's most recent progress timestamp out of its
    /// shared stats slot (the only place the owning pipeline task records
    /// it, via `parser.feed_line`) and folds it into the registry's view of
    /// that client, promoting Pending/Ramping to Running along the way.
    /// Skipped for clients mid-restart or already exited, whose shared-stats
    /// entry (if any) belongs to a backoff sleep rather than a live child.
    fn sync_progress_from_stats(&mut self) {
        let ids: Vec<u64> = self
            .registry
            .iter()
            .filter(|h| !matches!(h.state, ClientState::Restarting | ClientState::Exited))
            .map(|h| h.id)
            .collect();
        for id in ids {
            if let Some(shared) = self.stats_registry.get(&id) {
                let last_progress = shared.lock().last_progress;
                self.registry.mark_progress(id, last_progress);
            }
        }
    }

    /// Phased graceful shutdown: cancel all clients, wait with a deadline,
    /// then fall through to abort (spec §4.7, teacher `Supervisor::shutdown`).
    pub async fn shutdown(&mut self, deadline: Duration) -> ShutdownReport {
        let total_clients = self.registry.task_count();
        self.registry.cancel_all();

        let mut graceful_stops = 0;
        let mut forced_terminations = 0;
        let until = tokio::time::Instant::now() + deadline;

        loop {
            if self.registry.task_count() == 0 {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep_until(until) => {
                    forced_terminations += self.registry.task_count();
                    break;
                }
                result = self.registry.join_next() => {
                    match result {
                        Some(Ok(task_result)) => {
                            match task_result.outcome {
                                Ok(outcome) => {
                                    *self.exits_total.entry(outcome.exit_category).or_insert(0) += 1;
                                    graceful_stops += 1;
                                }
                                Err(_) => forced_terminations += 1,
                            }
                        }
                        Some(Err(_)) => forced_terminations += 1,
                        None => break,
                    }
                }
            }
        }

        ShutdownReport {
            total_clients,
            graceful_stops,
            forced_terminations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_progress_zero_target_is_complete() {
        let supervisor = Supervisor::new(CancellationToken::new(), 0);
        assert_eq!(supervisor.ramp_progress(), 1.0);
    }

    fn fake_outcome(id: u64) -> ClientTaskResult {
        ClientTaskResult {
            client_id: id,
            outcome: Ok(pipeline::PipelineOutcome {
                exit_category: ExitCategory::Success,
                final_stats: PerClientStats::new(Instant::now()),
            }),
        }
    }

    #[tokio::test]
    async fn shutdown_counts_quickly_finishing_task_as_graceful() {
        let mut supervisor = Supervisor::new(CancellationToken::new(), 1);
        supervisor.registry.spawn_task(async { fake_outcome(1) });

        let report = supervisor.shutdown(Duration::from_millis(200)).await;
        assert_eq!(report.total_clients, 1);
        assert_eq!(report.graceful_stops, 1);
        assert_eq!(report.forced_terminations, 0);
    }

    #[test]
    fn check_stalls_flags_client_with_no_recent_progress() {
        let mut supervisor = Supervisor::new(CancellationToken::new(), 1);
        let cancel = registry::child_token(&supervisor.root_cancel);
        supervisor.registry.insert(ClientHandle::new(1, cancel));

        let stale = Instant::now() - Duration::from_secs(60);
        let shared = std::sync::Arc::new(parking_lot::Mutex::new(PerClientStats::new(stale)));
        supervisor.stats_registry.insert(1, shared);

        supervisor.check_stalls(Duration::from_secs(6), false, Instant::now());

        assert_eq!(supervisor.registry.get(1).unwrap().state, ClientState::Stalled);
    }

    #[test]
    fn check_stalls_cancels_when_restart_on_stall_set() {
        let mut supervisor = Supervisor::new(CancellationToken::new(), 1);
        let cancel = registry::child_token(&supervisor.root_cancel);
        supervisor.registry.insert(ClientHandle::new(1, cancel));

        let stale = Instant::now() - Duration::from_secs(60);
        let shared = std::sync::Arc::new(parking_lot::Mutex::new(PerClientStats::new(stale)));
        supervisor.stats_registry.insert(1, shared);

        supervisor.check_stalls(Duration::from_secs(6), true, Instant::now());

        assert!(supervisor.registry.get(1).unwrap().cancel.is_cancelled());
    }

    #[test]
    fn check_stalls_leaves_fresh_progress_running() {
        let mut supervisor = Supervisor::new(CancellationToken::new(), 1);
        let cancel = registry::child_token(&supervisor.root_cancel);
        supervisor.registry.insert(ClientHandle::new(1, cancel));

        let shared = std::sync::Arc::new(parking_lot::Mutex::new(PerClientStats::new(Instant::now())));
        supervisor.stats_registry.insert(1, shared);

        supervisor.check_stalls(Duration::from_secs(6), true, Instant::now());

        let handle = supervisor.registry.get(1).unwrap();
        assert_eq!(handle.state, ClientState::Running);
        assert!(!handle.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn shutdown_counts_slow_task_as_forced_after_deadline() {
        let mut supervisor = Supervisor::new(CancellationToken::new(), 1);
        supervisor.registry.spawn_task(async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            fake_outcome(1)
        });

        let report = supervisor.shutdown(Duration::from_millis(20)).await;
        assert_eq!(report.total_clients, 1);
        assert_eq!(report.forced_terminations, 1);
        assert_eq!(report.graceful_stops, 0);
    }
}
