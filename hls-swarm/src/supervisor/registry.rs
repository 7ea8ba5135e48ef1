//! Client registry: a `JoinSet`-backed map of running client pipeline
//! tasks, owned exclusively by the supervisor task (spec §4.3
//! "Concurrency").

use std::collections::HashMap;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::domain::{ClientHandle, ClientState};
use crate::error::Result;
use crate::pipeline::PipelineOutcome;

/// Completion of one client pipeline task, surfaced through the `JoinSet`.
pub struct ClientTaskResult {
    pub client_id: u64,
    pub outcome: Result<PipelineOutcome>,
}

/// Registry of running clients. The supervisor is the only mutator; other
/// components read via message passing or atomic snapshots (spec §4.3).
pub struct ClientRegistry {
    handles: HashMap<u64, ClientHandle>,
    tasks: JoinSet<ClientTaskResult>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            handles: HashMap::new(),
            tasks: JoinSet::new(),
        }
    }

    pub fn insert(&mut self, handle: ClientHandle) {
        self.handles.insert(handle.id, handle);
    }

    pub fn get(&self, id: u64) -> Option<&ClientHandle> {
        self.handles.get(&id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut ClientHandle> {
        self.handles.get_mut(&id)
    }

    pub fn set_state(&mut self, id: u64, state: ClientState) {
        if let Some(handle) = self.handles.get_mut(&id) {
            handle.state = state;
        }
    }

    pub fn mark_progress(&mut self, id: u64, now: std::time::Instant) {
        if let Some(handle) = self.handles.get_mut(&id) {
            handle.last_progress = now;
            handle.state = ClientState::Running;
        }
    }

    pub fn remove(&mut self, id: u64) -> Option<ClientHandle> {
        self.handles.remove(&id)
    }

    pub fn active_count(&self) -> u32 {
        self.handles
            .values()
            .filter(|h| !matches!(h.state, ClientState::Exited))
            .count() as u32
    }

    pub fn spawn_task<F>(&mut self, future: F)
    where
        F: std::future::Future<Output = ClientTaskResult> + Send + 'static,
    {
        self.tasks.spawn(future);
    }

    pub async fn join_next(&mut self) -> Option<std::result::Result<ClientTaskResult, tokio::task::JoinError>> {
        self.tasks.join_next().await
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn stalled_ids(&self, target_duration: std::time::Duration, now: std::time::Instant) -> Vec<u64> {
        self.handles
            .values()
            .filter(|h| h.is_stalled(target_duration, now))
            .map(|h| h.id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientHandle> {
        self.handles.values()
    }

    /// Cancels every tracked client's token, fanning out the root signal
    /// (spec §5 "Cancellation").
    pub fn cancel_all(&self) {
        for handle in self.handles.values() {
            handle.cancel.cancel();
        }
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates a per-client cancellation token as a child of the root token, so
/// a single root signal fans out to every client without the supervisor
/// needing to track and cancel each one individually on shutdown.
pub fn child_token(root: &CancellationToken) -> CancellationToken {
    root.child_token()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_count_excludes_exited() {
        let mut registry = ClientRegistry::new();
        registry.insert(ClientHandle::new(1, CancellationToken::new()));
        registry.insert(ClientHandle::new(2, CancellationToken::new()));
        registry.set_state(2, ClientState::Exited);
        assert_eq!(registry.active_count(), 1);
    }
}
