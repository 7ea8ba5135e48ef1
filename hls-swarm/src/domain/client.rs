//! Client: a logical viewer, and its lifecycle state machine (spec §4.7).

use std::time::Instant;

use tokio_util::sync::CancellationToken;

/// Lifecycle state of a single client.
///
/// ```text
/// Pending --start--> Ramping --exec ok--> Running
///                                             |
///                                no-progress >= 2*TargetDuration
///                                             v
///                                         Stalled
///                                             |
///                                    restart-on-stall?
///                                 yes ---------+---- no
///                                  v                 v
///                              Restarting       (stays Stalled)
///                                  |
///                             backoff expires
///                                  v
///                                Ramping
/// All terminal paths -> Exited
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Pending,
    Ramping,
    Running,
    Stalled,
    Restarting,
    Exited,
}

/// A handle the supervisor keeps for one client.
///
/// The supervisor only reads these fields and issues cancellation; the
/// owning pipeline task is the sole mutator of parser state, per the
/// ownership rule in spec §3.
pub struct ClientHandle {
    pub id: u64,
    pub state: ClientState,
    pub started_at: Instant,
    pub restart_count: u32,
    pub last_progress: Instant,
    pub cancel: CancellationToken,
}

impl ClientHandle {
    pub fn new(id: u64, cancel: CancellationToken) -> Self {
        let now = Instant::now();
        Self {
            id,
            state: ClientState::Pending,
            started_at: now,
            restart_count: 0,
            last_progress: now,
            cancel,
        }
    }

    /// A client is stalled if no progress has been observed for at least
    /// `2 * target_duration` (spec §4.3).
    pub fn is_stalled(&self, target_duration: std::time::Duration, now: Instant) -> bool {
        matches!(self.state, ClientState::Running | ClientState::Stalled)
            && now.duration_since(self.last_progress) >= target_duration * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_stalled_before_threshold() {
        let handle = ClientHandle {
            state: ClientState::Running,
            ..ClientHandle::new(1, CancellationToken::new())
        };
        assert!(!handle.is_stalled(std::time::Duration::from_secs(6), Instant::now()));
    }
}
