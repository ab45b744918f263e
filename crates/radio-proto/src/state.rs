use crate::protocol::PlayerSnapshot;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Read side of the session core's state.
///
/// The core is the only writer: it publishes a fresh snapshot after every
/// event it handles.  Readers (HTTP handlers, event streams) get clones.
pub struct StateManager {
    state: Arc<RwLock<PlayerSnapshot>>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateManager {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(PlayerSnapshot::default())),
        }
    }

    pub async fn get_state(&self) -> PlayerSnapshot {
        self.state.read().await.clone()
    }

    pub async fn rev(&self) -> u64 {
        self.state.read().await.rev
    }

    /// Replace the published state.  Skips the write when nothing changed;
    /// otherwise bumps `rev`.  Returns the revision now published.
    pub async fn publish(&self, mut snapshot: PlayerSnapshot) -> u64 {
        let mut state = self.state.write().await;
        snapshot.rev = state.rev;
        if *state == snapshot {
            return state.rev;
        }
        snapshot.rev = state.rev + 1;
        *state = snapshot;
        state.rev
    }
}
