//! Published view of the client: what consumers render from.

use std::sync::Arc;

use jobsync_shared::JobMap;
use tokio::sync::{broadcast, watch};

use crate::ws::ConnectionState;

/// Everything a consumer needs, frozen at one point in time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientSnapshot {
    pub state: ConnectionState,
    pub jobs: JobMap,
    /// Last authentication (or give-up) error. Cleared on `auth_success`.
    pub last_error: Option<String>,
    /// Consecutive reconnect attempts since the last successful auth.
    pub reconnect_attempt: u32,
    /// Increments by one per published change.
    pub revision: u64,
}

/// Fans each change out to the latest-value channel and the change stream.
///
/// `publish` is called once per processed event, so the broadcast side sees
/// every revision; the watch side only ever holds the newest.
pub struct SnapshotPublisher {
    latest: watch::Sender<Arc<ClientSnapshot>>,
    changes: broadcast::Sender<Arc<ClientSnapshot>>,
    revision: u64,
}

impl SnapshotPublisher {
    pub fn new(capacity: usize) -> Self {
        let (latest, _) = watch::channel(Arc::new(ClientSnapshot::default()));
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            latest,
            changes,
            revision: 0,
        }
    }

    pub fn subscribe_latest(&self) -> watch::Receiver<Arc<ClientSnapshot>> {
        self.latest.subscribe()
    }

    pub fn changes(&self) -> broadcast::Sender<Arc<ClientSnapshot>> {
        self.changes.clone()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn publish(
        &mut self,
        state: &ConnectionState,
        jobs: &JobMap,
        last_error: &Option<String>,
        reconnect_attempt: u32,
    ) -> Arc<ClientSnapshot> {
        self.revision += 1;
        let snapshot = Arc::new(ClientSnapshot {
            state: state.clone(),
            jobs: jobs.clone(),
            last_error: last_error.clone(),
            reconnect_attempt,
            revision: self.revision,
        });
        self.latest.send_replace(snapshot.clone());
        // No receivers is fine; nobody is listening for per-event changes.
        let _ = self.changes.send(snapshot.clone());
        snapshot
    }
}
