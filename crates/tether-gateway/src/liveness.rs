//! WebSocket liveness tracking.
//!
//! Every accepted connection is attached with its alive flag set. A pong
//! frame sets the flag again. The sweep runs on a fixed interval and, for
//! each connection, either terminates it (flag still clear since the last
//! sweep) or clears the flag and sends a ping. A peer that never answers is
//! therefore dropped on the second sweep after it went quiet.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub type ConnectionId = u64;

/// Per-connection heartbeat state.
#[derive(Debug)]
pub struct ConnectionLiveness {
    is_alive: AtomicBool,
}

impl ConnectionLiveness {
    fn new() -> Self {
        Self {
            is_alive: AtomicBool::new(true),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.is_alive.load(Ordering::Acquire)
    }

    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Release);
    }

    /// Clear the flag ahead of a ping. Returns whether it was set.
    pub fn expect_pong(&self) -> bool {
        self.is_alive.swap(false, Ordering::AcqRel)
    }
}

/// The side of a connection the sweep can act on.
pub trait Peer: Send + Sync {
    /// Queue a ping frame. `false` means the peer is already gone.
    fn ping(&self) -> bool;
    /// Close the connection without waiting for the peer.
    fn terminate(&self);
}

/// Returned by [`LivenessTracker::attach`]; owned by the connection task.
#[derive(Debug, Clone)]
pub struct LivenessHandle {
    id: ConnectionId,
    state: Arc<ConnectionLiveness>,
}

impl LivenessHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn on_pong(&self) {
        self.state.mark_alive();
    }

    pub fn is_alive(&self) -> bool {
        self.state.is_alive()
    }

    pub fn state(&self) -> &ConnectionLiveness {
        &self.state
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub pinged: usize,
    pub terminated: usize,
}

struct Tracked {
    state: Arc<ConnectionLiveness>,
    peer: Arc<dyn Peer>,
}

#[derive(Default)]
pub struct LivenessTracker {
    next_id: AtomicU64,
    connections: Mutex<HashMap<ConnectionId, Tracked>>,
}

impl LivenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly accepted connection, initially alive.
    pub fn attach(&self, peer: Arc<dyn Peer>) -> LivenessHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let state = Arc::new(ConnectionLiveness::new());
        if let Ok(mut guard) = self.connections.lock() {
            guard.insert(
                id,
                Tracked {
                    state: state.clone(),
                    peer,
                },
            );
        }
        LivenessHandle { id, state }
    }

    /// Forget a connection. Returns whether it was still tracked.
    pub fn detach(&self, id: ConnectionId) -> bool {
        match self.connections.lock() {
            Ok(mut guard) => guard.remove(&id).is_some(),
            Err(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.connections.lock().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections
            .lock()
            .map(|g| g.contains_key(&id))
            .unwrap_or(false)
    }

    /// Run one check-and-ping pass over every tracked connection.
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let Ok(mut guard) = self.connections.lock() else {
            warn!("liveness tracker lock poisoned; skipping sweep");
            return report;
        };

        guard.retain(|id, tracked| {
            if !tracked.state.expect_pong() {
                debug!("connection {} missed heartbeat; terminating", id);
                tracked.peer.terminate();
                report.terminated += 1;
                return false;
            }

            if tracked.peer.ping() {
                report.pinged += 1;
                true
            } else {
                debug!("connection {} outbox closed; dropping", id);
                report.terminated += 1;
                false
            }
        });

        report
    }
}

/// Start the repeating sweep. The first pass runs one full `period` after start.
pub fn spawn_sweeper(tracker: Arc<LivenessTracker>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        loop {
            interval.tick().await;
            let report = tracker.sweep();
            if report.terminated > 0 {
                info!(
                    "heartbeat sweep terminated {} connection(s), pinged {}",
                    report.terminated, report.pinged
                );
            }
        }
    })
}
