//! Session storage for sealed payloads.
//!
//! Stores only ever see [`EncryptedBundle`]s; plaintext stays inside the
//! vault and the request that asked for it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tether_vault::EncryptedBundle;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("session store is at capacity ({0})")]
    CapacityReached(usize),

    #[error("session store unavailable")]
    Unavailable,
}

/// Capabilities a session store offers to request handlers.
///
/// `put` replaces the whole record. There is no partial update.
pub trait SessionStore: Send + Sync {
    fn get(&self, id: &str) -> Option<EncryptedBundle>;
    fn put(&self, id: &str, bundle: EncryptedBundle) -> Result<(), StoreError>;
    fn evict(&self, id: &str) -> bool;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Which store a session lives in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionTier {
    /// Live sessions, expired after the configured TTL.
    #[default]
    Active,
    /// Kept until explicitly evicted.
    Permanent,
}

impl SessionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionTier::Active => "active",
            SessionTier::Permanent => "permanent",
        }
    }
}

struct StoredSession {
    bundle: EncryptedBundle,
    stored_at: Instant,
}

/// In-process store backed by a `HashMap`.
pub struct MemorySessionStore {
    capacity: usize,
    entries: RwLock<HashMap<String, StoredSession>>,
}

impl MemorySessionStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn shared(capacity: usize) -> Arc<Self> {
        Arc::new(Self::new(capacity))
    }

    /// Drop every record stored more than `ttl` ago. Returns how many went.
    pub fn evict_older_than(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let Ok(mut guard) = self.entries.write() else {
            return 0;
        };
        let before = guard.len();
        guard.retain(|_, entry| now.duration_since(entry.stored_at) < ttl);
        before - guard.len()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, id: &str) -> Option<EncryptedBundle> {
        let guard = self.entries.read().ok()?;
        guard.get(id).map(|entry| entry.bundle.clone())
    }

    fn put(&self, id: &str, bundle: EncryptedBundle) -> Result<(), StoreError> {
        let mut guard = self.entries.write().map_err(|_| StoreError::Unavailable)?;
        if !guard.contains_key(id) && guard.len() >= self.capacity {
            return Err(StoreError::CapacityReached(self.capacity));
        }
        guard.insert(
            id.to_string(),
            StoredSession {
                bundle,
                stored_at: Instant::now(),
            },
        );
        Ok(())
    }

    fn evict(&self, id: &str) -> bool {
        match self.entries.write() {
            Ok(mut guard) => guard.remove(id).is_some(),
            Err(_) => false,
        }
    }

    fn len(&self) -> usize {
        self.entries.read().map(|g| g.len()).unwrap_or(0)
    }
}
