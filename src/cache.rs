//! Capability cache
//!
//! Stores the most recent snapshot per server, serialized, with
//! single-latest-wins semantics: storing a new snapshot replaces the
//! previous entry in the same locked step, so a concurrent reader sees
//! either the old entry or the new one, never both or neither.
//!
//! Decoding a cached payload is memoized per server, keyed by the entry's
//! `generated_at` timestamp; any new entry changes the timestamp and
//! invalidates the memo transparently. A payload that fails to decode is
//! treated as a cache miss, never an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::snapshot::CapabilitySnapshot;

/// One stored snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    /// Server identity this entry belongs to
    pub server_identity: String,

    /// Serialized snapshot
    pub payload: String,

    /// When the snapshot was produced
    pub generated_at: DateTime<Utc>,
}

/// In-memory snapshot cache with memoized decode.
#[derive(Default)]
pub struct CapabilityCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    decoded: Mutex<HashMap<String, (DateTime<Utc>, Arc<CapabilitySnapshot>)>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl CapabilityCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize and store `snapshot` as the latest entry for the server,
    /// replacing any previous entry in the same step.
    pub fn store(
        &self,
        server_identity: &str,
        snapshot: &CapabilitySnapshot,
    ) -> Result<(), serde_json::Error> {
        let payload = serde_json::to_string(snapshot)?;
        let entry = CacheEntry {
            server_identity: server_identity.to_string(),
            payload,
            generated_at: Utc::now(),
        };

        lock(&self.entries).insert(server_identity.to_string(), entry);
        Ok(())
    }

    /// The latest snapshot for the server, decoded (memoized).
    ///
    /// Returns `None` when no entry exists or the stored payload is
    /// corrupt; a corrupt cache is equivalent to a cache miss.
    pub fn latest(&self, server_identity: &str) -> Option<Arc<CapabilitySnapshot>> {
        let (payload, generated_at) = {
            let entries = lock(&self.entries);
            let entry = entries.get(server_identity)?;
            (entry.payload.clone(), entry.generated_at)
        };

        let mut decoded = lock(&self.decoded);
        if let Some((memo_ts, snapshot)) = decoded.get(server_identity) {
            if *memo_ts == generated_at {
                return Some(Arc::clone(snapshot));
            }
        }

        match serde_json::from_str::<CapabilitySnapshot>(&payload) {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                decoded.insert(
                    server_identity.to_string(),
                    (generated_at, Arc::clone(&snapshot)),
                );
                Some(snapshot)
            }
            Err(e) => {
                tracing::debug!(
                    "Cached snapshot for '{}' is undecodable, treating as miss: {}",
                    server_identity,
                    e
                );
                decoded.remove(server_identity);
                None
            }
        }
    }

    /// The raw stored entry, for persistence by the configuration store.
    pub fn entry(&self, server_identity: &str) -> Option<CacheEntry> {
        lock(&self.entries).get(server_identity).cloned()
    }

    /// Drop the entry for a server (on server removal).
    pub fn remove(&self, server_identity: &str) {
        lock(&self.entries).remove(server_identity);
        lock(&self.decoded).remove(server_identity);
    }

    /// Restore a previously persisted entry (process restart).
    pub fn restore(&self, entry: CacheEntry) {
        lock(&self.entries).insert(entry.server_identity.clone(), entry);
    }

    #[cfg(test)]
    fn corrupt(&self, server_identity: &str) {
        if let Some(entry) = lock(&self.entries).get_mut(server_identity) {
            entry.payload = "{not json".to_string();
        }
    }
}
