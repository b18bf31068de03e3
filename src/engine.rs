//! Acquisition engine facade
//!
//! Ties the providers, cache and health projection together behind one
//! entry point. A refresh runs a full acquisition for a descriptor, caches
//! the snapshot on success, and always yields a health verdict, so callers
//! never branch on transport kind or failure shape themselves.

use std::sync::Arc;

use crate::auth::TokenSource;
use crate::cache::CapabilityCache;
use crate::descriptor::ServerDescriptor;
use crate::error::ClassifiedError;
use crate::events::EventSink;
use crate::health::{self, HealthReport};
use crate::provider::{AcquireConfig, LocalProvider, RemoteProvider};
use crate::snapshot::CapabilitySnapshot;

/// Result of one refresh: the acquisition outcome and the health verdict
/// projected from it.
#[derive(Debug)]
pub struct AcquisitionReport {
    /// Snapshot on success, classified failure otherwise
    pub outcome: Result<Arc<CapabilitySnapshot>, ClassifiedError>,

    /// Health verdict for this attempt
    pub health: HealthReport,
}

/// Capability acquisition engine.
pub struct Engine {
    local: LocalProvider,
    remote: RemoteProvider,
    cache: Arc<CapabilityCache>,
}

impl Engine {
    /// Build an engine with a fresh cache.
    pub fn new(
        config: AcquireConfig,
        sink: Arc<dyn EventSink>,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self::with_cache(config, sink, tokens, Arc::new(CapabilityCache::new()))
    }

    /// Build an engine around an existing cache (for restored entries).
    pub fn with_cache(
        config: AcquireConfig,
        sink: Arc<dyn EventSink>,
        tokens: Arc<dyn TokenSource>,
        cache: Arc<CapabilityCache>,
    ) -> Self {
        Self {
            local: LocalProvider::new(config.clone(), Arc::clone(&sink)),
            remote: RemoteProvider::new(config, sink, tokens),
            cache,
        }
    }

    /// The snapshot cache.
    pub fn cache(&self) -> &Arc<CapabilityCache> {
        &self.cache
    }

    /// Run one acquisition for the descriptor and project its health.
    ///
    /// On success the snapshot becomes the server's latest cache entry; on
    /// failure the previous entry, if any, is left in place so stale
    /// capabilities remain available to readers.
    pub async fn refresh(&self, descriptor: &ServerDescriptor) -> AcquisitionReport {
        let identity = descriptor.identity().to_string();

        let outcome = match descriptor {
            ServerDescriptor::LocalProcess(d) => self.local.acquire(d).await,
            ServerDescriptor::RemoteHttp(d) => self.remote.acquire(d).await,
        };

        let health = health::project(&outcome);

        let outcome = outcome.map(|snapshot| {
            if let Err(e) = self.cache.store(&identity, &snapshot) {
                tracing::debug!("Failed to cache snapshot for '{}': {}", identity, e);
            }
            Arc::new(snapshot)
        });

        AcquisitionReport { outcome, health }
    }

    /// The latest cached snapshot for a server, if one exists.
    pub fn cached(&self, server_identity: &str) -> Option<Arc<CapabilitySnapshot>> {
        self.cache.latest(server_identity)
    }

    /// Drop a server's cached snapshot (on server removal).
    pub fn evict(&self, server_identity: &str) {
        self.cache.remove(server_identity);
    }
}
