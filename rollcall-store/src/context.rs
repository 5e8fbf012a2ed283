//! The process-wide store context.
//!
//! Built once at startup and handed to every operation. Tests build a fresh
//! one per case with [`Context::in_memory`].

use std::sync::Arc;
use std::time::Duration;

use rollcall_core::Config;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::adapter::TableAdapter;
use crate::allocator::IdAllocator;
use crate::backend::{BlobStore, MemoryBlobStore, MemoryTableService, TableService};
use crate::cache::Cache;
use crate::hub::{EventKind, NotificationHub};
use crate::locks::LockRegistry;

#[derive(Clone)]
pub struct Context {
    pub config: Arc<Config>,
    pub cache: Arc<Cache>,
    pub locks: Arc<LockRegistry>,
    /// Main workbook: roster, polls, buttons.
    pub main: TableAdapter,
    /// Rush workbook: the event index and per-event sub-tables.
    pub rush: TableAdapter,
    pub blobs: Arc<dyn BlobStore>,
    pub hub: NotificationHub,
    pub ids: IdAllocator,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("main", &self.main)
            .field("rush", &self.rush)
            .field("hub", &self.hub)
            .finish_non_exhaustive()
    }
}

/// Handles to the in-memory collaborators behind a [`Context::in_memory`].
#[derive(Debug, Clone)]
pub struct MemoryBackends {
    pub main: Arc<MemoryTableService>,
    pub rush: Arc<MemoryTableService>,
    pub blobs: Arc<MemoryBlobStore>,
}

impl Context {
    pub fn new(
        config: Config,
        main: Arc<dyn TableService>,
        rush: Arc<dyn TableService>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        let cache = Arc::new(Cache::new());
        let locks = Arc::new(LockRegistry::with_acquire_timeout(
            config.locks.acquire_timeout(),
        ));
        let ttl = config.table_ttl();
        let hub = NotificationHub::new(
            config.notify.channel_capacity,
            Duration::from_secs(config.notify.stale_after_secs),
        );
        Self {
            main: TableAdapter::new(main, Arc::clone(&cache), config.main_workbook.clone(), ttl),
            rush: TableAdapter::new(rush, Arc::clone(&cache), config.rush_workbook.clone(), ttl),
            ids: IdAllocator::new(Arc::clone(&locks), Arc::clone(&cache)),
            config: Arc::new(config),
            cache,
            locks,
            blobs,
            hub,
        }
    }

    /// A context over fresh in-memory services.
    pub fn in_memory(config: Config) -> (Self, MemoryBackends) {
        let backends = MemoryBackends {
            main: Arc::new(MemoryTableService::new()),
            rush: Arc::new(MemoryTableService::new()),
            blobs: Arc::new(MemoryBlobStore::new(config.blob.public_base_url.clone())),
        };
        let ctx = Self::new(
            config,
            backends.main.clone(),
            backends.rush.clone(),
            backends.blobs.clone(),
        );
        (ctx, backends)
    }

    /// Tell subscribers that `table` changed. Delivery failures are logged
    /// and never propagate; the write this follows has already completed.
    pub fn notify_changed(&self, table: &str) {
        self.notify(EventKind::Refresh, json!({ "table": table }));
    }

    /// Publish an arbitrary event with the same log-and-continue contract.
    pub fn notify(&self, kind: EventKind, payload: Value) {
        let report = self.hub.publish(kind, payload);
        if report.evicted.is_empty() {
            debug!(event = kind.as_str(), delivered = report.delivered, "change notified");
        } else {
            warn!(
                event = kind.as_str(),
                delivered = report.delivered,
                evicted = report.evicted.len(),
                "change notified with evictions"
            );
        }
    }

    /// Drop every cached read and counter.
    pub fn flush_caches(&self) {
        self.cache.delete_all();
    }
}
