//! Per-resource monotonic id allocation.
//!
//! The last issued id lives in the cache with no expiry under
//! `ids:<resource>`. On a miss (cold start, or after a cache flush) it is
//! recomputed as the maximum numeric value of the id column, so an id already
//! present in the table is never reissued.
//!
//! Allocation runs under its own section, `ids:<resource>`, distinct from the
//! section guarding the table's rows. A caller already inside the table's
//! section can allocate without re-entering it.

use std::sync::Arc;
use std::time::Duration;

use rollcall_core::StoreError;
use tracing::debug;

use crate::adapter::TableAdapter;
use crate::cache::{Cache, Cached};
use crate::locks::LockRegistry;

#[derive(Debug, Clone)]
pub struct IdAllocator {
    locks: Arc<LockRegistry>,
    cache: Arc<Cache>,
}

impl IdAllocator {
    pub fn new(locks: Arc<LockRegistry>, cache: Arc<Cache>) -> Self {
        Self { locks, cache }
    }

    fn counter_key(resource: &str) -> String {
        format!("ids:{resource}")
    }

    /// Next id for `resource`, seeded from `column` of `title` on a cold start.
    pub async fn next_id(
        &self,
        resource: &str,
        adapter: &TableAdapter,
        title: &str,
        column: &str,
    ) -> Result<u64, StoreError> {
        let key = Self::counter_key(resource);
        let section = key.clone();
        let cache = Arc::clone(&self.cache);
        let adapter = adapter.clone();
        let title = title.to_string();
        let column = column.to_string();

        self.locks
            .with_lock(&section, move || async move {
                let last = match cache.get_counter(&key) {
                    Some(n) => n,
                    None => {
                        let table = adapter.read_fresh(&title).await?;
                        let seeded = max_id(&table, &column);
                        debug!(resource = %key, seeded, "id counter recomputed");
                        seeded
                    }
                };
                let next = last + 1;
                cache.set(key, Cached::Counter(next), Duration::ZERO);
                Ok(next)
            })
            .await
    }

    /// Forget the counter so the next call recomputes it from the table.
    pub fn reset(&self, resource: &str) {
        self.cache.delete(&Self::counter_key(resource));
    }
}

/// Largest numeric value in `column`; non-numeric cells are ignored.
fn max_id(table: &rollcall_core::Table, column: &str) -> u64 {
    let Some(col) = table.column(column) else {
        return 0;
    };
    table
        .records()
        .filter_map(|r| r.at(col).trim().parse::<u64>().ok())
        .max()
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
