//! Per-key TTL cache for read results and small derived values.
//!
//! Keys are namespaced strings (`table:main:Sigma`, `identity:a@x.org`,
//! `ids:recruits:7`). A zero TTL means "no expiry, manual invalidation only".
//! Expiry is lazy: a stale entry reads as absent and is dropped on the spot.
//! [`Cache::purge_expired`] exists for the daemon's sweep task and is never
//! needed for correctness.
//!
//! No method blocks: DashMap shards are held only for the duration of a
//! single map operation.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rollcall_core::Table;
use tokio::time::Instant;

/// A cached value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cached {
    Table(Arc<Table>),
    Flag(bool),
    Counter(u64),
    Json(serde_json::Value),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Cached,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

#[derive(Debug, Default)]
pub struct Cache {
    entries: DashMap<String, Entry>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Cached> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.is_live(now) {
                return Some(entry.value.clone());
            }
        } else {
            return None;
        }
        // Expired: drop it unless a concurrent `set` already replaced it.
        self.entries.remove_if(key, |_, e| !e.is_live(now));
        None
    }

    pub fn get_table(&self, key: &str) -> Option<Arc<Table>> {
        match self.get(key) {
            Some(Cached::Table(t)) => Some(t),
            _ => None,
        }
    }

    pub fn get_flag(&self, key: &str) -> Option<bool> {
        match self.get(key) {
            Some(Cached::Flag(b)) => Some(b),
            _ => None,
        }
    }

    pub fn get_counter(&self, key: &str) -> Option<u64> {
        match self.get(key) {
            Some(Cached::Counter(n)) => Some(n),
            _ => None,
        }
    }

    pub fn get_json(&self, key: &str) -> Option<serde_json::Value> {
        match self.get(key) {
            Some(Cached::Json(v)) => Some(v),
            _ => None,
        }
    }

    /// Store `value` under `key`. `ttl == Duration::ZERO` never expires.
    pub fn set(&self, key: impl Into<String>, value: Cached, ttl: Duration) {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        };
        self.entries.insert(key.into(), Entry { value, expires_at });
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every key starting with `prefix`. Returns how many were removed.
    pub fn delete_prefix(&self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, _| !k.starts_with(prefix));
        before.saturating_sub(self.entries.len())
    }

    pub fn delete_all(&self) {
        self.entries.clear();
    }

    /// Remove entries past their TTL. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn value_is_visible_until_ttl_elapses() {
        let cache = Cache::new();
        cache.set("k", Cached::Counter(7), Duration::from_secs(60));

        advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get_counter("k"), Some(7));

        advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty(), "expired entry is dropped on read");
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn zero_ttl_never_expires() {
        let cache = Cache::new();
        cache.set("k", Cached::Flag(true), Duration::ZERO);
        advance(Duration::from_secs(365 * 24 * 3600)).await;
        assert_eq!(cache.get_flag("k"), Some(true));
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn delete_is_immediate_regardless_of_ttl() {
        let cache = Cache::new();
        cache.set("k", Cached::Counter(1), Duration::from_secs(3600));
        assert!(cache.delete("k"));
        assert_eq!(cache.get("k"), None);
        assert!(!cache.delete("k"));
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn purge_removes_only_expired() {
        let cache = Cache::new();
        cache.set("short", Cached::Counter(1), Duration::from_secs(5));
        cache.set("long", Cached::Counter(2), Duration::from_secs(500));
        cache.set("forever", Cached::Counter(3), Duration::ZERO);

        advance(Duration::from_secs(10)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn prefix_and_full_invalidation() {
        let cache = Cache::new();
        cache.set("identity:a", Cached::Flag(true), Duration::ZERO);
        cache.set("identity:b", Cached::Flag(true), Duration::ZERO);
        cache.set("table:main:Sigma", Cached::Counter(0), Duration::ZERO);

        assert_eq!(cache.delete_prefix("identity:"), 2);
        assert_eq!(cache.len(), 1);

        cache.delete_all();
        assert!(cache.is_empty());
    }

    #[test]
    fn typed_getters_reject_other_variants() {
        let cache = Cache::new();
        cache.set("k", Cached::Flag(true), Duration::ZERO);
        assert_eq!(cache.get_counter("k"), None);
        assert_eq!(cache.get_table("k"), None);
    }
}
