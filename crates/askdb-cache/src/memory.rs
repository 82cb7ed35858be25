//! Concurrent in-memory TTL store.
//!
//! Entries expire logically at `created_at + ttl`. Expired entries are removed
//! lazily on the next `get` and in bulk by `sweep`, which a background task can
//! run periodically. Reads and writes go through a sharded map, so a writer
//! only ever blocks readers of the same shard, and values are replaced whole.
//!
//! Capacity is enforced on `put` by evicting in insertion order. Writes are
//! numbered and an ordered index maps sequence numbers to keys, so an
//! overflowing put removes the oldest entry without scanning the map.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use askdb_core::config::CacheSettings;
use askdb_core::error::CacheError;
use askdb_core::traits::{CacheStats, CacheStore};

use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    created_at: DateTime<Utc>,
    ttl: Duration,
    seq: u64,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => self.created_at.checked_add_signed(ttl).map_or(false, |expires| now >= expires),
            Err(_) => false,
        }
    }
}

pub struct MemoryCacheStore {
    entries: DashMap<String, Entry>,
    // write sequence -> key, oldest first
    order: Mutex<BTreeMap<u64, String>>,
    next_seq: AtomicU64,
    clock: Arc<dyn Clock>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryCacheStore {
    pub fn new(settings: &CacheSettings) -> Self { Self::with_clock(settings, Arc::new(SystemClock)) }

    pub fn with_clock(settings: &CacheSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(BTreeMap::new()),
            next_seq: AtomicU64::new(0),
            clock,
            max_entries: settings.max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Remove every expired entry; returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut dropped = Vec::new();
        self.entries.retain(|_, e| {
            let keep = !e.is_expired(now);
            if !keep { dropped.push(e.seq); }
            keep
        });
        if !dropped.is_empty() {
            let mut order = self.order();
            for seq in &dropped {
                order.remove(seq);
            }
        }
        self.evictions.fetch_add(dropped.len() as u64, Ordering::Relaxed);
        dropped.len()
    }

    /// Run `sweep` every `interval` until the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = interval.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = weak.upgrade() else { break };
                let removed = store.sweep();
                if removed > 0 {
                    debug!(removed, remaining = store.len(), "cache sweep");
                }
            }
        })
    }

    fn order(&self) -> MutexGuard<'_, BTreeMap<u64, String>> {
        self.order.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the oldest entries until the store fits. Runs with the order lock held.
    fn enforce_capacity(&self, order: &mut BTreeMap<u64, String>) {
        while self.entries.len() > self.max_entries {
            let Some((seq, key)) = order.pop_first() else { break };
            if self.entries.remove_if(&key, |_, e| e.seq == seq).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    fn name(&self) -> &str { "memory" }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = self.clock.now();
        // Copy out and release the shard guard before any removal.
        let lookup = self.entries.get(key).map(|e| (e.is_expired(now), e.value.clone()));
        match lookup {
            Some((false, value)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            }
            Some((true, _)) => {
                if let Some((_, e)) = self.entries.remove_if(key, |_, e| e.is_expired(now)) {
                    self.order().remove(&e.seq);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        // Writers serialize on the order lock; readers only touch map shards.
        let mut order = self.order();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let entry = Entry { value, created_at: self.clock.now(), ttl, seq };
        if let Some(old) = self.entries.insert(key.to_string(), entry) {
            order.remove(&old.seq);
        }
        order.insert(seq, key.to_string());
        self.enforce_capacity(&mut order);
        Ok(())
    }

    fn stats(&self) -> Option<CacheStats> {
        Some(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.entries.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store(max_entries: usize) -> (MemoryCacheStore, ManualClock) {
        let clock = ManualClock::default();
        let settings = CacheSettings { max_entries, ..CacheSettings::default() };
        (MemoryCacheStore::with_clock(&settings, Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let (cache, _) = store(10);
        cache.put("k", "v".into(), Duration::from_secs(60)).await.expect("cache op");
        assert_eq!(cache.get("k").await.expect("cache op").as_deref(), Some("v"));
        assert_eq!(cache.get("missing").await.expect("cache op"), None);
        let stats = cache.stats().expect("stats");
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    }

    #[tokio::test]
    async fn expired_entry_reads_as_absent_and_is_evicted() {
        let (cache, clock) = store(10);
        cache.put("k", "v".into(), Duration::from_secs(60)).await.expect("cache op");
        clock.advance(Duration::from_secs(59));
        assert!(cache.get("k").await.expect("cache op").is_some());
        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.get("k").await.expect("cache op"), None);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().expect("stats").evictions, 1);
    }

    #[tokio::test]
    async fn put_refreshes_created_at() {
        let (cache, clock) = store(10);
        cache.put("k", "old".into(), Duration::from_secs(10)).await.expect("cache op");
        clock.advance(Duration::from_secs(8));
        cache.put("k", "new".into(), Duration::from_secs(10)).await.expect("cache op");
        clock.advance(Duration::from_secs(8));
        assert_eq!(cache.get("k").await.expect("cache op").as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn sweep_drops_only_expired() {
        let (cache, clock) = store(10);
        cache.put("short", "a".into(), Duration::from_secs(1)).await.expect("cache op");
        cache.put("long", "b".into(), Duration::from_secs(100)).await.expect("cache op");
        clock.advance(Duration::from_secs(5));
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("long").await.expect("cache op").is_some());
    }

    #[tokio::test]
    async fn capacity_evicts_oldest() {
        let (cache, clock) = store(2);
        for key in ["a", "b", "c"] {
            cache.put(key, key.to_string(), Duration::from_secs(100)).await.expect("cache op");
            clock.advance(Duration::from_secs(1));
        }
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a").await.expect("cache op"), None);
        assert!(cache.get("c").await.expect("cache op").is_some());
    }

    #[tokio::test]
    async fn full_cache_evicts_one_entry_per_put() {
        let settings = CacheSettings { max_entries: 100, ..CacheSettings::default() };
        let cache = MemoryCacheStore::with_clock(&settings, Arc::new(ManualClock::default()));
        for i in 0..100 {
            cache.put(&format!("k{i}"), "v".into(), Duration::from_secs(600)).await.expect("put");
        }
        assert_eq!(cache.stats().expect("stats").evictions, 0);

        for i in 100..150 {
            cache.put(&format!("k{i}"), "v".into(), Duration::from_secs(600)).await.expect("put");
            assert_eq!(cache.len(), 100);
            assert_eq!(cache.stats().expect("stats").evictions, (i - 99) as u64);
            assert_eq!(cache.get(&format!("k{}", i - 100)).await.expect("get"), None);
            assert!(cache.get(&format!("k{}", i - 99)).await.expect("get").is_some());
        }
        assert_eq!(cache.order().len(), 100);
    }

    #[tokio::test]
    async fn rewriting_a_key_moves_it_to_the_back() {
        let settings = CacheSettings { max_entries: 2, ..CacheSettings::default() };
        let cache = MemoryCacheStore::with_clock(&settings, Arc::new(ManualClock::default()));
        cache.put("a", "1".into(), Duration::from_secs(60)).await.expect("put");
        cache.put("b", "1".into(), Duration::from_secs(60)).await.expect("put");
        cache.put("a", "2".into(), Duration::from_secs(60)).await.expect("put");
        cache.put("c", "1".into(), Duration::from_secs(60)).await.expect("put");
        assert_eq!(cache.get("b").await.expect("get"), None);
        assert_eq!(cache.get("a").await.expect("get").as_deref(), Some("2"));
        assert_eq!(cache.stats().expect("stats").evictions, 1);
    }

    #[tokio::test]
    async fn sweep_keeps_the_order_index_in_step() {
        let clock = ManualClock::default();
        let settings = CacheSettings { max_entries: 10, ..CacheSettings::default() };
        let cache = MemoryCacheStore::with_clock(&settings, Arc::new(clock.clone()));
        cache.put("short", "a".into(), Duration::from_secs(1)).await.expect("put");
        cache.put("long", "b".into(), Duration::from_secs(100)).await.expect("put");
        clock.advance(Duration::from_secs(5));
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.order().values().cloned().collect::<Vec<_>>(), vec!["long".to_string()]);
    }
}
