//! Keyed Store Backends
//!
//! A tier is a thin policy wrapper over a [`StoreBackend`]: any keyed store
//! exposing get/set/delete/clear/keys/size. Backends are pluggable so the
//! cache stays agnostic to what actually holds the bytes — an in-process
//! map, a durable per-device store, or a platform-provided shared store.
//!
//! Two backends ship with the crate:
//!
//! - [`MemoryStore`] — lock-free concurrent map, always available
//! - [`QuotaStore`] — memory store with a hard byte quota, modeling the
//!   durable per-device store's capacity failure mode

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::entry::CacheEntry;
use crate::error::{Error, Result};

/// Capability contract every tier backend implements.
///
/// `size` must be recomputed from resident entries on every call, never
/// maintained as a running counter: concurrent sets and sweeps would make
/// a counter drift.
#[async_trait]
pub trait StoreBackend<V>: Send + Sync
where
    V: Clone + Send + Sync,
{
    /// Fetch an entry by key.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry<V>>>;

    /// Insert or replace an entry under its own key.
    async fn set(&self, entry: CacheEntry<V>) -> Result<()>;

    /// Remove an entry; `Ok(false)` if the key was absent.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every entry.
    async fn clear(&self) -> Result<()>;

    /// All resident keys.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Total estimated bytes of resident entries.
    async fn size(&self) -> Result<u64>;
}

/// Operation counters shared by the shipped backends.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub reads: u64,
    pub writes: u64,
    pub deletes: u64,
}

/// In-process memory store on a concurrent map.
pub struct MemoryStore<V> {
    map: DashMap<String, CacheEntry<V>>,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self {
            map: DashMap::new(),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }
}

impl<V> MemoryStore<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl<V> StoreBackend<V> for MemoryStore<V>
where
    V: Clone + Send + Sync,
{
    async fn get(&self, key: &str) -> Result<Option<CacheEntry<V>>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.map.get(key).map(|e| e.clone()))
    }

    async fn set(&self, entry: CacheEntry<V>) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.map.insert(entry.key().to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(self.map.remove(key).is_some())
    }

    async fn clear(&self) -> Result<()> {
        self.map.clear();
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.map.iter().map(|e| e.key().clone()).collect())
    }

    async fn size(&self) -> Result<u64> {
        Ok(self.map.iter().map(|e| e.value().size()).sum())
    }
}

/// Memory store with a hard byte quota.
///
/// A write that would push the resident total past the quota is refused
/// with [`Error::QuotaExceeded`]; the tier layer reacts with an emergency
/// cleanup and one retry.
pub struct QuotaStore<V> {
    label: String,
    quota_bytes: u64,
    inner: MemoryStore<V>,
}

impl<V> QuotaStore<V>
where
    V: Clone + Send + Sync,
{
    pub fn new(label: impl Into<String>, quota_bytes: u64) -> Self {
        Self {
            label: label.into(),
            quota_bytes,
            inner: MemoryStore::new(),
        }
    }

    pub fn quota_bytes(&self) -> u64 {
        self.quota_bytes
    }
}

#[async_trait]
impl<V> StoreBackend<V> for QuotaStore<V>
where
    V: Clone + Send + Sync,
{
    async fn get(&self, key: &str) -> Result<Option<CacheEntry<V>>> {
        self.inner.get(key).await
    }

    async fn set(&self, entry: CacheEntry<V>) -> Result<()> {
        // A replaced entry's bytes are reclaimed by the same write
        let replaced = self
            .inner
            .map
            .get(entry.key())
            .map(|e| e.size())
            .unwrap_or(0);
        let resident: u64 = self.inner.map.iter().map(|e| e.value().size()).sum();

        let projected = resident.saturating_sub(replaced) + entry.size();
        if projected > self.quota_bytes {
            return Err(Error::QuotaExceeded {
                tier: self.label.clone(),
                requested: entry.size(),
            });
        }

        self.inner.set(entry).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key).await
    }

    async fn clear(&self) -> Result<()> {
        self.inner.clear().await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.inner.keys().await
    }

    async fn size(&self) -> Result<u64> {
        self.inner.size().await
    }
}

// =============================================================================
// Tests
// =============================================================================
