//! Cache Entry Types
//!
//! The entry is the unit every tier stores: an opaque value plus the
//! metadata the eviction, promotion, and invalidation machinery runs on.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Estimated footprint used when the size estimator declines a value.
pub const FALLBACK_ENTRY_SIZE: u64 = 1024;

/// Current unix time in milliseconds.
///
/// TTLs in this cache are sub-second in tests, so second resolution
/// (as in typical epoch-seconds metadata) is not enough.
#[inline]
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Entry priority, ordered `Low < Medium < High < Critical`.
///
/// Drives tier selection on write and the `Priority` eviction ordering.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

/// Pure, synchronous size estimator for opaque cached values.
///
/// Returning `None` falls back to [`FALLBACK_ENTRY_SIZE`].
pub trait SizeEstimator<V>: Send + Sync {
    fn estimate(&self, value: &V) -> Option<u64>;
}

impl<V, F> SizeEstimator<V> for F
where
    F: Fn(&V) -> Option<u64> + Send + Sync,
{
    fn estimate(&self, value: &V) -> Option<u64> {
        self(value)
    }
}

/// Estimator that declines everything, yielding the constant fallback.
#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackEstimator;

impl<V> SizeEstimator<V> for FallbackEstimator {
    fn estimate(&self, _value: &V) -> Option<u64> {
        None
    }
}

/// Exact estimator for raw byte payloads.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesEstimator;

impl SizeEstimator<bytes::Bytes> for BytesEstimator {
    fn estimate(&self, value: &bytes::Bytes) -> Option<u64> {
        Some(value.len() as u64)
    }
}

/// Estimator for JSON documents: the serialized length.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonEstimator;

impl SizeEstimator<serde_json::Value> for JsonEstimator {
    fn estimate(&self, value: &serde_json::Value) -> Option<u64> {
        serde_json::to_vec(value).ok().map(|v| v.len() as u64)
    }
}

/// A cached value plus the metadata tiers operate on.
///
/// Access stats are atomics so a hit can bump them through a shared
/// reference; copies promoted into a faster tier carry the counters
/// forward while the source entry stays untouched.
#[derive(Debug)]
pub struct CacheEntry<V> {
    /// Key, unique within a tier
    key: String,
    /// The cached value
    data: V,
    /// Write time (unix millis)
    created_at_ms: u64,
    /// Time-to-live; the entry is valid while `now - created_at < ttl`
    ttl: Duration,
    /// Labels for group invalidation
    tags: Vec<String>,
    /// Ordinal priority
    priority: Priority,
    /// Hits against this entry, >= 1 from creation
    access_count: AtomicU32,
    /// Last hit time (unix millis)
    last_accessed_ms: AtomicU64,
    /// Estimated byte footprint, recomputed on every write
    size: u64,
    /// Informational write counter for the key
    version: u32,
    /// Keys/prefixes whose invalidation cascades to this entry
    dependencies: Vec<String>,
}

impl<V> CacheEntry<V> {
    /// Create a fresh entry as `set()` does: access count 1, last access now.
    pub fn new(key: impl Into<String>, data: V, ttl: Duration, size: u64) -> Self {
        let now = now_ms();
        Self {
            key: key.into(),
            data,
            created_at_ms: now,
            ttl,
            tags: Vec::new(),
            priority: Priority::default(),
            access_count: AtomicU32::new(1),
            last_accessed_ms: AtomicU64::new(now),
            size,
            version: 1,
            dependencies: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Rebind the TTL, e.g. to a tier's default on write.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[inline]
    pub fn data(&self) -> &V {
        &self.data
    }

    /// Consume the entry, yielding the value.
    pub fn into_data(self) -> V {
        self.data
    }

    #[inline]
    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    #[inline]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[inline]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    #[inline]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn version(&self) -> u32 {
        self.version
    }

    #[inline]
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Absolute expiry time (unix millis).
    #[inline]
    pub fn expires_at_ms(&self) -> u64 {
        self.created_at_ms + self.ttl.as_millis() as u64
    }

    /// An entry is valid while `now - created_at < ttl`.
    #[inline]
    pub fn is_valid(&self) -> bool {
        now_ms().saturating_sub(self.created_at_ms) < self.ttl.as_millis() as u64
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        !self.is_valid()
    }

    /// Record a hit: bump the access count and refresh last-accessed.
    /// Returns the new count.
    #[inline]
    pub fn record_access(&self) -> u32 {
        self.last_accessed_ms.store(now_ms(), Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    pub fn access_count(&self) -> u32 {
        self.access_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn last_accessed_ms(&self) -> u64 {
        self.last_accessed_ms.load(Ordering::Relaxed)
    }

    /// True if any of this entry's tags appears in `tags`.
    pub fn matches_any_tag(&self, tags: &[String]) -> bool {
        !tags.is_empty() && self.tags.iter().any(|t| tags.contains(t))
    }

    /// True if `key` equals or extends one of this entry's declared
    /// dependency keys/prefixes.
    pub fn depends_on(&self, key: &str) -> bool {
        self.dependencies
            .iter()
            .any(|dep| key == dep || key.starts_with(dep.as_str()))
    }
}

impl<V: Clone> Clone for CacheEntry<V> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            data: self.data.clone(),
            created_at_ms: self.created_at_ms,
            ttl: self.ttl,
            tags: self.tags.clone(),
            priority: self.priority,
            access_count: AtomicU32::new(self.access_count.load(Ordering::Relaxed)),
            last_accessed_ms: AtomicU64::new(self.last_accessed_ms.load(Ordering::Relaxed)),
            size: self.size,
            version: self.version,
            dependencies: self.dependencies.clone(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
