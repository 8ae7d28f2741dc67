//! Storage Tiers
//!
//! A [`StorageTier`] binds a [`StoreBackend`] to a tier level and its
//! declared capacity, default TTL, and eviction policy. The manager fans
//! out to tiers; tiers own the mechanics of sweeping, eviction, and the
//! quota emergency path.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::entry::CacheEntry;
use crate::error::{Error, Result};
use crate::policy::{EvictionCandidate, EvictionPolicy};
use crate::store::StoreBackend;

/// The three tier levels, fastest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierLevel {
    /// Volatile in-process store, fastest, always present
    Ephemeral,
    /// Durable per-device store with a hard quota
    Local,
    /// Largest and slowest, present only when the platform provides it
    Shared,
}

impl TierLevel {
    /// Probe order: lower rank is faster.
    #[inline]
    pub fn rank(&self) -> u8 {
        match self {
            TierLevel::Ephemeral => 0,
            TierLevel::Local => 1,
            TierLevel::Shared => 2,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TierLevel::Ephemeral => "ephemeral",
            TierLevel::Local => "local",
            TierLevel::Shared => "shared",
        }
    }
}

impl std::fmt::Display for TierLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Static declaration every tier carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    /// Capacity in bytes
    pub max_size: u64,
    /// TTL applied to writes that do not specify one
    pub default_ttl: Duration,
    /// Ordering used when capacity must be reclaimed
    pub eviction_policy: EvictionPolicy,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            max_size: 64 * 1024 * 1024,
            default_ttl: Duration::from_secs(300),
            eviction_policy: EvictionPolicy::default(),
        }
    }
}

/// Fraction of remaining entries dropped (oldest first) by the quota
/// emergency path after expired entries are swept.
const EMERGENCY_DROP_FRACTION: f64 = 0.20;

/// A tier: level + declaration + backend.
pub struct StorageTier<V> {
    level: TierLevel,
    config: TierConfig,
    backend: Arc<dyn StoreBackend<V>>,
}

impl<V> StorageTier<V>
where
    V: Clone + Send + Sync,
{
    pub fn new(level: TierLevel, config: TierConfig, backend: Arc<dyn StoreBackend<V>>) -> Self {
        Self {
            level,
            config,
            backend,
        }
    }

    #[inline]
    pub fn level(&self) -> TierLevel {
        self.level
    }

    #[inline]
    pub fn config(&self) -> &TierConfig {
        &self.config
    }

    pub async fn get(&self, key: &str) -> Result<Option<CacheEntry<V>>> {
        self.backend.get(key).await
    }

    pub async fn set(&self, entry: CacheEntry<V>) -> Result<()> {
        self.backend.set(entry).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        self.backend.delete(key).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.backend.clear().await
    }

    pub async fn keys(&self) -> Result<Vec<String>> {
        self.backend.keys().await
    }

    /// Resident bytes, recomputed by the backend on every call.
    pub async fn used_bytes(&self) -> Result<u64> {
        self.backend.size().await
    }

    pub async fn entry_count(&self) -> Result<u64> {
        Ok(self.backend.keys().await?.len() as u64)
    }

    /// Walk live entries. Keys deleted mid-walk are skipped; per-key
    /// backend failures drop that key from the walk rather than failing it.
    pub async fn entries(&self) -> Result<Vec<CacheEntry<V>>> {
        let keys = self.backend.keys().await?;
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            match self.backend.get(&key).await {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(e) => {
                    debug!(tier = %self.level, key = %key, error = %e, "skipping unreadable entry");
                }
            }
        }
        Ok(entries)
    }

    /// Write with the quota recovery path: on `QuotaExceeded`, run one
    /// emergency cleanup and retry once. The retry's failure propagates
    /// so the manager can abandon this tier's write.
    pub async fn write(&self, entry: CacheEntry<V>) -> Result<()> {
        match self.backend.set(entry.clone()).await {
            Err(Error::QuotaExceeded { requested, .. }) => {
                warn!(
                    tier = %self.level,
                    requested,
                    "quota exceeded, running emergency cleanup"
                );
                self.emergency_cleanup().await?;
                self.backend.set(entry).await
            }
            other => other,
        }
    }

    /// Remove every expired entry. Returns the number removed.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let mut removed = 0u64;
        for entry in self.entries().await? {
            if entry.is_expired() && self.backend.delete(entry.key()).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(tier = %self.level, removed, "swept expired entries");
        }
        Ok(removed)
    }

    /// Evict entries in policy order until at least `need_bytes` are
    /// freed (slight overshoot is fine). Returns (evicted, freed bytes).
    pub async fn evict_bytes(&self, need_bytes: u64) -> Result<(u64, u64)> {
        if need_bytes == 0 {
            return Ok((0, 0));
        }

        let mut candidates: Vec<EvictionCandidate> = self
            .entries()
            .await?
            .iter()
            .map(EvictionCandidate::from_entry)
            .collect();
        self.config.eviction_policy.sort(&mut candidates);

        let mut evicted = 0u64;
        let mut freed = 0u64;
        for candidate in candidates {
            if freed >= need_bytes {
                break;
            }
            if self.backend.delete(&candidate.key).await? {
                evicted += 1;
                freed += candidate.size;
            }
        }

        debug!(tier = %self.level, evicted, freed, "eviction pass complete");
        Ok((evicted, freed))
    }

    /// Bring resident bytes back under `max_size`. Returns evictions.
    pub async fn enforce_capacity(&self) -> Result<u64> {
        let used = self.used_bytes().await?;
        if used <= self.config.max_size {
            return Ok(0);
        }
        let (evicted, _) = self.evict_bytes(used - self.config.max_size).await?;
        Ok(evicted)
    }

    /// Quota emergency path: sweep expired entries, then drop the oldest
    /// 20% of what remains by last access. Returns the number removed.
    pub async fn emergency_cleanup(&self) -> Result<u64> {
        let mut removed = self.sweep_expired().await?;

        let mut candidates: Vec<EvictionCandidate> = self
            .entries()
            .await?
            .iter()
            .map(EvictionCandidate::from_entry)
            .collect();
        EvictionPolicy::Lru.sort(&mut candidates);

        let drop_count = ((candidates.len() as f64) * EMERGENCY_DROP_FRACTION).ceil() as usize;
        for candidate in candidates.into_iter().take(drop_count) {
            if self.backend.delete(&candidate.key).await? {
                removed += 1;
            }
        }

        warn!(tier = %self.level, removed, "emergency cleanup finished");
        Ok(removed)
    }
}

// =============================================================================
// Tests
// =============================================================================
