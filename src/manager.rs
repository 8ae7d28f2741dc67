//! Cache Manager - Multi-Tier Orchestration
//!
//! The single entry point consumers hold. Fans reads out across tiers
//! fastest-first, routes writes by priority, promotes hot entries toward
//! the ephemeral tier, cascades invalidation through registered rules,
//! prefetches with bounded concurrency, and self-optimizes on a timer.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Cache Manager                            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  Ephemeral (RAM)     │ Local (durable, quota) │ Shared (probed)  │
//! │        │             │          │             │        │         │
//! │        └─────────────┴──────────┴─────────────┴────────┘         │
//! │                              │                                   │
//! │          Promotion / Eviction / Cascade Invalidation             │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Tier faults never reach the caller: a failing tier degrades to a miss
//! or a skipped write. Only malformed patterns and invalid configuration
//! surface as errors.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, instrument, warn};

use crate::entry::{CacheEntry, FallbackEstimator, Priority, SizeEstimator, FALLBACK_ENTRY_SIZE};
use crate::error::{Error, Result};
use crate::invalidation::{InvalidationRuleEngine, InvalidationTarget};
use crate::metrics::{KeyAccessReport, MetricsRegistry, PerformanceReport, TierReport};
use crate::store::{MemoryStore, QuotaStore, StoreBackend};
use crate::tier::{StorageTier, TierConfig, TierLevel};
use crate::{OPTIMIZE_HIGH_WATERMARK, OPTIMIZE_LOW_WATERMARK, PROMOTION_ACCESS_THRESHOLD};

/// Keys listed in the performance report's top-access table.
const TOP_KEYS_REPORTED: usize = 10;

/// Minimum request volume before hit-rate recommendations fire.
const RECOMMENDATION_MIN_SAMPLES: u64 = 20;

/// Aggregate hit rate below this draws a recommendation.
const LOW_HIT_RATE_THRESHOLD: f64 = 0.5;

/// Eviction volume per tier above this draws a recommendation.
const HIGH_EVICTION_THRESHOLD: u64 = 50;

/// Utilization above this draws a near-capacity recommendation.
const NEAR_CAPACITY_THRESHOLD: f64 = 0.90;

// =============================================================================
// Configuration
// =============================================================================

/// Static cache configuration. No hot reload: build a new manager to
/// change it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Ephemeral tier declaration
    pub ephemeral: TierConfig,
    /// Local (durable) tier declaration
    pub local: TierConfig,
    /// Shared tier declaration
    pub shared: TierConfig,
    /// TTL for writes that specify none (tier defaults win per tier)
    pub default_ttl: Duration,
    /// Feature toggle: durable local tier
    pub enable_local: bool,
    /// Feature toggle: platform shared tier
    pub enable_shared: bool,
    /// Feature toggle: prefetch (no-op when off)
    pub enable_prefetch: bool,
    /// Period of the background optimize pass
    pub optimization_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let default_ttl = Duration::from_secs(300);
        Self {
            ephemeral: TierConfig {
                max_size: 16 * 1024 * 1024,
                default_ttl,
                eviction_policy: crate::policy::EvictionPolicy::Lru,
            },
            local: TierConfig {
                max_size: 64 * 1024 * 1024,
                default_ttl,
                eviction_policy: crate::policy::EvictionPolicy::Lfu,
            },
            shared: TierConfig {
                max_size: 256 * 1024 * 1024,
                default_ttl,
                eviction_policy: crate::policy::EvictionPolicy::Ttl,
            },
            default_ttl,
            enable_local: true,
            enable_shared: true,
            enable_prefetch: true,
            optimization_interval: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    /// Reject configurations that cannot work. Invalid configuration is a
    /// programmer error and the one place construction fails.
    pub fn validate(&self) -> Result<()> {
        for (name, tier) in [
            ("ephemeral", &self.ephemeral),
            ("local", &self.local),
            ("shared", &self.shared),
        ] {
            if tier.max_size == 0 {
                return Err(Error::Config(format!("{name} tier max_size must be > 0")));
            }
            if tier.default_ttl.is_zero() {
                return Err(Error::Config(format!("{name} tier default_ttl must be > 0")));
            }
        }
        if self.default_ttl.is_zero() {
            return Err(Error::Config("default_ttl must be > 0".into()));
        }
        if self.optimization_interval.is_zero() {
            return Err(Error::Config("optimization_interval must be > 0".into()));
        }
        Ok(())
    }

    fn tier_config(&self, level: TierLevel) -> &TierConfig {
        match level {
            TierLevel::Ephemeral => &self.ephemeral,
            TierLevel::Local => &self.local,
            TierLevel::Shared => &self.shared,
        }
    }
}

// =============================================================================
// Per-call options
// =============================================================================

/// Options for `get_with`.
#[derive(Debug, Clone)]
pub struct GetOptions {
    /// Tiers to leave out of the probe
    pub skip_tiers: Vec<TierLevel>,
    /// Bump access stats on a hit (on by default)
    pub update_access_stats: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            skip_tiers: Vec::new(),
            update_access_stats: true,
        }
    }
}

/// Options for `set_with`.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// TTL override; tier defaults apply when absent
    pub ttl: Option<Duration>,
    pub priority: Priority,
    pub tags: Vec<String>,
    /// Keys/prefixes whose invalidation cascades to this entry
    pub dependencies: Vec<String>,
    /// Exact tier placement, overriding priority-based selection
    pub target_tiers: Option<Vec<TierLevel>>,
}

/// Options for `invalidate_with`.
#[derive(Debug, Clone, Default)]
pub struct InvalidateOptions {
    /// Also remove entries whose tag set intersects these
    pub by_tags: Vec<String>,
    /// Resolve registered rules and dependency declarations
    pub cascade: bool,
    /// Tiers to delete from (all active tiers when absent)
    pub target_tiers: Option<Vec<TierLevel>>,
}

/// Options for `prefetch_with`.
#[derive(Debug, Clone)]
pub struct PrefetchOptions {
    pub priority: Priority,
    pub ttl: Option<Duration>,
    /// Size of the loader slot pool
    pub max_concurrent: usize,
}

impl Default for PrefetchOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Medium,
            ttl: None,
            max_concurrent: 4,
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Capability-probing factory for a shared-store backend.
type SharedProbe<V> = Box<dyn FnOnce() -> Option<Arc<dyn StoreBackend<V>>> + Send>;

/// Builds a [`CacheManager`], probing tier capabilities exactly once.
pub struct CacheManagerBuilder<V> {
    config: CacheConfig,
    estimator: Arc<dyn SizeEstimator<V>>,
    ephemeral_store: Option<Arc<dyn StoreBackend<V>>>,
    local_store: Option<Arc<dyn StoreBackend<V>>>,
    shared_probe: Option<SharedProbe<V>>,
}

impl<V> CacheManagerBuilder<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            estimator: Arc::new(FallbackEstimator),
            ephemeral_store: None,
            local_store: None,
            shared_probe: None,
        }
    }

    /// Install the size estimator for this value type.
    pub fn estimator(mut self, estimator: impl SizeEstimator<V> + 'static) -> Self {
        self.estimator = Arc::new(estimator);
        self
    }

    pub fn ephemeral_store(mut self, store: Arc<dyn StoreBackend<V>>) -> Self {
        self.ephemeral_store = Some(store);
        self
    }

    pub fn local_store(mut self, store: Arc<dyn StoreBackend<V>>) -> Self {
        self.local_store = Some(store);
        self
    }

    /// Install a shared store directly (capability known present).
    pub fn shared_store(self, store: Arc<dyn StoreBackend<V>>) -> Self {
        self.shared_store_probe(move || Some(store))
    }

    /// Install a capability probe for the shared tier, invoked once at
    /// build time. Returning `None` omits the tier from the active set.
    pub fn shared_store_probe(
        mut self,
        probe: impl FnOnce() -> Option<Arc<dyn StoreBackend<V>>> + Send + 'static,
    ) -> Self {
        self.shared_probe = Some(Box::new(probe));
        self
    }

    pub fn build(self) -> Result<CacheManager<V>> {
        self.config.validate()?;

        let mut tiers: Vec<Arc<StorageTier<V>>> = Vec::with_capacity(3);

        let ephemeral_store = self
            .ephemeral_store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        tiers.push(Arc::new(StorageTier::new(
            TierLevel::Ephemeral,
            self.config.ephemeral.clone(),
            ephemeral_store,
        )));

        if self.config.enable_local {
            let store = self.local_store.unwrap_or_else(|| {
                Arc::new(QuotaStore::new("local", self.config.local.max_size))
            });
            tiers.push(Arc::new(StorageTier::new(
                TierLevel::Local,
                self.config.local.clone(),
                store,
            )));
        }

        if self.config.enable_shared {
            match self.shared_probe.and_then(|probe| probe()) {
                Some(store) => {
                    tiers.push(Arc::new(StorageTier::new(
                        TierLevel::Shared,
                        self.config.shared.clone(),
                        store,
                    )));
                }
                None => {
                    // Absent capability excludes the tier, no error raised
                    info!(
                        "{}",
                        Error::TierUnavailable {
                            tier: TierLevel::Shared.name().to_string()
                        }
                    );
                }
            }
        }

        let levels: Vec<TierLevel> = tiers.iter().map(|t| t.level()).collect();
        info!(?levels, "cache manager constructed");

        Ok(CacheManager {
            tiers,
            rules: InvalidationRuleEngine::new(),
            metrics: Arc::new(MetricsRegistry::new(&levels)),
            estimator: self.estimator,
            config: self.config,
            stopped: Arc::new(AtomicBool::new(false)),
            optimizer: Mutex::new(None),
        })
    }
}

// =============================================================================
// Manager
// =============================================================================

/// The orchestrating component. Consumers call this and nothing else.
pub struct CacheManager<V> {
    /// Active tiers, fastest first
    tiers: Vec<Arc<StorageTier<V>>>,
    rules: InvalidationRuleEngine,
    metrics: Arc<MetricsRegistry>,
    estimator: Arc<dyn SizeEstimator<V>>,
    config: CacheConfig,
    stopped: Arc<AtomicBool>,
    optimizer: Mutex<Option<JoinHandle<()>>>,
}

impl<V> std::fmt::Debug for CacheManager<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("tiers", &self.tiers.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<V> CacheManager<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn builder(config: CacheConfig) -> CacheManagerBuilder<V> {
        CacheManagerBuilder::new(config)
    }

    /// All three tiers on memory stores (for tests and examples).
    pub fn in_memory() -> Self {
        CacheManagerBuilder::new(CacheConfig::default())
            .local_store(Arc::new(MemoryStore::new()))
            .shared_store(Arc::new(MemoryStore::new()))
            .build()
            .unwrap_or_else(|_| unreachable!("default config validates"))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Active tier levels in probe order.
    pub fn active_levels(&self) -> Vec<TierLevel> {
        self.tiers.iter().map(|t| t.level()).collect()
    }

    /// Direct tier access, mainly for tests and diagnostics.
    pub fn tier(&self, level: TierLevel) -> Option<&Arc<StorageTier<V>>> {
        self.tiers.iter().find(|t| t.level() == level)
    }

    /// Register a cascade rule (pattern -> dependency prefixes).
    pub fn add_invalidation_rule(&self, pattern: &str, dependencies: Vec<String>) -> Result<()> {
        self.rules.add_rule(pattern, dependencies)
    }

    // -------------------------------------------------------------------------
    // get
    // -------------------------------------------------------------------------

    pub async fn get(&self, key: &str) -> Option<V> {
        self.get_with(key, &GetOptions::default()).await
    }

    /// Probe tiers fastest-first and return the first valid entry's value.
    ///
    /// Tier read failures degrade to a miss on that tier. A full
    /// cross-tier miss increments every active tier's miss counter.
    #[instrument(skip(self, opts), fields(key = %key))]
    pub async fn get_with(&self, key: &str, opts: &GetOptions) -> Option<V> {
        for tier in &self.tiers {
            if opts.skip_tiers.contains(&tier.level()) {
                continue;
            }
            match tier.get(key).await {
                Ok(Some(entry)) => {
                    if entry.is_expired() {
                        if let Err(e) = tier.delete(key).await {
                            debug!(tier = %tier.level(), error = %e, "expired entry removal failed");
                        }
                        if let Some(m) = self.metrics.tier(tier.level()) {
                            m.record_expirations(1);
                        }
                        continue;
                    }

                    if opts.update_access_stats {
                        entry.record_access();
                        // Persist the bump to the originating tier
                        if let Err(e) = tier.set(entry.clone()).await {
                            warn!(tier = %tier.level(), error = %e, "access stat write-back failed");
                        }
                    }

                    if let Some(m) = self.metrics.tier(tier.level()) {
                        m.record_hit();
                    }

                    self.maybe_promote(tier, &entry).await;
                    return Some(entry.into_data());
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(tier = %tier.level(), error = %e, "tier read failed, treating as miss");
                }
            }
        }

        // Full cross-tier miss: every active tier records it
        for level in self.metrics.levels() {
            if let Some(m) = self.metrics.tier(level) {
                m.record_miss();
            }
        }
        None
    }

    /// Copy a hot entry into the ephemeral tier, leaving the source
    /// untouched. Only fires for hits served below the ephemeral tier.
    async fn maybe_promote(&self, source: &Arc<StorageTier<V>>, entry: &CacheEntry<V>) {
        if source.level() == TierLevel::Ephemeral
            || entry.access_count() <= PROMOTION_ACCESS_THRESHOLD
        {
            return;
        }

        let ephemeral = &self.tiers[0];
        match ephemeral.set(entry.clone()).await {
            Ok(()) => {
                if let Some(m) = self.metrics.tier(source.level()) {
                    m.record_promotion();
                }
                debug!(key = %entry.key(), from = %source.level(), "promoted to ephemeral");
            }
            Err(e) => {
                warn!(key = %entry.key(), error = %e, "promotion write failed");
            }
        }
    }

    // -------------------------------------------------------------------------
    // set
    // -------------------------------------------------------------------------

    pub async fn set(&self, key: &str, data: V) -> Result<()> {
        self.set_with(key, data, SetOptions::default()).await
    }

    /// Build a fresh entry and write it to the selected tiers
    /// independently: one tier failing never aborts the others.
    #[instrument(skip(self, data, opts), fields(key = %key))]
    pub async fn set_with(&self, key: &str, data: V, opts: SetOptions) -> Result<()> {
        if let Some(ttl) = opts.ttl {
            if ttl.is_zero() {
                return Err(Error::Config("entry ttl must be > 0".into()));
            }
        }

        let size = self
            .estimator
            .estimate(&data)
            .unwrap_or(FALLBACK_ENTRY_SIZE);

        // Informational version: continue the ephemeral-resident count
        let version = match self.tiers[0].get(key).await {
            Ok(Some(prev)) => prev.version().wrapping_add(1),
            _ => 1,
        };

        let base = CacheEntry::new(key, data, self.config.default_ttl, size)
            .with_tags(opts.tags.clone())
            .with_priority(opts.priority)
            .with_dependencies(opts.dependencies.clone())
            .with_version(version);

        for tier in self.select_tiers(opts.priority, opts.target_tiers.as_deref()) {
            let ttl = opts.ttl.unwrap_or(tier.config().default_ttl);
            match tier.write(base.clone().with_ttl(ttl)).await {
                Ok(()) => match tier.enforce_capacity().await {
                    Ok(evicted) if evicted > 0 => {
                        if let Some(m) = self.metrics.tier(tier.level()) {
                            m.record_evictions(evicted);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(tier = %tier.level(), error = %e, "capacity enforcement failed");
                    }
                },
                Err(e) => {
                    // Quota retry already happened inside write()
                    warn!(tier = %tier.level(), error = %e, "tier write abandoned");
                }
            }
        }

        Ok(())
    }

    /// Priority-driven placement: Ephemeral always, Local unless low
    /// priority, Shared only for high/critical. Explicit targets win.
    fn select_tiers(
        &self,
        priority: Priority,
        explicit: Option<&[TierLevel]>,
    ) -> Vec<Arc<StorageTier<V>>> {
        self.tiers
            .iter()
            .filter(|tier| match explicit {
                Some(levels) => levels.contains(&tier.level()),
                None => match tier.level() {
                    TierLevel::Ephemeral => true,
                    TierLevel::Local => priority > Priority::Low,
                    TierLevel::Shared => priority >= Priority::High,
                },
            })
            .cloned()
            .collect()
    }

    // -------------------------------------------------------------------------
    // invalidate
    // -------------------------------------------------------------------------

    pub async fn invalidate(&self, target: InvalidationTarget) -> Result<u64> {
        self.invalidate_with(target, InvalidateOptions::default())
            .await
    }

    /// Remove every entry matching the target (exact, pattern, or tags),
    /// cascading through registered rules and declared dependencies when
    /// enabled. Idempotent: absent keys are a no-op. Returns the number
    /// of entries deleted across tiers.
    #[instrument(skip(self, opts))]
    pub async fn invalidate_with(
        &self,
        target: InvalidationTarget,
        opts: InvalidateOptions,
    ) -> Result<u64> {
        let target_tiers: Vec<Arc<StorageTier<V>>> = self
            .tiers
            .iter()
            .filter(|tier| match &opts.target_tiers {
                Some(levels) => levels.contains(&tier.level()),
                None => true,
            })
            .cloned()
            .collect();

        // Phase 1: direct matches in target tiers
        let mut doomed: Vec<String> = Vec::new();
        for tier in &target_tiers {
            let entries = match tier.entries().await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(tier = %tier.level(), error = %e, "invalidation scan failed");
                    continue;
                }
            };
            for entry in entries {
                if target.matches(entry.key()) || entry.matches_any_tag(&opts.by_tags) {
                    if !doomed.contains(&entry.key().to_string()) {
                        doomed.push(entry.key().to_string());
                    }
                }
            }
        }

        // Phase 2: cascade through rules and dependency declarations
        if opts.cascade && !doomed.is_empty() {
            let prefixes = self.rules.dependency_prefixes_for(&doomed);
            let mut cascaded: Vec<String> = Vec::new();
            for tier in &self.tiers {
                let entries = match tier.entries().await {
                    Ok(entries) => entries,
                    Err(e) => {
                        warn!(tier = %tier.level(), error = %e, "cascade scan failed");
                        continue;
                    }
                };
                for entry in entries {
                    let key = entry.key();
                    let by_rule = prefixes.iter().any(|p| key.starts_with(p.as_str()));
                    let by_declaration = doomed.iter().any(|k| entry.depends_on(k));
                    if (by_rule || by_declaration)
                        && !doomed.contains(&key.to_string())
                        && !cascaded.contains(&key.to_string())
                    {
                        cascaded.push(key.to_string());
                    }
                }
            }
            doomed.extend(cascaded);
        }

        // Phase 3: delete the union from every target tier
        let mut removed = 0u64;
        for key in &doomed {
            for tier in &target_tiers {
                match tier.delete(key).await {
                    Ok(true) => removed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!(tier = %tier.level(), key = %key, error = %e, "invalidation delete failed");
                    }
                }
            }
        }

        debug!(keys = doomed.len(), removed, "invalidation complete");
        Ok(removed)
    }

    // -------------------------------------------------------------------------
    // prefetch
    // -------------------------------------------------------------------------

    pub async fn prefetch<F, Fut>(self: Arc<Self>, keys: Vec<String>, loader: F)
    where
        F: Fn(String) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        self.prefetch_with(keys, loader, PrefetchOptions::default())
            .await
    }

    /// Load and cache every key not already validly cached, tagged
    /// `"prefetched"`. Loader concurrency is bounded by a slot pool; a
    /// failing loader is logged and skipped. Returns once every key has
    /// settled.
    #[instrument(skip(self, keys, loader, opts), fields(keys = keys.len()))]
    pub async fn prefetch_with<F, Fut>(
        self: Arc<Self>,
        keys: Vec<String>,
        loader: F,
        opts: PrefetchOptions,
    ) where
        F: Fn(String) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        if !self.config.enable_prefetch {
            debug!("prefetch disabled by configuration");
            return;
        }

        let slots = Arc::new(Semaphore::new(opts.max_concurrent.max(1)));
        let mut handles = Vec::new();

        for key in keys {
            if self.peek_valid(&key).await {
                continue;
            }

            let manager = Arc::clone(&self);
            let slots = Arc::clone(&slots);
            let loader = loader.clone();
            let priority = opts.priority;
            let ttl = opts.ttl;

            // Detached: a caller that stops awaiting the batch does not
            // abort loaders already in flight
            handles.push(tokio::spawn(async move {
                let Ok(_permit) = slots.acquire().await else {
                    return;
                };
                match loader(key.clone()).await {
                    Ok(value) => {
                        let set_opts = SetOptions {
                            ttl,
                            priority,
                            tags: vec!["prefetched".to_string()],
                            ..SetOptions::default()
                        };
                        if let Err(e) = manager.set_with(&key, value, set_opts).await {
                            warn!(key = %key, error = %e, "prefetch store failed");
                        }
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "prefetch loader failed, skipping");
                    }
                }
            }));
        }

        // Settle the whole batch, success or failure
        let _ = join_all(handles).await;
    }

    /// Quiet validity probe: no stat bumps, no metric counts.
    async fn peek_valid(&self, key: &str) -> bool {
        for tier in &self.tiers {
            if let Ok(Some(entry)) = tier.get(key).await {
                if entry.is_valid() {
                    return true;
                }
            }
        }
        false
    }

    // -------------------------------------------------------------------------
    // optimize
    // -------------------------------------------------------------------------

    /// One self-tuning pass: sweep expired entries, pull over-watermark
    /// tiers back down, promote hot entries into the ephemeral tier, and
    /// refresh the size gauges. Runs on the background interval and on
    /// demand.
    #[instrument(skip(self))]
    pub async fn optimize(&self) {
        // 1. expired sweep
        for tier in &self.tiers {
            match tier.sweep_expired().await {
                Ok(0) => {}
                Ok(removed) => {
                    if let Some(m) = self.metrics.tier(tier.level()) {
                        m.record_expirations(removed);
                    }
                }
                Err(e) => {
                    warn!(tier = %tier.level(), error = %e, "expired sweep failed");
                }
            }
        }

        // 2. watermark eviction: above 80% of capacity, drain to 70%
        for tier in &self.tiers {
            let used = match tier.used_bytes().await {
                Ok(used) => used,
                Err(e) => {
                    warn!(tier = %tier.level(), error = %e, "size probe failed");
                    continue;
                }
            };
            let max = tier.config().max_size;
            if (used as f64) > (max as f64) * OPTIMIZE_HIGH_WATERMARK {
                let floor = ((max as f64) * OPTIMIZE_LOW_WATERMARK) as u64;
                match tier.evict_bytes(used.saturating_sub(floor)).await {
                    Ok((evicted, _)) if evicted > 0 => {
                        if let Some(m) = self.metrics.tier(tier.level()) {
                            m.record_evictions(evicted);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(tier = %tier.level(), error = %e, "watermark eviction failed");
                    }
                }
            }
        }

        // 3. promote hot entries from slower tiers
        let ephemeral = &self.tiers[0];
        for tier in &self.tiers[1..] {
            let entries = match tier.entries().await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(tier = %tier.level(), error = %e, "promotion scan failed");
                    continue;
                }
            };
            for entry in entries {
                if !entry.is_valid() || entry.access_count() <= PROMOTION_ACCESS_THRESHOLD {
                    continue;
                }
                // Entries already resident up top keep their own counters
                if let Ok(Some(_)) = ephemeral.get(entry.key()).await {
                    continue;
                }
                match ephemeral.set(entry.clone()).await {
                    Ok(()) => {
                        if let Some(m) = self.metrics.tier(tier.level()) {
                            m.record_promotion();
                        }
                    }
                    Err(e) => {
                        warn!(key = %entry.key(), error = %e, "optimize promotion failed");
                    }
                }
            }
        }

        // 4. refresh gauges
        self.refresh_gauges().await;
    }

    async fn refresh_gauges(&self) {
        for tier in &self.tiers {
            let used = tier.used_bytes().await.unwrap_or(0);
            let entries = tier.entry_count().await.unwrap_or(0);
            if let Some(m) = self.metrics.tier(tier.level()) {
                m.set_gauges(used, entries);
            }
        }
    }

    /// Spawn the periodic optimize task. Idempotent in effect: spawning
    /// again replaces the previous task's handle (the old one exits at
    /// its next tick once the flag trips on shutdown).
    pub fn spawn_optimizer(self: Arc<Self>) {
        let manager = Arc::clone(&self);
        let period = self.config.optimization_interval;
        let handle = tokio::spawn(async move {
            let mut tick = interval(period);
            tick.tick().await; // immediate first tick is not a full period
            loop {
                tick.tick().await;
                if manager.stopped.load(Ordering::Relaxed) {
                    break;
                }
                manager.optimize().await;
            }
        });
        *self.optimizer.lock() = Some(handle);
    }

    // -------------------------------------------------------------------------
    // reporting / lifecycle
    // -------------------------------------------------------------------------

    /// Assemble the aggregate health report.
    pub async fn performance_report(&self) -> PerformanceReport {
        self.refresh_gauges().await;

        let mut tiers = Vec::with_capacity(self.tiers.len());
        let mut total_used = 0u64;
        let mut total_capacity = 0u64;
        let mut top_keys: Vec<KeyAccessReport> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for tier in &self.tiers {
            let level = tier.level();
            let capacity = self.config.tier_config(level).max_size;
            let snap = self
                .metrics
                .tier(level)
                .map(|m| m.snapshot())
                .unwrap_or_else(|| MetricsRegistry::new(&[level]).snapshot()[0].1.clone());

            total_used += snap.size_bytes;
            total_capacity += capacity;
            tiers.push(TierReport {
                tier: level.name().to_string(),
                hits: snap.hits,
                misses: snap.misses,
                hit_rate: snap.hit_rate,
                evictions: snap.evictions,
                expirations: snap.expirations,
                promotions: snap.promotions,
                entries: snap.entries,
                used_bytes: snap.size_bytes,
                capacity_bytes: capacity,
                utilization: snap.size_bytes as f64 / capacity as f64,
            });

            // Fastest tier wins the display slot for a key; its copy
            // carries the counters forward after promotion anyway
            if let Ok(entries) = tier.entries().await {
                for entry in entries {
                    if seen.insert(entry.key().to_string()) {
                        top_keys.push(KeyAccessReport {
                            key: entry.key().to_string(),
                            access_count: entry.access_count(),
                            tier: level.name().to_string(),
                        });
                    }
                }
            }
        }

        top_keys.sort_by(|a, b| {
            b.access_count
                .cmp(&a.access_count)
                .then_with(|| a.key.cmp(&b.key))
        });
        top_keys.truncate(TOP_KEYS_REPORTED);

        let aggregate_hit_rate = self.metrics.aggregate_hit_rate();
        let recommendations = self.recommendations(aggregate_hit_rate, &tiers);

        PerformanceReport {
            generated_at: Utc::now(),
            aggregate_hit_rate,
            tiers,
            top_keys,
            total_used_bytes: total_used,
            total_capacity_bytes: total_capacity,
            recommendations,
        }
    }

    fn recommendations(&self, aggregate_hit_rate: f64, tiers: &[TierReport]) -> Vec<String> {
        let mut out = Vec::new();
        let samples: u64 = tiers.iter().map(|t| t.hits + t.misses).sum();

        if samples >= RECOMMENDATION_MIN_SAMPLES && aggregate_hit_rate < LOW_HIT_RATE_THRESHOLD {
            out.push(format!(
                "Aggregate hit rate is {:.0}%; consider longer TTLs or prefetching hot keys",
                aggregate_hit_rate * 100.0
            ));
        }
        for tier in tiers {
            if tier.evictions >= HIGH_EVICTION_THRESHOLD {
                out.push(format!(
                    "Tier '{}' has evicted {} entries; consider raising its max_size",
                    tier.tier, tier.evictions
                ));
            }
            if tier.utilization > NEAR_CAPACITY_THRESHOLD {
                out.push(format!(
                    "Tier '{}' is at {:.0}% of capacity",
                    tier.tier,
                    tier.utilization * 100.0
                ));
            }
            if samples >= RECOMMENDATION_MIN_SAMPLES && tier.hits == 0 && tier.misses > 0 {
                out.push(format!(
                    "Tier '{}' has served no hits; review tier selection",
                    tier.tier
                ));
            }
        }
        out
    }

    /// Wipe every tier and reset all metrics.
    pub async fn clear(&self) {
        let results = join_all(self.tiers.iter().map(|tier| tier.clear())).await;
        for (tier, result) in self.tiers.iter().zip(results) {
            if let Err(e) = result {
                warn!(tier = %tier.level(), error = %e, "clear failed");
            }
        }
        self.metrics.reset();
    }

    /// Stop the periodic task, run one final optimize pass, and release
    /// the background resources.
    pub async fn shutdown(&self) {
        self.stopped.store(true, Ordering::Relaxed);
        if let Some(handle) = self.optimizer.lock().take() {
            handle.abort();
        }
        self.optimize().await;
        info!("cache manager shut down");
    }
}

// =============================================================================
// Tests
// =============================================================================
