//! Cache Metrics Collection
//!
//! Per-tier hit/miss/size/eviction counters plus the report types the
//! manager assembles for consumers.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::tier::TierLevel;

/// Counters for a single tier.
///
/// Hit/miss/eviction counts are cumulative; size and entry counts are
/// gauges refreshed by the optimize pass.
#[derive(Debug, Default)]
pub struct TierMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    promotions: AtomicU64,
    size_bytes: AtomicU64,
    entries: AtomicU64,
}

impl TierMetrics {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_gauges(&self, size_bytes: u64, entries: u64) {
        self.size_bytes.store(size_bytes, Ordering::Relaxed);
        self.entries.store(entries, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    pub fn snapshot(&self) -> TierMetricsSnapshot {
        TierMetricsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            hit_rate: self.hit_rate(),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            size_bytes: self.size_bytes.load(Ordering::Relaxed),
            entries: self.entries.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.expirations.store(0, Ordering::Relaxed);
        self.promotions.store(0, Ordering::Relaxed);
        self.size_bytes.store(0, Ordering::Relaxed);
        self.entries.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time copy of one tier's counters.
#[derive(Debug, Clone, Serialize)]
pub struct TierMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub expirations: u64,
    pub promotions: u64,
    pub size_bytes: u64,
    pub entries: u64,
}

/// Registry holding one counter block per active tier.
#[derive(Debug)]
pub struct MetricsRegistry {
    tiers: Vec<(TierLevel, TierMetrics)>,
}

impl MetricsRegistry {
    /// Build with one counter block per active tier, in probe order.
    pub fn new(levels: &[TierLevel]) -> Self {
        Self {
            tiers: levels
                .iter()
                .map(|level| (*level, TierMetrics::default()))
                .collect(),
        }
    }

    pub fn tier(&self, level: TierLevel) -> Option<&TierMetrics> {
        self.tiers
            .iter()
            .find(|(l, _)| *l == level)
            .map(|(_, m)| m)
    }

    pub fn levels(&self) -> Vec<TierLevel> {
        self.tiers.iter().map(|(l, _)| *l).collect()
    }

    /// `Σhits / Σ(hits + misses)` across every active tier.
    pub fn aggregate_hit_rate(&self) -> f64 {
        let mut hits = 0u64;
        let mut total = 0u64;
        for (_, m) in &self.tiers {
            hits += m.hits();
            total += m.hits() + m.misses();
        }
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn snapshot(&self) -> Vec<(TierLevel, TierMetricsSnapshot)> {
        self.tiers
            .iter()
            .map(|(level, m)| (*level, m.snapshot()))
            .collect()
    }

    pub fn reset(&self) {
        for (_, m) in &self.tiers {
            m.reset();
        }
    }
}

/// Per-tier block of the performance report.
#[derive(Debug, Clone, Serialize)]
pub struct TierReport {
    pub tier: String,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub expirations: u64,
    pub promotions: u64,
    pub entries: u64,
    pub used_bytes: u64,
    pub capacity_bytes: u64,
    /// used / capacity, 0.0 - 1.0
    pub utilization: f64,
}

/// One row of the top-keys table.
#[derive(Debug, Clone, Serialize)]
pub struct KeyAccessReport {
    pub key: String,
    pub access_count: u32,
    /// Fastest tier the key currently resides in
    pub tier: String,
}

/// Aggregate health report assembled by `CacheManager::performance_report`.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub generated_at: DateTime<Utc>,
    pub aggregate_hit_rate: f64,
    pub tiers: Vec<TierReport>,
    pub top_keys: Vec<KeyAccessReport>,
    pub total_used_bytes: u64,
    pub total_capacity_bytes: u64,
    pub recommendations: Vec<String>,
}

// =============================================================================
// Tests
// =============================================================================
