//! stratacache - Multi-Tier Client-Side Cache
//!
//! Stores previously-fetched or computed values across storage tiers of
//! differing speed, durability, and capacity, and autonomously decides
//! what to keep, promote, evict, or invalidate.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           Cache Manager                              │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  Ephemeral            │ Local                │ Shared                │
//! │  ┌────────────────┐   │ ┌────────────────┐   │ ┌────────────────┐   │
//! │  │ MemoryStore    │   │ │ QuotaStore     │   │ │ Probed backend │   │
//! │  │ volatile, fast │   │ │ durable, quota │   │ │ largest, slow  │   │
//! │  └────────────────┘   │ └────────────────┘   │ └────────────────┘   │
//! │         │             │         │            │          │           │
//! │         └─────────────┴─────────┴────────────┴──────────┘           │
//! │                              │                                      │
//! │        Promotion / Eviction / Cascading Invalidation Engine         │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Design Principles
//!
//! - Consumers hold a [`CacheManager`] and nothing else; tiers are internal
//! - A tier fault is never a caller fault: reads degrade to misses, writes
//!   to the remaining tiers still land
//! - Tier sizes are recomputed from resident entries, never counted
//! - The value type is opaque: sizing goes through a pluggable
//!   [`SizeEstimator`]
//!
//! # Modules
//!
//! - [`entry`] - cache entry, priority, size estimation
//! - [`error`] - error taxonomy
//! - [`invalidation`] - targets, patterns, cascade rules
//! - [`manager`] - the orchestrating cache manager
//! - [`metrics`] - per-tier counters and report types
//! - [`policy`] - eviction policies
//! - [`store`] - keyed store backends
//! - [`tier`] - storage tier wrapper

pub mod entry;
pub mod error;
pub mod invalidation;
pub mod manager;
pub mod metrics;
pub mod policy;
pub mod store;
pub mod tier;

// Re-export commonly used types
pub use entry::{
    BytesEstimator, CacheEntry, FallbackEstimator, JsonEstimator, Priority, SizeEstimator,
};
pub use error::{Error, Result};
pub use invalidation::{InvalidationRuleEngine, InvalidationTarget, KeyPattern};
pub use manager::{
    CacheConfig, CacheManager, CacheManagerBuilder, GetOptions, InvalidateOptions,
    PrefetchOptions, SetOptions,
};
pub use metrics::{MetricsRegistry, PerformanceReport, TierReport};
pub use policy::EvictionPolicy;
pub use store::{MemoryStore, QuotaStore, StoreBackend};
pub use tier::{StorageTier, TierConfig, TierLevel};

/// Hits beyond this count pull an entry into the ephemeral tier.
pub const PROMOTION_ACCESS_THRESHOLD: u32 = 5;

/// Utilization that triggers the optimize pass's eviction step.
pub const OPTIMIZE_HIGH_WATERMARK: f64 = 0.80;

/// Utilization the optimize pass drains an over-full tier down to.
pub const OPTIMIZE_LOW_WATERMARK: f64 = 0.70;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watermarks_are_ordered() {
        assert!(OPTIMIZE_LOW_WATERMARK < OPTIMIZE_HIGH_WATERMARK);
        assert!(OPTIMIZE_HIGH_WATERMARK < 1.0);
    }

    #[test]
    fn test_promotion_threshold() {
        assert_eq!(PROMOTION_ACCESS_THRESHOLD, 5);
    }
}
