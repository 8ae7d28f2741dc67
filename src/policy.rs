//! Eviction Policies
//!
//! Each tier declares one policy; when capacity must be reclaimed the
//! policy decides which resident entries go first. Ordering is total and
//! deterministic: entries with an identical ranking key fall back to
//! lexicographic key order.

use serde::{Deserialize, Serialize};

use crate::entry::{CacheEntry, Priority};

/// Per-tier eviction policy.
///
/// | Policy   | Removed first                     |
/// |----------|-----------------------------------|
/// | Lru      | oldest last access                |
/// | Lfu      | lowest access count               |
/// | Ttl      | soonest expiry                    |
/// | Priority | lowest declared priority          |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    #[default]
    Lru,
    Lfu,
    Ttl,
    Priority,
}

impl std::fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvictionPolicy::Lru => write!(f, "LRU"),
            EvictionPolicy::Lfu => write!(f, "LFU"),
            EvictionPolicy::Ttl => write!(f, "TTL"),
            EvictionPolicy::Priority => write!(f, "Priority"),
        }
    }
}

/// Snapshot of the entry fields eviction ranks on.
///
/// Candidates are collected by walking a tier's live entries, so a
/// concurrent write simply shows up (or not) in the next walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionCandidate {
    pub key: String,
    pub size: u64,
    pub last_accessed_ms: u64,
    pub access_count: u32,
    pub expires_at_ms: u64,
    pub priority: Priority,
}

impl EvictionCandidate {
    pub fn from_entry<V>(entry: &CacheEntry<V>) -> Self {
        Self {
            key: entry.key().to_string(),
            size: entry.size(),
            last_accessed_ms: entry.last_accessed_ms(),
            access_count: entry.access_count(),
            expires_at_ms: entry.expires_at_ms(),
            priority: entry.priority(),
        }
    }
}

impl EvictionPolicy {
    /// Sort candidates so the first element is the first to evict.
    pub fn sort(&self, candidates: &mut [EvictionCandidate]) {
        match self {
            EvictionPolicy::Lru => {
                candidates.sort_by(|a, b| {
                    (a.last_accessed_ms, &a.key).cmp(&(b.last_accessed_ms, &b.key))
                });
            }
            EvictionPolicy::Lfu => {
                candidates.sort_by(|a, b| (a.access_count, &a.key).cmp(&(b.access_count, &b.key)));
            }
            EvictionPolicy::Ttl => {
                candidates
                    .sort_by(|a, b| (a.expires_at_ms, &a.key).cmp(&(b.expires_at_ms, &b.key)));
            }
            EvictionPolicy::Priority => {
                candidates.sort_by(|a, b| (a.priority, &a.key).cmp(&(b.priority, &b.key)));
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
