//! Error types for the cache core

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the cache core.
///
/// The first four variants are recovered inside the cache: a failing tier
/// degrades to a miss or a skipped write and the caller never sees them.
/// Only programmer errors (`InvalidPattern`, `Config`) cross the public API.
#[derive(Error, Debug)]
pub enum Error {
    /// Platform capability for a tier is absent at construction
    #[error("Tier unavailable: {tier}")]
    TierUnavailable { tier: String },

    /// A single get/set/delete call against a tier backend failed
    #[error("Storage operation '{op}' failed on tier {tier}: {reason}")]
    StorageOperationFailed {
        tier: String,
        op: String,
        reason: String,
    },

    /// Durable-tier write refused on capacity
    #[error("Quota exceeded on tier {tier}: {requested} bytes requested")]
    QuotaExceeded { tier: String, requested: u64 },

    /// A stored entry failed to deserialize
    #[error("Corrupt entry for key: {key}")]
    CorruptEntry { key: String },

    /// Malformed invalidation pattern
    #[error("Invalid invalidation pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for faults the cache absorbs internally instead of surfacing.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::TierUnavailable { .. }
                | Error::StorageOperationFailed { .. }
                | Error::QuotaExceeded { .. }
                | Error::CorruptEntry { .. }
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
