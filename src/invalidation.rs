//! Invalidation Targets and Cascade Rules
//!
//! Invalidation addresses entries three ways: an exact key, a compiled
//! key pattern, or tag membership. Rules registered with the
//! [`InvalidationRuleEngine`] extend any of those into a cascade: when an
//! invalidated key matches a rule's pattern, every key under the rule's
//! dependency prefixes is invalidated with it.

use parking_lot::RwLock;
use regex::Regex;

use crate::error::{Error, Result};

/// A validated key pattern.
///
/// Compilation is the only place a caller-supplied pattern is parsed;
/// a malformed pattern surfaces as [`Error::InvalidPattern`] before any
/// entry is touched.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    source: String,
    regex: Regex,
}

impl KeyPattern {
    pub fn compile(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|e| Error::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    #[inline]
    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl std::fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

/// What an invalidation call addresses.
#[derive(Debug, Clone)]
pub enum InvalidationTarget {
    /// Exactly this key
    Exact(String),
    /// Every key the pattern matches
    Pattern(KeyPattern),
}

impl InvalidationTarget {
    pub fn exact(key: impl Into<String>) -> Self {
        InvalidationTarget::Exact(key.into())
    }

    /// Compile `pattern`; malformed input is a programmer error.
    pub fn pattern(pattern: &str) -> Result<Self> {
        Ok(InvalidationTarget::Pattern(KeyPattern::compile(pattern)?))
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            InvalidationTarget::Exact(k) => k == key,
            InvalidationTarget::Pattern(p) => p.matches(key),
        }
    }
}

/// One cascade rule: keys matching `pattern` drag down every key under
/// the declared dependency prefixes.
#[derive(Debug, Clone)]
pub struct InvalidationRule {
    pattern: KeyPattern,
    dependencies: Vec<String>,
}

impl InvalidationRule {
    pub fn new(pattern: &str, dependencies: Vec<String>) -> Result<Self> {
        Ok(Self {
            pattern: KeyPattern::compile(pattern)?,
            dependencies,
        })
    }

    pub fn pattern(&self) -> &KeyPattern {
        &self.pattern
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

/// Registry of cascade rules, consulted by the manager during
/// invalidation. Rule registration is rare; lookups take a read lock.
#[derive(Debug, Default)]
pub struct InvalidationRuleEngine {
    rules: RwLock<Vec<InvalidationRule>>,
}

impl InvalidationRuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule; the pattern is validated here.
    pub fn add_rule(&self, pattern: &str, dependencies: Vec<String>) -> Result<()> {
        let rule = InvalidationRule::new(pattern, dependencies)?;
        self.rules.write().push(rule);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }

    pub fn clear(&self) {
        self.rules.write().clear();
    }

    /// Dependency prefixes declared by every rule whose pattern matches
    /// at least one of `keys`. Deduplicated.
    pub fn dependency_prefixes_for(&self, keys: &[String]) -> Vec<String> {
        let rules = self.rules.read();
        let mut prefixes: Vec<String> = Vec::new();

        for rule in rules.iter() {
            if keys.iter().any(|k| rule.pattern.matches(k)) {
                for dep in &rule.dependencies {
                    if !prefixes.contains(dep) {
                        prefixes.push(dep.clone());
                    }
                }
            }
        }

        prefixes
    }
}

// =============================================================================
// Tests
// =============================================================================
