//! Store Configuration
//!
//! Capacity and retention of the two resolution caches. Configuration is
//! loaded from environment variables with the production defaults.

use crate::ConfigError;
use std::time::Duration;

/// Default capacity of the table handle cache.
pub const DEFAULT_TABLE_CACHE_MAX_ENTRIES: usize = 10_000;
/// Default capacity of the scope handle cache.
pub const DEFAULT_SCOPE_CACHE_MAX_ENTRIES: usize = 1_000;
/// Default retention of a cached handle after it was loaded.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

// ============================================================================
// CACHE CONFIGURATION
// ============================================================================

/// Bounds for one resolution cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of handles kept.
    pub max_entries: usize,
    /// Entries are dropped this long after being loaded, used or not.
    pub entry_ttl: Duration,
}

impl CacheConfig {
    pub fn new(max_entries: usize, entry_ttl: Duration) -> Self {
        Self {
            max_entries,
            entry_ttl,
        }
    }

    /// Defaults for the table handle cache.
    pub fn tables() -> Self {
        Self::new(DEFAULT_TABLE_CACHE_MAX_ENTRIES, DEFAULT_CACHE_TTL)
    }

    /// Defaults for the scope handle cache.
    pub fn scopes() -> Self {
        Self::new(DEFAULT_SCOPE_CACHE_MAX_ENTRIES, DEFAULT_CACHE_TTL)
    }

    /// Set the max entries.
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    /// Set the entry TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl;
        self
    }

    /// Reject zero capacity or zero retention. `field` names the cache in errors.
    pub fn validate(&self, field: &str) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::InvalidValue {
                field: format!("{}.max_entries", field),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.entry_ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: format!("{}.entry_ttl", field),
                value: "0s".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// STORE CONFIGURATION
// ============================================================================

/// Configuration of the metadata store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub table_cache: CacheConfig,
    pub scope_cache: CacheConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            table_cache: CacheConfig::tables(),
            scope_cache: CacheConfig::scopes(),
        }
    }
}

impl StoreConfig {
    /// Create StoreConfig from environment variables.
    ///
    /// Environment variables:
    /// - `MERIDIAN_TABLE_CACHE_MAX_ENTRIES`: table handle cache capacity (default: 10000)
    /// - `MERIDIAN_SCOPE_CACHE_MAX_ENTRIES`: scope handle cache capacity (default: 1000)
    /// - `MERIDIAN_CACHE_TTL_SECS`: retention of both caches in seconds (default: 600)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unset variables keep defaults;
    /// set but unparseable ones are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(max) = parse_var::<usize, _>(&lookup, "MERIDIAN_TABLE_CACHE_MAX_ENTRIES")? {
            config.table_cache.max_entries = max;
        }
        if let Some(max) = parse_var::<usize, _>(&lookup, "MERIDIAN_SCOPE_CACHE_MAX_ENTRIES")? {
            config.scope_cache.max_entries = max;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "MERIDIAN_CACHE_TTL_SECS")? {
            let ttl = Duration::from_secs(secs);
            config.table_cache.entry_ttl = ttl;
            config.scope_cache.entry_ttl = ttl;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_table_cache(mut self, cache: CacheConfig) -> Self {
        self.table_cache = cache;
        self
    }

    pub fn with_scope_cache(mut self, cache: CacheConfig) -> Self {
        self.scope_cache = cache;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.table_cache.validate("table_cache")?;
        self.scope_cache.validate("scope_cache")
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                field: key.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}
