//! Snapshot dictionary configuration.

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_COLLECT_MIN_GEN_DELTA;
use crate::error::{CacheError, CacheResult};

/// Snapshot dictionary configuration.
///
/// # Example
///
/// ```rust
/// use pubcache_common::config::SnapDictionaryConfig;
///
/// let config = SnapDictionaryConfig::default();
/// assert!(config.collect_auto);
/// assert_eq!(config.collect_min_gen_delta, 8);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapDictionaryConfig {
    /// Schedule a background collection after snapshot creation, snapshot
    /// disposal and write-lock release.
    /// Default: true
    pub collect_auto: bool,

    /// How far the live generation must run ahead of the floor generation
    /// before an automatic collection is scheduled.
    /// Default: 8
    pub collect_min_gen_delta: u64,
}

impl Default for SnapDictionaryConfig {
    fn default() -> Self {
        Self {
            collect_auto: true,
            collect_min_gen_delta: DEFAULT_COLLECT_MIN_GEN_DELTA,
        }
    }
}

impl SnapDictionaryConfig {
    /// Creates a configuration for testing.
    ///
    /// Automatic collection is off so tests drive `collect()` themselves.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            collect_auto: false,
            ..Default::default()
        }
    }

    /// Sets automatic collection.
    #[must_use]
    pub fn with_collect_auto(mut self, collect_auto: bool) -> Self {
        self.collect_auto = collect_auto;
        self
    }

    /// Sets the generation delta that triggers automatic collection.
    #[must_use]
    pub fn with_collect_min_gen_delta(mut self, delta: u64) -> Self {
        self.collect_min_gen_delta = delta;
        self
    }

    /// Parses a configuration from JSON and validates it.
    ///
    /// Missing fields take their default value.
    pub fn from_json(json: &str) -> CacheResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CacheError::invalid_config(format!("malformed json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> CacheResult<()> {
        if self.collect_min_gen_delta == 0 {
            return Err(CacheError::invalid_config(
                "collect_min_gen_delta must be at least 1",
            ));
        }

        Ok(())
    }
}
