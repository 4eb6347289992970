//! Flush planning configuration.

use ormflush_core::{ConfigError, Error};
use serde::{Deserialize, Serialize};

/// Default upper bound on ops per batch.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

/// Configuration for [`crate::FlushPlanner`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlushConfig {
    /// Whether lock-flagged bindings of UPDATE/DELETE ops qualify the WHERE clause.
    pub optimistic_locking: bool,
    /// Whether compatible consecutive ops are grouped into one batch.
    pub batching: bool,
    /// Maximum number of ops in one batch.
    pub max_batch_size: usize,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            optimistic_locking: true,
            batching: true,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

impl FlushConfig {
    /// Create new default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `optimistic_locking` option (builder pattern).
    #[must_use]
    pub fn optimistic_locking(mut self, value: bool) -> Self {
        self.optimistic_locking = value;
        self
    }

    /// Set the `batching` option (builder pattern).
    #[must_use]
    pub fn batching(mut self, value: bool) -> Self {
        self.batching = value;
        self
    }

    /// Set the `max_batch_size` option (builder pattern).
    #[must_use]
    pub fn max_batch_size(mut self, value: usize) -> Self {
        self.max_batch_size = value;
        self
    }

    /// Check option consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::new("max_batch_size must be at least 1"));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        tracing::debug!(
            optimistic_locking = config.optimistic_locking,
            batching = config.batching,
            max_batch_size = config.max_batch_size,
            "Loaded flush configuration"
        );
        Ok(config)
    }
}
