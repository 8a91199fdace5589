//! Settings file loading
//!
//! ```toml
//! [global]
//! default_confidence_threshold = 0.9
//! max_concurrent_resolutions = 4
//!
//! [[categories]]
//! category = "database"
//! confidence_threshold = 0.95
//!
//! [runtime]
//! capacity_wait_ms = 2000
//! ```

use crate::category::Category;
use crate::error::ConfigError;
use crate::types::{CategoryConfig, ConfigSnapshot, GlobalConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Engine timing and delivery knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Bounded wait for a concurrency slot
    pub capacity_wait_ms: u64,
    /// Timeout for a single executor run
    pub execution_timeout_ms: u64,
    /// Pause before retry N is `N * retry_backoff_ms`
    pub retry_backoff_ms: u64,
    /// Notify the creator when a resolution fails terminally
    pub notify_on_failure: bool,
    /// Pending notifications held before new ones are dropped
    pub notification_queue_capacity: usize,
    /// Bound on a single delivery
    pub notification_timeout_ms: u64,
    /// Prefix for reopen/rating links
    pub reopen_base_url: String,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            capacity_wait_ms: 3_000,
            execution_timeout_ms: 30_000,
            retry_backoff_ms: 100,
            notify_on_failure: false,
            notification_queue_capacity: 256,
            notification_timeout_ms: 2_000,
            reopen_base_url: "/incidents".to_string(),
        }
    }
}

impl RuntimeSettings {
    #[inline]
    #[must_use]
    pub fn capacity_wait(&self) -> Duration {
        Duration::from_millis(self.capacity_wait_ms)
    }

    #[inline]
    #[must_use]
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    /// Pause before the given retry (1-based)
    #[inline]
    #[must_use]
    pub fn retry_backoff(&self, retry: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(retry)))
    }

    #[inline]
    #[must_use]
    pub fn notification_timeout(&self) -> Duration {
        Duration::from_millis(self.notification_timeout_ms)
    }

    /// Validate value ranges
    ///
    /// # Errors
    /// `ConfigError::InvalidConfig` for a zero queue or zero execution timeout
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.notification_queue_capacity == 0 {
            return Err(ConfigError::invalid(
                "notification_queue_capacity must be greater than 0",
            ));
        }
        if self.execution_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "execution_timeout_ms must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Everything a deployment configures
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub global: GlobalConfig,
    /// Overrides of built-in category defaults, or onboarded categories
    pub categories: Vec<CategoryConfig>,
    pub runtime: RuntimeSettings,
}

impl Settings {
    /// Parse from TOML text
    ///
    /// # Errors
    /// `ConfigError::Parse` or any validation failure
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let settings: Self = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// `ConfigError::Io` if unreadable, otherwise as [`Settings::from_toml_str`]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_toml_str(&text)?;
        tracing::info!(path = %path.display(), categories = settings.categories.len(), "loaded settings");
        Ok(settings)
    }

    /// Validate everything, rejecting duplicate category entries
    ///
    /// # Errors
    /// The first validation failure
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.runtime.validate()?;
        let snapshot = self.initial_snapshot();
        snapshot.validate()?;
        let mut seen: Vec<&Category> = Vec::with_capacity(self.categories.len());
        for config in &self.categories {
            if seen.contains(&&config.category) {
                return Err(ConfigError::invalid(format!(
                    "category '{}' configured more than once",
                    config.category
                )));
            }
            seen.push(&config.category);
        }
        Ok(())
    }

    /// Built-in defaults overlaid with the configured categories
    #[must_use]
    pub fn initial_snapshot(&self) -> ConfigSnapshot {
        let mut snapshot = ConfigSnapshot::defaults();
        snapshot.global = self.global.clone();
        for config in &self.categories {
            snapshot
                .categories
                .insert(config.category.clone(), config.clone());
        }
        snapshot
    }
}
