//! Configuration values
//!
//! - [`GlobalConfig`]: kill switch, default threshold, concurrency cap
//! - [`CategoryConfig`]: per-category policy
//! - Partial patches used by the update operations
//! - [`ConfigSnapshot`]: one consistent point-in-time view of all of it

use crate::category::Category;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default confidence threshold
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.90;

/// Default cap on in-flight resolutions
pub const DEFAULT_MAX_CONCURRENT: usize = 10;

/// Default retries after the first execution try
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Upper bound on configured retries
pub const MAX_RETRY_LIMIT: u32 = 10;

fn validate_threshold(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::invalid(format!(
            "{name} must be within [0, 1], got {value}"
        )))
    }
}

/// Process-wide settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// When set, no new resolution is admitted
    pub kill_switch_active: bool,
    /// Threshold for categories without an override
    pub default_confidence_threshold: f64,
    /// Cap on attempts running at once
    pub max_concurrent_resolutions: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            kill_switch_active: false,
            default_confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            max_concurrent_resolutions: DEFAULT_MAX_CONCURRENT,
        }
    }
}

impl GlobalConfig {
    /// Validate value ranges
    ///
    /// # Errors
    /// `ConfigError::InvalidConfig` describing the first bad field
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_threshold(
            "default_confidence_threshold",
            self.default_confidence_threshold,
        )?;
        if self.max_concurrent_resolutions == 0 {
            return Err(ConfigError::invalid(
                "max_concurrent_resolutions must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Partial update of [`GlobalConfig`]; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfigPatch {
    pub kill_switch_active: Option<bool>,
    pub default_confidence_threshold: Option<f64>,
    pub max_concurrent_resolutions: Option<usize>,
}

impl GlobalConfigPatch {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn kill_switch(mut self, active: bool) -> Self {
        self.kill_switch_active = Some(active);
        self
    }

    #[inline]
    #[must_use]
    pub fn threshold(mut self, threshold: f64) -> Self {
        self.default_confidence_threshold = Some(threshold);
        self
    }

    #[inline]
    #[must_use]
    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_resolutions = Some(max);
        self
    }

    /// Produce the patched value
    #[must_use]
    pub fn apply(&self, base: &GlobalConfig) -> GlobalConfig {
        GlobalConfig {
            kill_switch_active: self.kill_switch_active.unwrap_or(base.kill_switch_active),
            default_confidence_threshold: self
                .default_confidence_threshold
                .unwrap_or(base.default_confidence_threshold),
            max_concurrent_resolutions: self
                .max_concurrent_resolutions
                .unwrap_or(base.max_concurrent_resolutions),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// Per-category policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub category: Category,
    #[serde(default = "default_true")]
    pub auto_resolution_enabled: bool,
    /// Override of the global default; `None` inherits it
    #[serde(default)]
    pub confidence_threshold: Option<f64>,
    /// Retries after the first execution try
    #[serde(default = "default_retries")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_true")]
    pub notification_required: bool,
}

impl CategoryConfig {
    /// Defaults for a category: enabled, inherits the global threshold
    #[must_use]
    pub fn new(category: Category) -> Self {
        Self {
            category,
            auto_resolution_enabled: true,
            confidence_threshold: None,
            max_retry_attempts: DEFAULT_MAX_RETRIES,
            notification_required: true,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = Some(threshold);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.auto_resolution_enabled = enabled;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retry_attempts = retries;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_notification(mut self, required: bool) -> Self {
        self.notification_required = required;
        self
    }

    /// Category override if present, else the global default
    #[inline]
    #[must_use]
    pub fn effective_threshold(&self, global: &GlobalConfig) -> f64 {
        self.confidence_threshold
            .unwrap_or(global.default_confidence_threshold)
    }

    /// Validate value ranges
    ///
    /// # Errors
    /// `ConfigError::InvalidConfig` describing the first bad field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(threshold) = self.confidence_threshold {
            validate_threshold("confidence_threshold", threshold)?;
        }
        if self.max_retry_attempts > MAX_RETRY_LIMIT {
            return Err(ConfigError::invalid(format!(
                "max_retry_attempts must be at most {MAX_RETRY_LIMIT}, got {}",
                self.max_retry_attempts
            )));
        }
        Ok(())
    }
}

/// Partial update of [`CategoryConfig`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryConfigPatch {
    pub auto_resolution_enabled: Option<bool>,
    /// Set an override
    pub confidence_threshold: Option<f64>,
    /// Drop the override and inherit the global default
    pub inherit_threshold: bool,
    pub max_retry_attempts: Option<u32>,
    pub notification_required: Option<bool>,
}

impl CategoryConfigPatch {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.auto_resolution_enabled = Some(enabled);
        self
    }

    #[inline]
    #[must_use]
    pub fn threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = Some(threshold);
        self.inherit_threshold = false;
        self
    }

    #[inline]
    #[must_use]
    pub fn inherit_threshold(mut self) -> Self {
        self.confidence_threshold = None;
        self.inherit_threshold = true;
        self
    }

    #[inline]
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retry_attempts = Some(retries);
        self
    }

    #[inline]
    #[must_use]
    pub fn notification(mut self, required: bool) -> Self {
        self.notification_required = Some(required);
        self
    }

    /// Produce the patched value
    #[must_use]
    pub fn apply(&self, base: &CategoryConfig) -> CategoryConfig {
        let confidence_threshold = if self.inherit_threshold {
            None
        } else {
            self.confidence_threshold.or(base.confidence_threshold)
        };
        CategoryConfig {
            category: base.category.clone(),
            auto_resolution_enabled: self
                .auto_resolution_enabled
                .unwrap_or(base.auto_resolution_enabled),
            confidence_threshold,
            max_retry_attempts: self.max_retry_attempts.unwrap_or(base.max_retry_attempts),
            notification_required: self
                .notification_required
                .unwrap_or(base.notification_required),
        }
    }
}

/// Immutable point-in-time view of all configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// Incremented on every published change
    pub version: u64,
    pub global: GlobalConfig,
    pub categories: BTreeMap<Category, CategoryConfig>,
}

impl ConfigSnapshot {
    /// Snapshot with defaults for every built-in category
    #[must_use]
    pub fn defaults() -> Self {
        let categories = Category::built_in()
            .into_iter()
            .map(|c| (c.clone(), CategoryConfig::new(c)))
            .collect();
        Self {
            version: 0,
            global: GlobalConfig::default(),
            categories,
        }
    }

    #[inline]
    #[must_use]
    pub fn category(&self, category: &Category) -> Option<&CategoryConfig> {
        self.categories.get(category)
    }

    /// Threshold actually applied to a category, if it is registered
    #[must_use]
    pub fn effective_threshold(&self, category: &Category) -> Option<f64> {
        self.category(category)
            .map(|c| c.effective_threshold(&self.global))
    }

    /// Validate every value in the snapshot
    ///
    /// # Errors
    /// The first validation failure
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.global.validate()?;
        for config in self.categories.values() {
            config.validate()?;
        }
        Ok(())
    }
}
