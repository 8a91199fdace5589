//! Error types for configuration

use autores_ledger::LedgerError;
use std::path::PathBuf;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Values failed validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed category key
    #[error("invalid category: '{0}'")]
    InvalidCategory(String),

    /// Category has no configuration entry
    #[error("unknown category: '{0}'")]
    UnknownCategory(String),

    /// Kill-switch activation without a reason
    #[error("a reason is required to activate the kill switch")]
    ReasonRequired,

    /// Change could not be audited, so it was not applied
    #[error("audit write failed: {0}")]
    AuditWriteFailed(#[from] LedgerError),

    /// Settings file could not be read
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Settings file is not valid TOML for [`crate::Settings`]
    #[error("settings parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Value could not be captured for the audit trail
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ConfigError {
    /// Create validation error
    #[inline]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}
