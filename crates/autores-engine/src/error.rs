//! Error types for the resolution engine
//!
//! Covers:
//! - Slot limiter misuse and capacity timeouts
//! - Notification delivery failures
//! - Engine construction and audit passthrough failures

use autores_config::ConfigError;
use autores_ledger::LedgerError;
use std::time::Duration;

/// Main engine error type
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration layer refused or failed
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Audit ledger failed
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl EngineError {
    /// Check if the caller may retry the same call later
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Ledger(e) => e.is_write_failure(),
            Self::Config(ConfigError::AuditWriteFailed(_)) => true,
            _ => false,
        }
    }
}

/// Slot limiter errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimiterError {
    /// No slot freed up within the wait budget
    #[error("no resolution slot free within {waited:?} (capacity {capacity})")]
    CapacityExceeded { capacity: usize, waited: Duration },

    /// Token was already returned
    #[error("slot token {0} already released")]
    AlreadyReleased(u64),

    /// Token was issued by another limiter
    #[error("slot token {0} was issued by a different limiter")]
    ForeignToken(u64),
}

impl LimiterError {
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }
}

/// Notification delivery errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    /// Gateway refused or failed the delivery
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),

    /// Gateway did not answer in time
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    /// Outbound queue was full
    #[error("notification queue full")]
    QueueFull,

    /// Dispatcher is shut down
    #[error("notification dispatcher closed")]
    Closed,
}
