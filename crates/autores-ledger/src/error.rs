//! Error types for the audit ledger

/// Ledger errors
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The backing store refused the write
    #[error("audit write failed: {0}")]
    WriteFailed(String),

    /// IO error on a file-backed ledger
    #[error("ledger io error: {0}")]
    Io(#[from] std::io::Error),

    /// Entry could not be encoded or decoded
    #[error("ledger serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Hash chain broken
    #[error("integrity violation at sequence {sequence}")]
    IntegrityViolation { sequence: u64 },

    /// Persisted record could not be read back
    #[error("corrupt ledger record at line {line}: {message}")]
    CorruptRecord { line: usize, message: String },

    /// Filter is self-contradictory
    #[error("invalid audit filter: {0}")]
    InvalidFilter(String),
}

impl LedgerError {
    /// Whether this error means an entry was not recorded
    #[inline]
    #[must_use]
    pub fn is_write_failure(&self) -> bool {
        matches!(self, Self::WriteFailed(_) | Self::Io(_) | Self::Serialization(_))
    }

    /// Whether the ledger contents can no longer be trusted
    #[inline]
    #[must_use]
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Self::IntegrityViolation { .. } | Self::CorruptRecord { .. }
        )
    }
}
