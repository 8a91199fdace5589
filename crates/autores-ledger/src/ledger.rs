//! The ledger capability and its in-memory backend

use crate::entry::{verify_chain, AuditDraft, AuditEntry, GENESIS_HASH};
use crate::error::LedgerError;
use crate::query::{select, AuditFilter, AuditPage};
use chrono::Utc;
use parking_lot::Mutex;

/// Append-only, queryable audit log
///
/// Implementations assign sequence ids under their own serialization, so ids
/// are strictly increasing across all callers. Entries are never rewritten.
///
/// Methods are synchronous and are called from async code without
/// `spawn_blocking`, so implementations must return quickly.
pub trait AuditLedger: Send + Sync {
    /// Record an entry, returning its sequence id
    ///
    /// # Errors
    /// Any error means the entry was not recorded
    fn append(&self, draft: AuditDraft) -> Result<u64, LedgerError>;

    /// Fetch one page of matching entries in sequence order
    ///
    /// # Errors
    /// `LedgerError::InvalidFilter` for an inverted time range
    fn query(&self, filter: &AuditFilter) -> Result<AuditPage, LedgerError>;

    /// Recompute the hash chain
    ///
    /// # Errors
    /// `LedgerError::IntegrityViolation` at the first broken link
    fn verify_integrity(&self) -> Result<(), LedgerError>;

    /// Number of recorded entries
    fn len(&self) -> usize;

    /// Whether nothing has been recorded
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every matching entry, following cursors to the end
    ///
    /// # Errors
    /// Propagates query errors
    fn query_all(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, LedgerError> {
        let mut filter = filter.clone();
        let mut out = Vec::new();
        loop {
            let page = self.query(&filter)?;
            out.extend(page.entries);
            match page.next_cursor {
                Some(cursor) => filter.after_sequence = Some(cursor),
                None => return Ok(out),
            }
        }
    }
}

/// Sequence and hash bookkeeping shared by the backends
#[derive(Debug, Default)]
pub(crate) struct Chain {
    pub(crate) entries: Vec<AuditEntry>,
}

impl Chain {
    /// Build the next entry without recording it
    pub(crate) fn seal_next(&self, draft: AuditDraft) -> AuditEntry {
        let (sequence, prev_hash, floor) = match self.entries.last() {
            Some(last) => (last.sequence + 1, last.hash, Some(last.timestamp)),
            None => (1, GENESIS_HASH, None),
        };
        // wall clock may step back; keep timestamps non-decreasing with sequence
        let now = Utc::now();
        let timestamp = floor.map_or(now, |f| f.max(now));
        draft.seal(sequence, timestamp, prev_hash)
    }
}

/// Ledger held entirely in memory
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    inner: Mutex<Chain>,
}

impl InMemoryLedger {
    /// Create empty ledger
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every entry
    #[must_use]
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.inner.lock().entries.clone()
    }
}

impl AuditLedger for InMemoryLedger {
    fn append(&self, draft: AuditDraft) -> Result<u64, LedgerError> {
        let mut chain = self.inner.lock();
        let entry = chain.seal_next(draft);
        let sequence = entry.sequence;
        tracing::trace!(sequence, action = %entry.action, subject = %entry.subject, "audit entry appended");
        chain.entries.push(entry);
        Ok(sequence)
    }

    fn query(&self, filter: &AuditFilter) -> Result<AuditPage, LedgerError> {
        select(&self.inner.lock().entries, filter)
    }

    fn verify_integrity(&self) -> Result<(), LedgerError> {
        verify_chain(self.inner.lock().entries.iter())
    }

    fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}
