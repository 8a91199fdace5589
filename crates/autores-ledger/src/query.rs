//! Ledger queries and cursor pagination
//!
//! Results are always ordered by sequence id ascending. The cursor is the
//! sequence id of the last entry on a page, so paging stays stable while new
//! entries are appended behind it.

use crate::action::AuditActionKind;
use crate::entry::AuditEntry;
use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default page size
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Largest page a single query returns
pub const MAX_PAGE_SIZE: usize = 1000;

/// Query filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFilter {
    pub subject: Option<String>,
    pub kind: Option<AuditActionKind>,
    /// Inclusive lower bound
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    pub until: Option<DateTime<Utc>>,
    /// Only entries with a sequence id greater than this
    pub after_sequence: Option<u64>,
    pub limit: usize,
}

impl Default for AuditFilter {
    fn default() -> Self {
        Self {
            subject: None,
            kind: None,
            since: None,
            until: None,
            after_sequence: None,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

impl AuditFilter {
    /// Match everything, first page
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn kind(mut self, kind: AuditActionKind) -> Self {
        self.kind = Some(kind);
        self
    }

    #[inline]
    #[must_use]
    pub fn between(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    #[inline]
    #[must_use]
    pub fn after(mut self, sequence: u64) -> Self {
        self.after_sequence = Some(sequence);
        self
    }

    #[inline]
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Check the filter can match anything
    ///
    /// # Errors
    /// `LedgerError::InvalidFilter` if the time range is inverted
    pub fn validate(&self) -> Result<(), LedgerError> {
        if let (Some(since), Some(until)) = (self.since, self.until) {
            if since > until {
                return Err(LedgerError::InvalidFilter(format!(
                    "time range start {since} is after end {until}"
                )));
            }
        }
        Ok(())
    }

    /// Whether an entry passes the subject/kind/time predicates
    #[must_use]
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.subject.as_deref().map_or(true, |s| entry.subject == s)
            && self.kind.map_or(true, |k| entry.action.kind() == k)
            && self.since.map_or(true, |t| entry.timestamp >= t)
            && self.until.map_or(true, |t| entry.timestamp <= t)
    }

    fn page_size(&self) -> usize {
        self.limit.clamp(1, MAX_PAGE_SIZE)
    }
}

/// One page of query results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditPage {
    pub entries: Vec<AuditEntry>,
    /// Pass to [`AuditFilter::after`] to fetch the next page
    pub next_cursor: Option<u64>,
}

impl AuditPage {
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Run a filter over entries already sorted by sequence id
///
/// # Errors
/// `LedgerError::InvalidFilter` if the filter is invalid
pub fn select(entries: &[AuditEntry], filter: &AuditFilter) -> Result<AuditPage, LedgerError> {
    filter.validate()?;

    let start = filter
        .after_sequence
        .map_or(0, |after| entries.partition_point(|e| e.sequence <= after));
    let page_size = filter.page_size();

    let mut matched = entries[start..].iter().filter(|e| filter.matches(e));
    let page: Vec<AuditEntry> = matched.by_ref().take(page_size).cloned().collect();
    let next_cursor = if matched.next().is_some() {
        page.last().map(|e| e.sequence)
    } else {
        None
    };

    Ok(AuditPage {
        entries: page,
        next_cursor,
    })
}
