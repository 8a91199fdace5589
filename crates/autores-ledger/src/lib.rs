//! Autores Ledger - append-only audit trail
//!
//! Every decision and state change of the auto-resolution engine lands here:
//! - Strictly increasing sequence ids, assigned under one lock
//! - SHA-256 hash chain for tamper evidence
//! - Subject / action / time-range queries with stable cursor pagination
//!
//! # Example
//!
//! ```rust
//! use autores_ledger::{AuditAction, AuditDraft, AuditFilter, AuditLedger, InMemoryLedger};
//!
//! let ledger = InMemoryLedger::new();
//! let seq = ledger
//!     .append(AuditDraft::new("system", AuditAction::ResolutionAttempted, "INC-1"))
//!     .unwrap();
//! assert_eq!(seq, 1);
//!
//! let page = ledger.query(&AuditFilter::new().subject("INC-1")).unwrap();
//! assert_eq!(page.len(), 1);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod action;
pub mod entry;
pub mod error;
pub mod file;
pub mod ledger;
pub mod query;

pub use action::{AuditAction, AuditActionKind, RejectionReason};
pub use entry::{verify_chain, AuditDraft, AuditEntry, GENESIS_HASH};
pub use error::LedgerError;
pub use file::FileLedger;
pub use ledger::{AuditLedger, InMemoryLedger};
pub use query::{AuditFilter, AuditPage, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
