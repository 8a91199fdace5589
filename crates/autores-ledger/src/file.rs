//! JSON-lines file backend
//!
//! One entry per line. The whole file is read and chain-verified on open;
//! afterwards the entries are also kept in memory for queries.
//!
//! Appends are synchronous: each one writes and `sync_data`s under the ledger
//! lock, on the calling thread. Callers on an async runtime pay one fsync per
//! audited event; put the file on storage where that is fast.
//!
//! A failed append truncates the file back to its previous length. If even
//! that fails the ledger refuses further appends until it is reopened.

use crate::entry::{verify_chain, AuditDraft, AuditEntry};
use crate::error::LedgerError;
use crate::ledger::{AuditLedger, Chain};
use crate::query::{select, AuditFilter, AuditPage};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Ledger persisted to an append-only file
#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    inner: Mutex<FileState>,
}

#[derive(Debug)]
struct FileState {
    chain: Chain,
    file: File,
    /// File and memory may disagree
    poisoned: bool,
}

impl FileLedger {
    /// Open or create a ledger file
    ///
    /// # Errors
    /// - `LedgerError::Io` if the file cannot be opened
    /// - `LedgerError::CorruptRecord` if a line does not decode
    /// - `LedgerError::IntegrityViolation` if the stored chain is broken
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            read_entries(&path)?
        } else {
            Vec::new()
        };
        verify_chain(entries.iter())?;

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::debug!(path = %path.display(), entries = entries.len(), "opened file ledger");

        Ok(Self {
            path,
            inner: Mutex::new(FileState {
                chain: Chain { entries },
                file,
                poisoned: false,
            }),
        })
    }

    /// Backing file path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_entries(path: &Path) -> Result<Vec<AuditEntry>, LedgerError> {
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: AuditEntry =
            serde_json::from_str(&line).map_err(|e| LedgerError::CorruptRecord {
                line: idx + 1,
                message: e.to_string(),
            })?;
        entries.push(entry);
    }
    Ok(entries)
}

fn write_line(file: &mut File, line: &[u8]) -> std::io::Result<()> {
    file.write_all(line)?;
    file.sync_data()
}

impl FileState {
    /// Cut off whatever a failed append left behind
    fn roll_back(&mut self, len: u64, path: &Path) {
        if let Err(e) = self.file.set_len(len).and_then(|()| self.file.sync_data()) {
            tracing::error!(path = %path.display(), error = %e, "audit rollback failed; refusing further appends");
            self.poisoned = true;
        }
    }
}

impl AuditLedger for FileLedger {
    fn append(&self, draft: AuditDraft) -> Result<u64, LedgerError> {
        let mut state = self.inner.lock();
        if state.poisoned {
            return Err(LedgerError::WriteFailed(format!(
                "{} is out of step after a failed write; reopen it",
                self.path.display()
            )));
        }
        let entry = state.chain.seal_next(draft);

        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        let len = state
            .file
            .metadata()
            .map_err(|e| LedgerError::WriteFailed(e.to_string()))?
            .len();
        if let Err(e) = write_line(&mut state.file, &line) {
            tracing::error!(path = %self.path.display(), error = %e, "audit write failed");
            state.roll_back(len, &self.path);
            return Err(LedgerError::WriteFailed(e.to_string()));
        }

        let sequence = entry.sequence;
        state.chain.entries.push(entry);
        Ok(sequence)
    }

    fn query(&self, filter: &AuditFilter) -> Result<AuditPage, LedgerError> {
        select(&self.inner.lock().chain.entries, filter)
    }

    fn verify_integrity(&self) -> Result<(), LedgerError> {
        verify_chain(self.inner.lock().chain.entries.iter())
    }

    fn len(&self) -> usize {
        self.inner.lock().chain.entries.len()
    }
}
