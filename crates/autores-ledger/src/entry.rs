//! Audit entries and the hash chain linking them

use crate::action::AuditAction;
use crate::error::LedgerError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hash of the (nonexistent) entry before the first one
pub const GENESIS_HASH: [u8; 32] = [0u8; 32];

/// One immutable, sequence-numbered ledger record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonic sequence id, starting at 1
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: AuditAction,
    /// Incident id or config key
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
    #[serde(default)]
    pub detail: String,
    #[serde(with = "hex_hash")]
    pub prev_hash: [u8; 32],
    #[serde(with = "hex_hash")]
    pub hash: [u8; 32],
}

impl AuditEntry {
    /// Recompute this entry's hash from its contents
    #[must_use]
    pub fn compute_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.sequence.to_le_bytes());
        hasher.update(
            self.timestamp
                .to_rfc3339_opts(SecondsFormat::Nanos, true)
                .as_bytes(),
        );
        hasher.update([0]);
        hasher.update(self.actor.as_bytes());
        hasher.update([0]);
        hasher.update(self.action.to_string().as_bytes());
        hasher.update([0]);
        hasher.update(self.subject.as_bytes());
        hasher.update([0]);
        hash_value(&mut hasher, self.before.as_ref());
        hash_value(&mut hasher, self.after.as_ref());
        hasher.update(self.detail.as_bytes());
        hasher.update([0]);
        hasher.update(self.prev_hash);
        hasher.finalize().into()
    }

    /// Hex form of the entry hash
    #[inline]
    #[must_use]
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }
}

fn hash_value(hasher: &mut Sha256, value: Option<&Value>) {
    match value {
        Some(v) => {
            hasher.update([1]);
            hasher.update(v.to_string().as_bytes());
        }
        None => hasher.update([0]),
    }
}

/// An entry before the ledger has assigned its sequence and hash
#[derive(Debug, Clone, PartialEq)]
pub struct AuditDraft {
    pub actor: String,
    pub action: AuditAction,
    pub subject: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub detail: String,
}

impl AuditDraft {
    /// Create new draft
    #[must_use]
    pub fn new(actor: impl Into<String>, action: AuditAction, subject: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            action,
            subject: subject.into(),
            before: None,
            after: None,
            detail: String::new(),
        }
    }

    /// With free-form detail
    #[inline]
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    /// With before/after values
    #[inline]
    #[must_use]
    pub fn with_change(mut self, before: Option<Value>, after: Option<Value>) -> Self {
        self.before = before;
        self.after = after;
        self
    }

    /// With only an after value
    #[inline]
    #[must_use]
    pub fn with_after(mut self, after: Value) -> Self {
        self.after = Some(after);
        self
    }

    /// Turn the draft into a chained entry
    #[must_use]
    pub fn seal(self, sequence: u64, timestamp: DateTime<Utc>, prev_hash: [u8; 32]) -> AuditEntry {
        let mut entry = AuditEntry {
            sequence,
            timestamp,
            actor: self.actor,
            action: self.action,
            subject: self.subject,
            before: self.before,
            after: self.after,
            detail: self.detail,
            prev_hash,
            hash: [0u8; 32],
        };
        entry.hash = entry.compute_hash();
        entry
    }
}

/// Check sequence monotonicity and hash linkage of an ordered run of entries
///
/// # Errors
/// `LedgerError::IntegrityViolation` naming the first offending sequence id
pub fn verify_chain<'a>(entries: impl IntoIterator<Item = &'a AuditEntry>) -> Result<(), LedgerError> {
    let mut prev_hash = GENESIS_HASH;
    let mut prev_sequence = 0u64;
    for entry in entries {
        if entry.sequence <= prev_sequence
            || entry.prev_hash != prev_hash
            || entry.hash != entry.compute_hash()
        {
            return Err(LedgerError::IntegrityViolation {
                sequence: entry.sequence,
            });
        }
        prev_hash = entry.hash;
        prev_sequence = entry.sequence;
    }
    Ok(())
}

mod hex_hash {
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let text = String::deserialize(d)?;
        let mut out = [0u8; 32];
        hex::decode_to_slice(&text, &mut out).map_err(serde::de::Error::custom)?;
        Ok(out)
    }
}
