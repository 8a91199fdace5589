//! Action kinds recorded in the audit ledger
//!
//! [`AuditAction`] is the full recorded action, including the rejection code
//! for `RESOLUTION_REJECTED`. [`AuditActionKind`] is the payload-free
//! discriminant used for filtering.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Machine-readable reason a resolution request was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    /// Global kill switch is active
    KillSwitchActive,
    /// Auto-resolution disabled for the incident's category
    CategoryDisabled,
    /// Confidence score below the effective threshold
    ConfidenceTooLow,
    /// No concurrency slot became free within the capacity wait
    CapacityExceeded,
    /// Category is not registered
    InvalidCategory,
    /// Configuration could not be applied
    InvalidConfig,
    /// Incident failed input validation
    InvalidIncident,
}

impl RejectionReason {
    /// Stable reason code
    #[inline]
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::KillSwitchActive => "KILL_SWITCH_ACTIVE",
            Self::CategoryDisabled => "CATEGORY_DISABLED",
            Self::ConfidenceTooLow => "CONFIDENCE_TOO_LOW",
            Self::CapacityExceeded => "CAPACITY_EXCEEDED",
            Self::InvalidCategory => "INVALID_CATEGORY",
            Self::InvalidConfig => "INVALID_CONFIG",
            Self::InvalidIncident => "INVALID_INCIDENT",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Recorded action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    /// An eligible incident was admitted and execution started
    ResolutionAttempted,
    /// Execution completed and the incident was auto-resolved
    ResolutionSucceeded,
    /// Execution failed terminally
    ResolutionFailed,
    /// The request was rejected before execution
    ResolutionRejected(RejectionReason),
    /// Global or category configuration changed
    ConfigUpdated,
    /// Kill switch turned on
    KillSwitchActivated,
    /// Kill switch turned off
    KillSwitchDeactivated,
    /// A notification was delivered
    NotificationSent,
    /// A notification could not be delivered
    NotificationFailed,
}

impl AuditAction {
    /// Payload-free discriminant
    #[must_use]
    pub fn kind(&self) -> AuditActionKind {
        match self {
            Self::ResolutionAttempted => AuditActionKind::ResolutionAttempted,
            Self::ResolutionSucceeded => AuditActionKind::ResolutionSucceeded,
            Self::ResolutionFailed => AuditActionKind::ResolutionFailed,
            Self::ResolutionRejected(_) => AuditActionKind::ResolutionRejected,
            Self::ConfigUpdated => AuditActionKind::ConfigUpdated,
            Self::KillSwitchActivated => AuditActionKind::KillSwitchActivated,
            Self::KillSwitchDeactivated => AuditActionKind::KillSwitchDeactivated,
            Self::NotificationSent => AuditActionKind::NotificationSent,
            Self::NotificationFailed => AuditActionKind::NotificationFailed,
        }
    }

    /// Rejection code, if this is a rejection
    #[inline]
    #[must_use]
    pub fn rejection(&self) -> Option<RejectionReason> {
        match self {
            Self::ResolutionRejected(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResolutionRejected(reason) => write!(f, "RESOLUTION_REJECTED({reason})"),
            other => f.write_str(other.kind().as_str()),
        }
    }
}

/// Action discriminant used by queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditActionKind {
    ResolutionAttempted,
    ResolutionSucceeded,
    ResolutionFailed,
    ResolutionRejected,
    ConfigUpdated,
    KillSwitchActivated,
    KillSwitchDeactivated,
    NotificationSent,
    NotificationFailed,
}

impl AuditActionKind {
    /// All kinds, in declaration order
    pub const ALL: [AuditActionKind; 9] = [
        Self::ResolutionAttempted,
        Self::ResolutionSucceeded,
        Self::ResolutionFailed,
        Self::ResolutionRejected,
        Self::ConfigUpdated,
        Self::KillSwitchActivated,
        Self::KillSwitchDeactivated,
        Self::NotificationSent,
        Self::NotificationFailed,
    ];

    /// Stable kind code
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResolutionAttempted => "RESOLUTION_ATTEMPTED",
            Self::ResolutionSucceeded => "RESOLUTION_SUCCEEDED",
            Self::ResolutionFailed => "RESOLUTION_FAILED",
            Self::ResolutionRejected => "RESOLUTION_REJECTED",
            Self::ConfigUpdated => "CONFIG_UPDATED",
            Self::KillSwitchActivated => "KILL_SWITCH_ACTIVATED",
            Self::KillSwitchDeactivated => "KILL_SWITCH_DEACTIVATED",
            Self::NotificationSent => "NOTIFICATION_SENT",
            Self::NotificationFailed => "NOTIFICATION_FAILED",
        }
    }
}

impl fmt::Display for AuditActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| format!("unknown audit action kind: '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_display_includes_reason() {
        let action = AuditAction::ResolutionRejected(RejectionReason::ConfidenceTooLow);
        assert_eq!(action.to_string(), "RESOLUTION_REJECTED(CONFIDENCE_TOO_LOW)");
        assert_eq!(action.kind(), AuditActionKind::ResolutionRejected);
        assert_eq!(action.rejection(), Some(RejectionReason::ConfidenceTooLow));
    }

    #[test]
    fn kind_parses_loosely() {
        assert_eq!(
            "kill-switch-activated".parse::<AuditActionKind>().unwrap(),
            AuditActionKind::KillSwitchActivated
        );
        assert!("restart_everything".parse::<AuditActionKind>().is_err());
    }

    #[test]
    fn action_serializes_with_reason_payload() {
        let action = AuditAction::ResolutionRejected(RejectionReason::KillSwitchActive);
        let json = serde_json::to_string(&action).unwrap();
        assert_eq!(json, r#"{"kind":"RESOLUTION_REJECTED","reason":"KILL_SWITCH_ACTIVE"}"#);

        let plain = serde_json::to_string(&AuditAction::ConfigUpdated).unwrap();
        assert_eq!(plain, r#"{"kind":"CONFIG_UPDATED"}"#);
    }
}
