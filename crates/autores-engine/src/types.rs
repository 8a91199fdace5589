//! Core types for the resolution engine
//!
//! Defines:
//! - Incoming incidents
//! - Resolution steps and execution tries
//! - Attempt records and their outcomes
//! - The typed result returned to callers

use autores_config::Category;
use autores_ledger::RejectionReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Incident priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// Incident submitted for auto-resolution; never mutated by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub title: String,
    pub category: Category,
    #[serde(default)]
    pub priority: Priority,
    /// Classifier confidence in [0, 1]
    pub confidence_score: f64,
    /// Identity of whoever opened the incident; receives notifications
    pub created_by: String,
}

impl Incident {
    /// Create new incident
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        category: Category,
        confidence_score: f64,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            category,
            priority: Priority::default(),
            confidence_score,
            created_by: "unknown".to_string(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_creator(mut self, created_by: impl Into<String>) -> Self {
        self.created_by = created_by.into();
        self
    }

    /// Check caller-supplied fields
    ///
    /// # Errors
    /// Description of the first invalid field
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("incident id must not be empty".to_string());
        }
        if !self.confidence_score.is_finite() || !(0.0..=1.0).contains(&self.confidence_score) {
            return Err(format!(
                "confidence score must be within [0, 1], got {}",
                self.confidence_score
            ));
        }
        Ok(())
    }
}

/// Unique attempt identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AttemptId(pub Ulid);

impl AttemptId {
    /// Generate new attempt ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Pending,
    Success,
    Failed,
}

/// One executed (or in-progress) resolution step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionStep {
    /// Position in the step plan
    pub index: usize,
    pub description: String,
    pub action: String,
    pub outcome: StepOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ResolutionStep {
    #[inline]
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.outcome == StepOutcome::Success
    }
}

/// How one pass over the step plan ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TryOutcome {
    Succeeded,
    /// A step failed and the executor marked it retryable
    RetryableFailure,
    /// A step failed and the executor marked it terminal
    TerminalFailure,
    /// The run exceeded the execution timeout
    TimedOut,
    /// The executor panicked
    Faulted,
}

/// One pass over the step plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTry {
    /// 1-based try number within the attempt
    pub number: u32,
    pub steps: Vec<ResolutionStep>,
    pub outcome: TryOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Overall attempt outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Running,
    Succeeded,
    Failed,
    Rejected,
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Machine-readable reason an admitted attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    /// A step failed with a non-retryable error
    StepFailed,
    /// Retryable failures used up the retry budget
    RetriesExhausted,
    /// The executor did not finish within the execution timeout
    ExecutionTimeout,
    /// The outcome could not be recorded in the audit ledger
    AuditWriteFailed,
    /// The executor faulted unexpectedly
    ExecutorFault,
}

impl FailureReason {
    /// Stable reason code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::StepFailed => "STEP_FAILED",
            Self::RetriesExhausted => "RETRIES_EXHAUSTED",
            Self::ExecutionTimeout => "EXECUTION_TIMEOUT",
            Self::AuditWriteFailed => "AUDIT_WRITE_FAILED",
            Self::ExecutorFault => "EXECUTOR_FAULT",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Why an attempt failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub reason: FailureReason,
    pub detail: String,
}

impl Failure {
    #[inline]
    pub fn new(reason: FailureReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

/// Why a request was rejected before execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub reason: RejectionReason,
    pub detail: String,
}

impl Rejection {
    #[inline]
    pub fn new(reason: RejectionReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

/// Record of one admitted resolution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionAttempt {
    pub id: AttemptId,
    pub incident_id: String,
    /// Per-incident counter, starting at 1
    pub attempt_number: u32,
    pub requested_by: String,
    pub tries: Vec<ExecutionTry>,
    pub outcome: AttemptOutcome,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub confidence_score_used: f64,
    pub threshold_used: f64,
    pub failure: Option<Failure>,
}

impl ResolutionAttempt {
    /// Begin a running attempt
    #[must_use]
    pub fn start(incident: &Incident, requested_by: &str, attempt_number: u32, threshold: f64) -> Self {
        Self {
            id: AttemptId::new(),
            incident_id: incident.id.clone(),
            attempt_number,
            requested_by: requested_by.to_string(),
            tries: Vec::new(),
            outcome: AttemptOutcome::Running,
            started_at: Utc::now(),
            ended_at: None,
            confidence_score_used: incident.confidence_score,
            threshold_used: threshold,
            failure: None,
        }
    }

    /// Mark succeeded
    pub fn succeed(&mut self) {
        self.outcome = AttemptOutcome::Succeeded;
        self.failure = None;
        self.ended_at = Some(Utc::now());
    }

    /// Mark failed
    pub fn fail(&mut self, failure: Failure) {
        self.outcome = AttemptOutcome::Failed;
        self.failure = Some(failure);
        self.ended_at = Some(Utc::now());
    }

    /// Steps of the last try
    #[must_use]
    pub fn final_steps(&self) -> &[ResolutionStep] {
        self.tries.last().map_or(&[], |t| t.steps.as_slice())
    }

    #[inline]
    #[must_use]
    pub fn try_count(&self) -> usize {
        self.tries.len()
    }
}

/// What `resolve` hands back to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub incident_id: String,
    pub outcome: AttemptOutcome,
    pub attempt_id: Option<AttemptId>,
    pub rejection: Option<Rejection>,
    pub failure: Option<Failure>,
    /// Steps of the final execution try
    pub steps: Vec<ResolutionStep>,
    /// Full attempt record, absent for rejections
    pub attempt: Option<ResolutionAttempt>,
}

impl ResolutionResult {
    /// Result for a rejected request
    #[must_use]
    pub fn rejected(incident_id: &str, rejection: Rejection) -> Self {
        Self {
            incident_id: incident_id.to_string(),
            outcome: AttemptOutcome::Rejected,
            attempt_id: None,
            rejection: Some(rejection),
            failure: None,
            steps: Vec::new(),
            attempt: None,
        }
    }

    /// Result for a finalized attempt
    #[must_use]
    pub fn from_attempt(attempt: ResolutionAttempt) -> Self {
        Self {
            incident_id: attempt.incident_id.clone(),
            outcome: attempt.outcome,
            attempt_id: Some(attempt.id),
            rejection: None,
            failure: attempt.failure.clone(),
            steps: attempt.final_steps().to_vec(),
            attempt: Some(attempt),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome == AttemptOutcome::Succeeded
    }

    /// Rejection or failure code, if any
    #[must_use]
    pub fn reason_code(&self) -> Option<&'static str> {
        self.rejection
            .as_ref()
            .map(|r| r.reason.code())
            .or_else(|| self.failure.as_ref().map(|f| f.reason.code()))
    }

    /// Operator-facing one-line summary
    #[must_use]
    pub fn message(&self) -> String {
        match (&self.rejection, &self.failure) {
            (Some(r), _) => format!("auto-resolution rejected ({}): {}", r.reason, r.detail),
            (None, Some(f)) => format!("auto-resolution failed ({}): {}", f.reason, f.detail),
            (None, None) if self.is_success() => "incident successfully auto-resolved".to_string(),
            (None, None) => format!("auto-resolution {}", self.outcome),
        }
    }
}
