//! Testing utilities for the autores workspace
//!
//! Shared fakes and fixtures: a scripted executor, recording and refusing
//! notification gateways, a ledger with injectable write failures.

#![allow(missing_docs)]

use async_trait::async_trait;
use autores_config::{Category, Settings};
use autores_engine::{
    AutoResolutionEngine, Incident, Notification, NotificationGateway, NotifyError, PlannedStep,
    ResolutionExecutor, RunOutcome, StepFailure, StepPlan, StepRecorder,
};
use autores_ledger::{
    AuditActionKind, AuditDraft, AuditEntry, AuditFilter, AuditLedger, AuditPage, InMemoryLedger,
    LedgerError,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What one executor run does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedRun {
    Succeed,
    /// Fail the step at this index with a retryable error
    TransientAt(usize),
    /// Fail the step at this index with a terminal error
    TerminalAt(usize),
    /// Never finish
    Hang,
    /// Panic inside the executor
    Panic,
}

/// Executor that plays back a script, one entry per run
#[derive(Debug)]
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<ScriptedRun>>,
    fallback: ScriptedRun,
    step_delay: Duration,
    runs: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    /// Executor that succeeds every run
    pub fn succeeding() -> Self {
        Self::with_script([])
    }

    /// Play `runs` in order, then succeed
    pub fn with_script(runs: impl IntoIterator<Item = ScriptedRun>) -> Self {
        Self {
            script: Mutex::new(runs.into_iter().collect()),
            fallback: ScriptedRun::Succeed,
            step_delay: Duration::ZERO,
            runs: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Behavior once the script is used up
    pub fn then(mut self, fallback: ScriptedRun) -> Self {
        self.fallback = fallback;
        self
    }

    /// Time spent in each step
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Runs started so far
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Highest number of runs executing at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Incident ids in run order
    pub fn incidents_seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }

    fn next_run(&self) -> ScriptedRun {
        self.script.lock().pop_front().unwrap_or(self.fallback)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ResolutionExecutor for ScriptedExecutor {
    async fn execute_step(&self, _incident: &Incident, _step: &PlannedStep) -> Result<(), StepFailure> {
        Ok(())
    }

    async fn run(&self, incident: &Incident, plan: &StepPlan, recorder: &StepRecorder) -> RunOutcome {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(incident.id.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        let run = self.next_run();
        match run {
            ScriptedRun::Hang => std::future::pending::<()>().await,
            ScriptedRun::Panic => panic!("scripted executor fault"),
            _ => {}
        }

        for (index, step) in plan.steps.iter().enumerate() {
            recorder.begin(index, step);
            if !self.step_delay.is_zero() {
                tokio::time::sleep(self.step_delay).await;
            }
            let failure = match run {
                ScriptedRun::TransientAt(at) if at == index => {
                    Some(StepFailure::Transient(format!("{} flaked", step.action)))
                }
                ScriptedRun::TerminalAt(at) if at == index => {
                    Some(StepFailure::Terminal(format!("{} broke", step.action)))
                }
                _ => None,
            };
            match failure {
                Some(failure) => {
                    recorder.fail(index, failure.message());
                    return RunOutcome::Failed {
                        step_index: index,
                        failure,
                    };
                }
                None => recorder.succeed(index),
            }
        }
        RunOutcome::Completed
    }
}

/// Gateway that records every delivery, optionally refusing them
#[derive(Debug, Default)]
pub struct RecordingGateway {
    delivered: Mutex<Vec<Notification>>,
    refuse: AtomicBool,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gateway that refuses every delivery
    pub fn refusing() -> Self {
        let gateway = Self::default();
        gateway.set_refusing(true);
        gateway
    }

    pub fn set_refusing(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Notifications accepted so far
    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().clone()
    }
}

#[async_trait]
impl NotificationGateway for RecordingGateway {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(NotifyError::DeliveryFailed("gateway offline".to_string()));
        }
        self.delivered.lock().push(notification.clone());
        Ok(())
    }
}

/// In-memory ledger with injectable write failures
#[derive(Debug, Default)]
pub struct FailingLedger {
    inner: InMemoryLedger,
    fail_kinds: Mutex<Vec<AuditActionKind>>,
    refused: AtomicUsize,
}

impl FailingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse appends of this action kind
    pub fn fail_on(self, kind: AuditActionKind) -> Self {
        self.fail_kinds.lock().push(kind);
        self
    }

    /// Appends refused so far
    pub fn refused(&self) -> usize {
        self.refused.load(Ordering::SeqCst)
    }

    /// Entries actually recorded
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.inner.entries()
    }
}

impl AuditLedger for FailingLedger {
    fn append(&self, draft: AuditDraft) -> Result<u64, LedgerError> {
        let kind = draft.action.kind();
        if self.fail_kinds.lock().contains(&kind) {
            self.refused.fetch_add(1, Ordering::SeqCst);
            return Err(LedgerError::WriteFailed(format!("injected failure for {kind}")));
        }
        self.inner.append(draft)
    }

    fn query(&self, filter: &AuditFilter) -> Result<AuditPage, LedgerError> {
        self.inner.query(filter)
    }

    fn verify_integrity(&self) -> Result<(), LedgerError> {
        self.inner.verify_integrity()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

/// Incident created by `tester`
pub fn incident(id: &str, category: Category, confidence: f64) -> Incident {
    Incident::new(id, format!("{category} trouble"), category, confidence).with_creator("tester")
}

/// Default settings with short waits and backoff
pub fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    settings.runtime.retry_backoff_ms = 1;
    settings.runtime.capacity_wait_ms = 200;
    settings.runtime.execution_timeout_ms = 2_000;
    settings.runtime.notification_timeout_ms = 500;
    settings
}

/// Engine wired to the given fakes
///
/// # Panics
/// If `settings` are invalid
pub fn engine_with(
    executor: Arc<dyn ResolutionExecutor>,
    gateway: Arc<dyn NotificationGateway>,
    ledger: Arc<dyn AuditLedger>,
    settings: Settings,
) -> AutoResolutionEngine {
    AutoResolutionEngine::builder(executor, gateway)
        .ledger(ledger)
        .settings(settings)
        .build()
        .expect("test settings must be valid")
}
