//! Auto-resolution engine
//!
//! Coordinates one resolution request end to end:
//! 1. Eligibility against one consistent config snapshot
//! 2. A bounded-concurrency slot, waited for up to `capacity_wait`
//! 3. Re-check against the freshest snapshot, then audit the attempt
//! 4. Executor run under retry, timeout and panic containment
//! 5. Audited outcome, slot release, best-effort notification
//!
//! Business rejections never surface as errors: `resolve` always returns a
//! `ResolutionResult`.

use crate::error::EngineError;
use crate::executor::{ResolutionExecutor, RunOutcome, StepCatalog, StepPlan, StepRecorder};
use crate::limiter::{ConcurrencyLimiter, SlotGuard};
use crate::notify::{Notification, NotificationDispatcher, NotificationGateway};
use crate::types::{
    ExecutionTry, Failure, FailureReason, Incident, ResolutionAttempt, ResolutionResult, Rejection,
    TryOutcome,
};
use autores_config::{
    Category, CategoryConfig, CategoryConfigPatch, ConfigError, ConfigSnapshot, ConfigStore,
    GlobalConfig, GlobalConfigPatch, RuntimeSettings, Settings,
};
use autores_ledger::{
    AuditAction, AuditDraft, AuditEntry, AuditFilter, AuditLedger, AuditPage, InMemoryLedger,
    LedgerError, RejectionReason,
};
use dashmap::DashMap;
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::Instrument;

/// Policy values an admitted request runs under
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    pub category: CategoryConfig,
    pub threshold: f64,
}

/// Decide whether an incident may be auto-resolved under `snapshot`
///
/// Checks run in a fixed order; the kill switch always wins.
///
/// # Errors
/// The first failed check as a `Rejection`
pub fn check_eligibility(snapshot: &ConfigSnapshot, incident: &Incident) -> Result<Admission, Rejection> {
    if snapshot.global.kill_switch_active {
        return Err(Rejection::new(
            RejectionReason::KillSwitchActive,
            "auto-resolution is globally disabled by the kill switch",
        ));
    }
    if let Err(detail) = incident.validate() {
        return Err(Rejection::new(RejectionReason::InvalidIncident, detail));
    }
    let Some(category) = snapshot.category(&incident.category) else {
        return Err(Rejection::new(
            RejectionReason::InvalidCategory,
            format!("category '{}' is not registered for auto-resolution", incident.category),
        ));
    };
    if !category.auto_resolution_enabled {
        return Err(Rejection::new(
            RejectionReason::CategoryDisabled,
            format!("auto-resolution is disabled for category '{}'", incident.category),
        ));
    }
    let threshold = category.effective_threshold(&snapshot.global);
    if incident.confidence_score < threshold {
        return Err(Rejection::new(
            RejectionReason::ConfidenceTooLow,
            format!(
                "confidence score {:.2}% below threshold {:.2}%",
                incident.confidence_score * 100.0,
                threshold * 100.0
            ),
        ));
    }
    Ok(Admission {
        category: category.clone(),
        threshold,
    })
}

/// Engine statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Admitted attempts
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub rejected: u64,
    /// Attempts currently executing
    pub running: usize,
    /// Highest number of attempts executing at once
    pub peak_running: usize,
}

#[derive(Debug, Default)]
struct Counters {
    attempted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    running: AtomicUsize,
    peak_running: AtomicUsize,
}

impl Counters {
    fn enter_running(&self) -> RunningGuard<'_> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(now, Ordering::SeqCst);
        RunningGuard(self)
    }

    fn snapshot(&self) -> EngineStats {
        EngineStats {
            attempted: self.attempted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            running: self.running.load(Ordering::SeqCst),
            peak_running: self.peak_running.load(Ordering::SeqCst),
        }
    }
}

struct RunningGuard<'a>(&'a Counters);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Builder for [`AutoResolutionEngine`]
pub struct EngineBuilder {
    executor: Arc<dyn ResolutionExecutor>,
    gateway: Arc<dyn NotificationGateway>,
    ledger: Option<Arc<dyn AuditLedger>>,
    settings: Settings,
    catalog: StepCatalog,
}

impl EngineBuilder {
    #[must_use]
    pub fn new(executor: Arc<dyn ResolutionExecutor>, gateway: Arc<dyn NotificationGateway>) -> Self {
        Self {
            executor,
            gateway,
            ledger: None,
            settings: Settings::default(),
            catalog: StepCatalog::standard(),
        }
    }

    /// Audit ledger; defaults to an in-memory ledger
    #[must_use]
    pub fn ledger(mut self, ledger: Arc<dyn AuditLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Initial configuration and runtime knobs
    #[must_use]
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn catalog(mut self, catalog: StepCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Build the engine; spawns the notification worker, so it must run
    /// inside a tokio runtime
    ///
    /// # Errors
    /// `EngineError::Config` if the settings are invalid
    pub fn build(self) -> Result<AutoResolutionEngine, EngineError> {
        self.settings.validate()?;
        let ledger = self
            .ledger
            .unwrap_or_else(|| Arc::new(InMemoryLedger::new()));
        let config = ConfigStore::from_settings(&self.settings, Arc::clone(&ledger))?;
        let runtime = self.settings.runtime;
        let notifier = NotificationDispatcher::spawn(
            self.gateway,
            Arc::clone(&ledger),
            runtime.notification_queue_capacity,
            runtime.notification_timeout(),
        );

        Ok(AutoResolutionEngine {
            config,
            ledger,
            executor: self.executor,
            catalog: self.catalog,
            limiter: ConcurrencyLimiter::new(),
            notifier,
            runtime,
            attempt_numbers: DashMap::new(),
            counters: Counters::default(),
        })
    }
}

/// Gated, audited, bounded-concurrency incident auto-resolution
pub struct AutoResolutionEngine {
    config: ConfigStore,
    ledger: Arc<dyn AuditLedger>,
    executor: Arc<dyn ResolutionExecutor>,
    catalog: StepCatalog,
    limiter: ConcurrencyLimiter,
    notifier: NotificationDispatcher,
    runtime: RuntimeSettings,
    attempt_numbers: DashMap<String, u32>,
    counters: Counters,
}

impl std::fmt::Debug for AutoResolutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoResolutionEngine")
            .field("config", &self.config)
            .field("limiter", &self.limiter)
            .field("runtime", &self.runtime)
            .field("stats", &self.counters.snapshot())
            .finish_non_exhaustive()
    }
}

impl AutoResolutionEngine {
    /// Start building an engine
    #[must_use]
    pub fn builder(
        executor: Arc<dyn ResolutionExecutor>,
        gateway: Arc<dyn NotificationGateway>,
    ) -> EngineBuilder {
        EngineBuilder::new(executor, gateway)
    }

    /// Attempt to auto-resolve one incident
    pub async fn resolve(&self, incident: &Incident, requested_by: &str) -> ResolutionResult {
        let span = tracing::info_span!(
            "resolve",
            incident_id = %incident.id,
            category = %incident.category,
        );
        self.resolve_inner(incident, requested_by).instrument(span).await
    }

    /// Resolve several incidents; results keep input order
    ///
    /// At most `max_concurrent_resolutions` items of one batch are in flight
    /// at a time, so a batch never starves its own later items of slots.
    pub async fn batch_resolve(&self, incidents: &[Incident], requested_by: &str) -> Vec<ResolutionResult> {
        let fan_out = self.config.snapshot().global.max_concurrent_resolutions.max(1);
        futures::stream::iter(incidents)
            .map(|i| self.resolve(i, requested_by))
            .buffered(fan_out)
            .collect()
            .await
    }

    async fn resolve_inner(&self, incident: &Incident, requested_by: &str) -> ResolutionResult {
        let snapshot = self.config.snapshot();
        if let Err(rejection) = check_eligibility(&snapshot, incident) {
            return self.reject(incident, requested_by, rejection);
        }

        let capacity = snapshot.global.max_concurrent_resolutions;
        let token = match self.limiter.acquire(capacity, self.runtime.capacity_wait()).await {
            Ok(token) => token,
            Err(e) => {
                return self.reject(
                    incident,
                    requested_by,
                    Rejection::new(RejectionReason::CapacityExceeded, e.to_string()),
                );
            }
        };
        let slot = SlotGuard::new(&self.limiter, token);

        // config may have changed while waiting for a slot
        let admission = match check_eligibility(&self.config.snapshot(), incident) {
            Ok(admission) => admission,
            Err(rejection) => {
                slot.release();
                return self.reject(incident, requested_by, rejection);
            }
        };

        self.run_attempt(incident, requested_by, admission, slot).await
    }

    async fn run_attempt(
        &self,
        incident: &Incident,
        requested_by: &str,
        admission: Admission,
        slot: SlotGuard<'_>,
    ) -> ResolutionResult {
        let attempt_number = self.next_attempt_number(&incident.id);
        let mut attempt =
            ResolutionAttempt::start(incident, requested_by, attempt_number, admission.threshold);

        let draft = AuditDraft::new(requested_by, AuditAction::ResolutionAttempted, &incident.id)
            .with_detail(format!("attempt {attempt_number} admitted"))
            .with_after(json!({
                "attempt_id": attempt.id.to_string(),
                "attempt_number": attempt_number,
                "category": incident.category.key(),
                "confidence_score": incident.confidence_score,
                "threshold": admission.threshold,
            }));
        if let Err(e) = self.ledger.append(draft) {
            tracing::error!(error = %e, "failed to audit resolution attempt; not executing");
            slot.release();
            attempt.fail(Failure::new(
                FailureReason::AuditWriteFailed,
                format!("attempt could not be audited: {e}"),
            ));
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            return ResolutionResult::from_attempt(attempt);
        }
        self.counters.attempted.fetch_add(1, Ordering::Relaxed);
        tracing::info!(attempt_id = %attempt.id, attempt_number, "resolution attempt started");

        let plan = self.catalog.plan_for(&incident.category);
        let execution = {
            let _running = self.counters.enter_running();
            self.execute_with_retry(incident, &plan, admission.category.max_retry_attempts, &mut attempt)
                .await
        };

        match execution {
            Ok(()) => self.finish_success(incident, requested_by, &admission, attempt, slot),
            Err(failure) => self.finish_failure(incident, requested_by, &admission, attempt, failure, slot),
        }
    }

    /// Run the plan, retrying transient failures up to `max_retries` times
    async fn execute_with_retry(
        &self,
        incident: &Incident,
        plan: &StepPlan,
        max_retries: u32,
        attempt: &mut ResolutionAttempt,
    ) -> Result<(), Failure> {
        let total_tries = max_retries.saturating_add(1);
        let timeout = self.runtime.execution_timeout();
        let mut number = 1u32;

        loop {
            if number > 1 {
                tokio::time::sleep(self.runtime.retry_backoff(number - 1)).await;
            }

            let recorder = StepRecorder::new(&incident.id, number);
            let run = AssertUnwindSafe(self.executor.run(incident, plan, &recorder)).catch_unwind();
            let outcome = tokio::time::timeout(timeout, run).await;
            let steps = recorder.into_steps();

            match outcome {
                Err(_) => {
                    let detail = format!("executor did not finish within {timeout:?}");
                    attempt.tries.push(ExecutionTry {
                        number,
                        steps,
                        outcome: TryOutcome::TimedOut,
                        error: Some(detail.clone()),
                    });
                    return Err(Failure::new(FailureReason::ExecutionTimeout, detail));
                }
                Ok(Err(payload)) => {
                    let detail = format!("executor fault: {}", panic_message(payload.as_ref()));
                    tracing::error!(try_number = number, %detail, "executor panicked");
                    attempt.tries.push(ExecutionTry {
                        number,
                        steps,
                        outcome: TryOutcome::Faulted,
                        error: Some(detail.clone()),
                    });
                    return Err(Failure::new(FailureReason::ExecutorFault, detail));
                }
                Ok(Ok(RunOutcome::Completed)) => {
                    attempt.tries.push(ExecutionTry {
                        number,
                        steps,
                        outcome: TryOutcome::Succeeded,
                        error: None,
                    });
                    return Ok(());
                }
                Ok(Ok(RunOutcome::Failed { step_index, failure })) => {
                    let retryable = failure.is_retryable();
                    let action = plan
                        .steps
                        .get(step_index)
                        .map_or("unknown", |s| s.action.as_str());
                    let detail = format!("step {} ({action}) failed: {}", step_index + 1, failure.message());
                    attempt.tries.push(ExecutionTry {
                        number,
                        steps,
                        outcome: if retryable {
                            TryOutcome::RetryableFailure
                        } else {
                            TryOutcome::TerminalFailure
                        },
                        error: Some(detail.clone()),
                    });

                    if !retryable {
                        return Err(Failure::new(FailureReason::StepFailed, detail));
                    }
                    if number >= total_tries {
                        return Err(Failure::new(
                            FailureReason::RetriesExhausted,
                            format!("{detail} (after {number} tries)"),
                        ));
                    }
                    tracing::warn!(try_number = number, %detail, "transient step failure; retrying");
                    number += 1;
                }
            }
        }
    }

    fn finish_success(
        &self,
        incident: &Incident,
        requested_by: &str,
        admission: &Admission,
        mut attempt: ResolutionAttempt,
        slot: SlotGuard<'_>,
    ) -> ResolutionResult {
        let draft = AuditDraft::new(requested_by, AuditAction::ResolutionSucceeded, &incident.id)
            .with_detail(format!("resolved after {} tries", attempt.try_count()))
            .with_after(json!({
                "attempt_id": attempt.id.to_string(),
                "tries": attempt.try_count(),
                "steps": attempt.final_steps(),
            }));

        if let Err(e) = self.ledger.append(draft) {
            // an unaudited success is reported as a failure
            tracing::error!(attempt_id = %attempt.id, error = %e, "failed to audit successful resolution");
            slot.release();
            let failure = Failure::new(
                FailureReason::AuditWriteFailed,
                format!("executor succeeded but the outcome could not be audited: {e}"),
            );
            self.audit_failure(incident, requested_by, &attempt, &failure);
            attempt.fail(failure);
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            return ResolutionResult::from_attempt(attempt);
        }

        attempt.succeed();
        slot.release();
        self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
        tracing::info!(attempt_id = %attempt.id, tries = attempt.try_count(), "incident auto-resolved");

        if admission.category.notification_required {
            self.notifier.dispatch(Notification::auto_resolved(
                incident,
                &attempt,
                &self.runtime.reopen_base_url,
            ));
        }
        ResolutionResult::from_attempt(attempt)
    }

    fn finish_failure(
        &self,
        incident: &Incident,
        requested_by: &str,
        admission: &Admission,
        mut attempt: ResolutionAttempt,
        failure: Failure,
        slot: SlotGuard<'_>,
    ) -> ResolutionResult {
        tracing::warn!(
            attempt_id = %attempt.id,
            reason = failure.reason.code(),
            detail = %failure.detail,
            "auto-resolution failed"
        );
        self.audit_failure(incident, requested_by, &attempt, &failure);
        attempt.fail(failure);
        slot.release();
        self.counters.failed.fetch_add(1, Ordering::Relaxed);

        if self.runtime.notify_on_failure && admission.category.notification_required {
            self.notifier
                .dispatch(Notification::resolution_failed(incident, &attempt));
        }
        ResolutionResult::from_attempt(attempt)
    }

    fn audit_failure(&self, incident: &Incident, requested_by: &str, attempt: &ResolutionAttempt, failure: &Failure) {
        let draft = AuditDraft::new(requested_by, AuditAction::ResolutionFailed, &incident.id)
            .with_detail(format!("{}: {}", failure.reason, failure.detail))
            .with_after(json!({
                "attempt_id": attempt.id.to_string(),
                "reason": failure.reason.code(),
                "tries": attempt.try_count(),
                "steps": attempt.final_steps(),
            }));
        if let Err(e) = self.ledger.append(draft) {
            tracing::error!(attempt_id = %attempt.id, error = %e, "failed to audit resolution failure");
        }
    }

    fn reject(&self, incident: &Incident, requested_by: &str, rejection: Rejection) -> ResolutionResult {
        tracing::warn!(
            reason = rejection.reason.code(),
            detail = %rejection.detail,
            "auto-resolution rejected"
        );
        let draft = AuditDraft::new(
            requested_by,
            AuditAction::ResolutionRejected(rejection.reason),
            &incident.id,
        )
        .with_detail(rejection.detail.clone())
        .with_after(json!({
            "category": incident.category.key(),
            "confidence_score": incident.confidence_score,
        }));
        if let Err(e) = self.ledger.append(draft) {
            tracing::error!(error = %e, "failed to audit rejection");
        }
        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
        ResolutionResult::rejected(&incident.id, rejection)
    }

    fn next_attempt_number(&self, incident_id: &str) -> u32 {
        let mut counter = self.attempt_numbers.entry(incident_id.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    // === Configuration ===

    #[must_use]
    pub fn get_global_config(&self) -> GlobalConfig {
        self.config.get_global()
    }

    /// # Errors
    /// See [`ConfigStore::update_global`]
    pub fn update_global_config(
        &self,
        patch: &GlobalConfigPatch,
        actor: &str,
        reason: &str,
    ) -> Result<GlobalConfig, ConfigError> {
        self.config.update_global(patch, actor, reason)
    }

    /// # Errors
    /// `ConfigError::UnknownCategory` if never registered
    pub fn get_category_config(&self, category: &Category) -> Result<CategoryConfig, ConfigError> {
        self.config.get_category(category)
    }

    /// Update or onboard a category
    ///
    /// # Errors
    /// See [`ConfigStore::update_category`]
    pub fn update_category_config(
        &self,
        category: &Category,
        patch: &CategoryConfigPatch,
        actor: &str,
    ) -> Result<CategoryConfig, ConfigError> {
        self.config.update_category(category, patch, actor)
    }

    /// Halt new auto-resolutions and alert operations
    ///
    /// Attempts already executing run to completion.
    ///
    /// # Errors
    /// See [`ConfigStore::activate_kill_switch`]
    pub fn activate_kill_switch(&self, actor: &str, reason: &str) -> Result<GlobalConfig, ConfigError> {
        let global = self.config.activate_kill_switch(actor, reason)?;
        self.notifier
            .dispatch(Notification::kill_switch_alert(actor, reason));
        Ok(global)
    }

    /// # Errors
    /// See [`ConfigStore::deactivate_kill_switch`]
    pub fn deactivate_kill_switch(&self, actor: &str) -> Result<GlobalConfig, ConfigError> {
        self.config.deactivate_kill_switch(actor, None)
    }

    /// The configuration store backing this engine
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    // === Audit ===

    /// # Errors
    /// `LedgerError::InvalidFilter` for an inverted time range
    pub fn query_audit(&self, filter: &AuditFilter) -> Result<AuditPage, LedgerError> {
        self.ledger.query(filter)
    }

    /// Every ledger entry about one incident, in sequence order
    ///
    /// # Errors
    /// Propagates ledger query errors
    pub fn incident_trail(&self, incident_id: &str) -> Result<Vec<AuditEntry>, LedgerError> {
        self.ledger.query_all(&AuditFilter::new().subject(incident_id))
    }

    /// # Errors
    /// `LedgerError::IntegrityViolation` at the first broken link
    pub fn verify_audit_integrity(&self) -> Result<(), LedgerError> {
        self.ledger.verify_integrity()
    }

    #[inline]
    #[must_use]
    pub fn ledger(&self) -> &Arc<dyn AuditLedger> {
        &self.ledger
    }

    // === Lifecycle ===

    #[must_use]
    pub fn stats(&self) -> EngineStats {
        self.counters.snapshot()
    }

    /// Slots currently held
    #[must_use]
    pub fn slots_in_flight(&self) -> usize {
        self.limiter.in_flight()
    }

    /// Stop accepting notifications and wait for queued ones to finish
    pub async fn shutdown(&self) {
        self.notifier.shutdown().await;
        tracing::info!(stats = ?self.stats(), "engine shut down");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
