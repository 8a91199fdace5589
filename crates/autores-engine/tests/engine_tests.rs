//! End-to-end resolution behavior against scripted fakes

use autores_config::{Category, CategoryConfigPatch, ConfigError, GlobalConfigPatch};
use autores_engine::{
    AttemptOutcome, FailureReason, NotificationKind, PlannedStep, StepCatalog, StepOutcome,
    TryOutcome,
};
use autores_ledger::{
    AuditAction, AuditActionKind, AuditFilter, AuditLedger, FileLedger, InMemoryLedger,
    RejectionReason,
};
use autores_test_utils::{
    engine_with, fast_settings, incident, FailingLedger, RecordingGateway, ScriptedExecutor,
    ScriptedRun,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn kinds(entries: &[autores_ledger::AuditEntry]) -> Vec<AuditActionKind> {
    entries.iter().map(|e| e.action.kind()).collect()
}

#[tokio::test]
async fn confident_database_incident_is_resolved_and_notified() {
    let executor = Arc::new(ScriptedExecutor::succeeding());
    let gateway = Arc::new(RecordingGateway::new());
    let ledger = Arc::new(InMemoryLedger::new());
    let engine = engine_with(executor.clone(), gateway.clone(), ledger.clone(), fast_settings());

    let result = engine
        .resolve(&incident("INC-100", Category::Database, 0.95), "system")
        .await;

    assert_eq!(result.outcome, AttemptOutcome::Succeeded);
    assert!(result.attempt_id.is_some());
    let actions: Vec<_> = result.steps.iter().map(|s| s.action.as_str()).collect();
    assert_eq!(actions, ["connection_check", "pool_clear", "health_check"]);
    assert!(result.steps.iter().all(|s| s.outcome == StepOutcome::Success));

    engine.shutdown().await;

    let trail = engine.incident_trail("INC-100").unwrap();
    assert_eq!(
        kinds(&trail),
        [
            AuditActionKind::ResolutionAttempted,
            AuditActionKind::ResolutionSucceeded,
            AuditActionKind::NotificationSent,
        ]
    );

    let delivered = gateway.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].kind, NotificationKind::AutoResolved);
    assert_eq!(delivered[0].subject, "Incident INC-100 Auto-Resolved");
    assert_eq!(delivered[0].recipient, "tester");
    assert!(delivered[0].reopen_link.as_deref().unwrap().starts_with("/incidents/INC-100/reopen"));
}

#[tokio::test]
async fn kill_switch_rejects_without_executing() {
    let executor = Arc::new(ScriptedExecutor::succeeding());
    let engine = engine_with(
        executor.clone(),
        Arc::new(RecordingGateway::new()),
        Arc::new(InMemoryLedger::new()),
        fast_settings(),
    );
    engine.activate_kill_switch("oncall", "bad deploy").unwrap();

    let result = engine
        .resolve(&incident("INC-101", Category::Database, 0.99), "system")
        .await;

    assert_eq!(result.outcome, AttemptOutcome::Rejected);
    assert_eq!(result.reason_code(), Some("KILL_SWITCH_ACTIVE"));
    assert_eq!(executor.runs(), 0);

    let trail = engine.incident_trail("INC-101").unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(
        trail[0].action,
        AuditAction::ResolutionRejected(RejectionReason::KillSwitchActive)
    );
}

#[tokio::test]
async fn kill_switch_activation_alerts_operations() {
    let gateway = Arc::new(RecordingGateway::new());
    let engine = engine_with(
        Arc::new(ScriptedExecutor::succeeding()),
        gateway.clone(),
        Arc::new(InMemoryLedger::new()),
        fast_settings(),
    );

    assert!(matches!(
        engine.activate_kill_switch("oncall", "  "),
        Err(ConfigError::ReasonRequired)
    ));
    engine.activate_kill_switch("oncall", "db migration").unwrap();
    engine.deactivate_kill_switch("oncall").unwrap();
    engine.shutdown().await;

    let delivered = gateway.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].kind, NotificationKind::KillSwitchActivated);
    assert!(delivered[0].body.contains("db migration"));

    let global = engine
        .query_audit(&AuditFilter::new().subject("global"))
        .unwrap();
    let global_kinds = kinds(&global.entries);
    assert!(global_kinds.contains(&AuditActionKind::KillSwitchActivated));
    assert!(global_kinds.contains(&AuditActionKind::KillSwitchDeactivated));
    assert!(global_kinds.contains(&AuditActionKind::NotificationSent));
}

#[tokio::test]
async fn low_confidence_is_rejected() {
    let executor = Arc::new(ScriptedExecutor::succeeding());
    let engine = engine_with(
        executor.clone(),
        Arc::new(RecordingGateway::new()),
        Arc::new(InMemoryLedger::new()),
        fast_settings(),
    );

    let result = engine
        .resolve(&incident("INC-102", Category::Network, 0.80), "system")
        .await;

    let rejection = result.rejection.unwrap();
    assert_eq!(rejection.reason, RejectionReason::ConfidenceTooLow);
    assert_eq!(rejection.detail, "confidence score 80.00% below threshold 90.00%");
    assert_eq!(executor.runs(), 0);
    assert_eq!(engine.stats().rejected, 1);
}

#[tokio::test]
async fn category_policy_gates_admission() {
    let executor = Arc::new(ScriptedExecutor::succeeding());
    let engine = engine_with(
        executor.clone(),
        Arc::new(RecordingGateway::new()),
        Arc::new(InMemoryLedger::new()),
        fast_settings(),
    );

    engine
        .update_category_config(&Category::Security, &CategoryConfigPatch::new().enabled(false), "sec-lead")
        .unwrap();
    let disabled = engine
        .resolve(&incident("INC-103", Category::Security, 0.99), "system")
        .await;
    assert_eq!(disabled.reason_code(), Some("CATEGORY_DISABLED"));

    engine
        .update_category_config(&Category::Network, &CategoryConfigPatch::new().threshold(0.97), "net-lead")
        .unwrap();
    let below = engine
        .resolve(&incident("INC-104", Category::Network, 0.95), "system")
        .await;
    assert_eq!(below.reason_code(), Some("CONFIDENCE_TOO_LOW"));

    let payments: Category = "payments".parse().unwrap();
    let unknown = engine
        .resolve(&incident("INC-105", payments.clone(), 0.99), "system")
        .await;
    assert_eq!(unknown.reason_code(), Some("INVALID_CATEGORY"));

    engine
        .update_category_config(&payments, &CategoryConfigPatch::new(), "platform")
        .unwrap();
    let onboarded = engine
        .resolve(&incident("INC-106", payments, 0.99), "system")
        .await;
    assert!(onboarded.is_success());
    assert_eq!(onboarded.steps.len(), 1);
    assert_eq!(onboarded.steps[0].action, "health_check");

    assert_eq!(executor.runs(), 1);
}

#[tokio::test]
async fn invalid_incident_is_rejected_and_audited() {
    let executor = Arc::new(ScriptedExecutor::succeeding());
    let engine = engine_with(
        executor.clone(),
        Arc::new(RecordingGateway::new()),
        Arc::new(InMemoryLedger::new()),
        fast_settings(),
    );

    let result = engine
        .resolve(&incident("INC-107", Category::Network, f64::NAN), "system")
        .await;
    assert_eq!(result.reason_code(), Some("INVALID_INCIDENT"));
    assert_eq!(engine.incident_trail("INC-107").unwrap().len(), 1);
    assert_eq!(executor.runs(), 0);
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let executor = Arc::new(ScriptedExecutor::with_script([
        ScriptedRun::TransientAt(1),
        ScriptedRun::TransientAt(2),
    ]));
    let engine = engine_with(
        executor.clone(),
        Arc::new(RecordingGateway::new()),
        Arc::new(InMemoryLedger::new()),
        fast_settings(),
    );

    let result = engine
        .resolve(&incident("INC-108", Category::Application, 0.95), "system")
        .await;

    assert_eq!(result.outcome, AttemptOutcome::Succeeded);
    let attempt = result.attempt.unwrap();
    assert_eq!(attempt.try_count(), 3);
    let outcomes: Vec<_> = attempt.tries.iter().map(|t| t.outcome).collect();
    assert_eq!(
        outcomes,
        [TryOutcome::RetryableFailure, TryOutcome::RetryableFailure, TryOutcome::Succeeded]
    );
    assert_eq!(attempt.tries[0].steps.len(), 2);
    assert_eq!(attempt.tries[1].steps.len(), 3);
    assert_eq!(executor.runs(), 3);
}

#[tokio::test]
async fn retry_budget_is_enforced() {
    let executor = Arc::new(ScriptedExecutor::succeeding().then(ScriptedRun::TransientAt(0)));
    let engine = engine_with(
        executor.clone(),
        Arc::new(RecordingGateway::new()),
        Arc::new(InMemoryLedger::new()),
        fast_settings(),
    );

    let result = engine
        .resolve(&incident("INC-109", Category::Database, 0.95), "system")
        .await;

    assert_eq!(result.outcome, AttemptOutcome::Failed);
    assert_eq!(result.failure.as_ref().unwrap().reason, FailureReason::RetriesExhausted);
    assert_eq!(executor.runs(), 4);

    let trail = engine.incident_trail("INC-109").unwrap();
    assert_eq!(
        kinds(&trail),
        [AuditActionKind::ResolutionAttempted, AuditActionKind::ResolutionFailed]
    );
    assert!(trail[1].detail.starts_with("RETRIES_EXHAUSTED"));
}

#[tokio::test]
async fn terminal_failure_is_not_retried() {
    let executor = Arc::new(ScriptedExecutor::with_script([ScriptedRun::TerminalAt(1)]));
    let engine = engine_with(
        executor.clone(),
        Arc::new(RecordingGateway::new()),
        Arc::new(InMemoryLedger::new()),
        fast_settings(),
    );

    let result = engine
        .resolve(&incident("INC-110", Category::Database, 0.95), "system")
        .await;

    let failure = result.failure.clone().unwrap();
    assert_eq!(failure.reason, FailureReason::StepFailed);
    assert!(failure.detail.contains("pool_clear"));
    assert_eq!(executor.runs(), 1);
    assert_eq!(result.steps[1].outcome, StepOutcome::Failed);
    assert_eq!(result.steps[1].error.as_deref(), Some("pool_clear broke"));
}

#[tokio::test]
async fn hung_executor_times_out_and_frees_slot() {
    let executor = Arc::new(ScriptedExecutor::with_script([ScriptedRun::Hang]));
    let mut settings = fast_settings();
    settings.runtime.execution_timeout_ms = 50;
    settings.global.max_concurrent_resolutions = 1;
    let engine = engine_with(
        executor.clone(),
        Arc::new(RecordingGateway::new()),
        Arc::new(InMemoryLedger::new()),
        settings,
    );

    let hung = engine
        .resolve(&incident("INC-111", Category::Network, 0.95), "system")
        .await;
    assert_eq!(hung.failure.unwrap().reason, FailureReason::ExecutionTimeout);
    assert_eq!(hung.attempt.unwrap().try_count(), 1);
    assert_eq!(engine.slots_in_flight(), 0);

    let next = engine
        .resolve(&incident("INC-112", Category::Network, 0.95), "system")
        .await;
    assert!(next.is_success());
}

#[tokio::test]
async fn executor_panic_is_contained() {
    let executor = Arc::new(ScriptedExecutor::with_script([ScriptedRun::Panic]));
    let engine = engine_with(
        executor.clone(),
        Arc::new(RecordingGateway::new()),
        Arc::new(InMemoryLedger::new()),
        fast_settings(),
    );

    let faulted = engine
        .resolve(&incident("INC-113", Category::Network, 0.95), "system")
        .await;
    let failure = faulted.failure.unwrap();
    assert_eq!(failure.reason, FailureReason::ExecutorFault);
    assert!(failure.detail.contains("scripted executor fault"));
    assert_eq!(engine.slots_in_flight(), 0);
    assert_eq!(engine.stats().running, 0);

    assert!(engine
        .resolve(&incident("INC-114", Category::Network, 0.95), "system")
        .await
        .is_success());
}

#[tokio::test]
async fn unaudited_success_is_reported_as_failure() {
    let executor = Arc::new(ScriptedExecutor::succeeding());
    let gateway = Arc::new(RecordingGateway::new());
    let ledger = Arc::new(FailingLedger::new().fail_on(AuditActionKind::ResolutionSucceeded));
    let engine = engine_with(executor.clone(), gateway.clone(), ledger.clone(), fast_settings());

    let result = engine
        .resolve(&incident("INC-115", Category::Database, 0.95), "system")
        .await;

    assert_eq!(executor.runs(), 1);
    assert_eq!(result.outcome, AttemptOutcome::Failed);
    assert_eq!(result.failure.unwrap().reason, FailureReason::AuditWriteFailed);
    assert_eq!(engine.slots_in_flight(), 0);

    engine.shutdown().await;
    assert!(gateway.delivered().is_empty());
    assert_eq!(
        kinds(&ledger.entries()),
        [AuditActionKind::ResolutionAttempted, AuditActionKind::ResolutionFailed]
    );
}

#[tokio::test]
async fn unaudited_attempt_never_executes() {
    let executor = Arc::new(ScriptedExecutor::succeeding());
    let ledger = Arc::new(FailingLedger::new().fail_on(AuditActionKind::ResolutionAttempted));
    let engine = engine_with(
        executor.clone(),
        Arc::new(RecordingGateway::new()),
        ledger.clone(),
        fast_settings(),
    );

    let result = engine
        .resolve(&incident("INC-116", Category::Database, 0.95), "system")
        .await;

    assert_eq!(result.failure.unwrap().reason, FailureReason::AuditWriteFailed);
    assert_eq!(executor.runs(), 0);
    assert_eq!(ledger.refused(), 1);
    assert_eq!(engine.slots_in_flight(), 0);
}

#[tokio::test]
async fn notification_failure_does_not_flip_outcome() {
    let gateway = Arc::new(RecordingGateway::refusing());
    let engine = engine_with(
        Arc::new(ScriptedExecutor::succeeding()),
        gateway.clone(),
        Arc::new(InMemoryLedger::new()),
        fast_settings(),
    );

    let result = engine
        .resolve(&incident("INC-117", Category::Network, 0.95), "system")
        .await;
    assert!(result.is_success());

    engine.shutdown().await;
    let trail = engine.incident_trail("INC-117").unwrap();
    let last = trail.last().unwrap();
    assert_eq!(last.action, AuditAction::NotificationFailed);
    assert!(last.detail.contains("gateway offline"));
}

#[tokio::test]
async fn notifications_follow_category_policy() {
    let gateway = Arc::new(RecordingGateway::new());
    let mut settings = fast_settings();
    settings.runtime.notify_on_failure = true;
    let executor = Arc::new(ScriptedExecutor::with_script([ScriptedRun::Succeed, ScriptedRun::TerminalAt(0)]));
    let engine = engine_with(executor, gateway.clone(), Arc::new(InMemoryLedger::new()), settings);

    engine
        .update_category_config(&Category::Network, &CategoryConfigPatch::new().notification(false), "ops")
        .unwrap();
    assert!(engine
        .resolve(&incident("INC-118", Category::Network, 0.95), "system")
        .await
        .is_success());

    let failed = engine
        .resolve(&incident("INC-119", Category::Database, 0.95), "system")
        .await;
    assert_eq!(failed.outcome, AttemptOutcome::Failed);

    engine.shutdown().await;
    let delivered = gateway.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].kind, NotificationKind::ResolutionFailed);
    assert_eq!(delivered[0].about, "INC-119");
    assert!(delivered[0].body.contains("STEP_FAILED"));
}

#[tokio::test]
async fn attempts_are_numbered_per_incident() {
    let engine = engine_with(
        Arc::new(ScriptedExecutor::succeeding()),
        Arc::new(RecordingGateway::new()),
        Arc::new(InMemoryLedger::new()),
        fast_settings(),
    );
    let inc = incident("INC-120", Category::Network, 0.95);
    let other = incident("INC-121", Category::Network, 0.95);

    let first = engine.resolve(&inc, "system").await.attempt.unwrap();
    let second = engine.resolve(&inc, "system").await.attempt.unwrap();
    let unrelated = engine.resolve(&other, "system").await.attempt.unwrap();

    assert_eq!(first.attempt_number, 1);
    assert_eq!(second.attempt_number, 2);
    assert_eq!(unrelated.attempt_number, 1);
    assert_ne!(first.id, second.id);
}

#[tokio::test]
async fn batch_results_keep_input_order() {
    let engine = engine_with(
        Arc::new(ScriptedExecutor::succeeding()),
        Arc::new(RecordingGateway::new()),
        Arc::new(InMemoryLedger::new()),
        fast_settings(),
    );
    let incidents = vec![
        incident("INC-130", Category::Network, 0.95),
        incident("INC-131", Category::Network, 0.50),
        incident("INC-132", Category::Database, 0.99),
    ];

    let results = engine.batch_resolve(&incidents, "batch").await;
    let ids: Vec<_> = results.iter().map(|r| r.incident_id.as_str()).collect();
    assert_eq!(ids, ["INC-130", "INC-131", "INC-132"]);
    assert_eq!(results[1].outcome, AttemptOutcome::Rejected);
    assert!(results[0].is_success() && results[2].is_success());
}

#[tokio::test]
async fn capacity_wait_times_out_as_rejection() {
    let executor = Arc::new(ScriptedExecutor::succeeding().with_step_delay(Duration::from_millis(100)));
    let mut settings = fast_settings();
    settings.global.max_concurrent_resolutions = 1;
    settings.runtime.capacity_wait_ms = 10;
    let engine = engine_with(
        executor.clone(),
        Arc::new(RecordingGateway::new()),
        Arc::new(InMemoryLedger::new()),
        settings,
    );

    let first = incident("INC-140", Category::Network, 0.95);
    let second = incident("INC-141", Category::Network, 0.95);
    let (a, b) = tokio::join!(engine.resolve(&first, "system"), engine.resolve(&second, "system"));

    assert!(a.is_success());
    assert_eq!(b.reason_code(), Some("CAPACITY_EXCEEDED"));
    assert_eq!(executor.runs(), 1);
    assert_eq!(
        engine.incident_trail("INC-141").unwrap()[0].action,
        AuditAction::ResolutionRejected(RejectionReason::CapacityExceeded)
    );
}

#[tokio::test]
async fn batch_larger_than_capacity_admits_every_item() {
    let executor = Arc::new(ScriptedExecutor::succeeding().with_step_delay(Duration::from_millis(30)));
    let mut settings = fast_settings();
    settings.global.max_concurrent_resolutions = 1;
    settings.runtime.capacity_wait_ms = 50;
    let engine = engine_with(
        executor.clone(),
        Arc::new(RecordingGateway::new()),
        Arc::new(InMemoryLedger::new()),
        settings,
    );
    let incidents: Vec<_> = (0..4)
        .map(|n| incident(&format!("INC-16{n}"), Category::Database, 0.95))
        .collect();

    let results = engine.batch_resolve(&incidents, "batch").await;

    let codes: Vec<_> = results.iter().map(|r| r.reason_code()).collect();
    assert_eq!(codes, [None, None, None, None]);
    assert!(results.iter().all(|r| r.is_success()));
    assert_eq!(executor.runs(), 4);
    assert_eq!(executor.peak_in_flight(), 1);
}

#[tokio::test]
async fn dropped_resolve_releases_slot() {
    let executor = Arc::new(ScriptedExecutor::with_script([ScriptedRun::Hang]));
    let ledger = Arc::new(InMemoryLedger::new());
    let mut settings = fast_settings();
    settings.global.max_concurrent_resolutions = 1;
    let engine = engine_with(executor.clone(), Arc::new(RecordingGateway::new()), ledger, settings);

    let abandoned = incident("INC-170", Category::Network, 0.95);
    let timed_out = tokio::time::timeout(Duration::from_millis(50), engine.resolve(&abandoned, "system")).await;
    assert!(timed_out.is_err());

    assert_eq!(engine.slots_in_flight(), 0);
    assert_eq!(engine.stats().running, 0);
    assert_eq!(
        kinds(&engine.incident_trail("INC-170").unwrap()),
        [AuditActionKind::ResolutionAttempted]
    );

    // The freed slot is usable by the next caller
    let next = engine
        .resolve(&incident("INC-171", Category::Network, 0.95), "system")
        .await;
    assert!(next.is_success());
    assert_eq!(executor.runs(), 2);
}

#[tokio::test]
async fn audit_queries_paginate() {
    let engine = engine_with(
        Arc::new(ScriptedExecutor::succeeding()),
        Arc::new(RecordingGateway::new()),
        Arc::new(InMemoryLedger::new()),
        fast_settings(),
    );
    for n in 0..5 {
        engine
            .resolve(&incident(&format!("INC-15{n}"), Category::Network, 0.50), "system")
            .await;
    }

    let filter = AuditFilter::new()
        .kind(AuditActionKind::ResolutionRejected)
        .limit(2);
    let first = engine.query_audit(&filter).unwrap();
    assert_eq!(first.entries.len(), 2);
    let cursor = first.next_cursor.unwrap();

    let second = engine.query_audit(&filter.clone().after(cursor)).unwrap();
    assert_eq!(second.entries.len(), 2);
    assert!(second.entries[0].sequence > cursor);

    let third = engine
        .query_audit(&filter.after(second.next_cursor.unwrap()))
        .unwrap();
    assert_eq!(third.entries.len(), 1);
    assert!(third.next_cursor.is_none());
}

#[tokio::test]
async fn invalid_config_update_is_refused_and_audited() {
    let engine = engine_with(
        Arc::new(ScriptedExecutor::succeeding()),
        Arc::new(RecordingGateway::new()),
        Arc::new(InMemoryLedger::new()),
        fast_settings(),
    );

    let err = engine
        .update_global_config(&GlobalConfigPatch::new().threshold(1.5), "ops", "tighten")
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidConfig(_)));
    assert!((engine.get_global_config().default_confidence_threshold - 0.90).abs() < f64::EPSILON);

    let rejected = engine
        .query_audit(&AuditFilter::new().kind(AuditActionKind::ResolutionRejected))
        .unwrap();
    assert_eq!(rejected.entries.len(), 1);
    assert_eq!(
        rejected.entries[0].action,
        AuditAction::ResolutionRejected(RejectionReason::InvalidConfig)
    );
}

#[tokio::test]
async fn custom_step_plan_is_used() {
    let executor = Arc::new(ScriptedExecutor::succeeding());
    let catalog = StepCatalog::standard().with_plan(
        Category::Security,
        vec![
            PlannedStep::new("revoke_sessions", "Revoke active sessions"),
            PlannedStep::new("rotate_keys", "Rotate credentials"),
        ],
    );
    let engine = autores_engine::AutoResolutionEngine::builder(executor, Arc::new(RecordingGateway::new()))
        .settings(fast_settings())
        .catalog(catalog)
        .build()
        .unwrap();

    let result = engine
        .resolve(&incident("INC-160", Category::Security, 0.95), "system")
        .await;
    let actions: Vec<_> = result.steps.iter().map(|s| s.action.as_str()).collect();
    assert_eq!(actions, ["revoke_sessions", "rotate_keys"]);
}

#[tokio::test]
async fn file_ledger_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");

    {
        let ledger = Arc::new(FileLedger::open(&path).unwrap());
        let engine = engine_with(
            Arc::new(ScriptedExecutor::succeeding()),
            Arc::new(RecordingGateway::new()),
            ledger,
            fast_settings(),
        );
        engine
            .resolve(&incident("INC-170", Category::Database, 0.95), "system")
            .await;
        engine.shutdown().await;
    }

    let reopened = FileLedger::open(&path).unwrap();
    assert!(reopened.verify_integrity().is_ok());
    let trail = reopened
        .query_all(&AuditFilter::new().subject("INC-170"))
        .unwrap();
    assert_eq!(trail.len(), 3);
    assert_eq!(trail[1].action, AuditAction::ResolutionSucceeded);
}
