//! Notification gateway and background dispatcher
//!
//! Notifications are best-effort: the engine enqueues them and moves on. A
//! background task delivers each one under a timeout and records the outcome
//! in the audit ledger as `NOTIFICATION_SENT` or `NOTIFICATION_FAILED`.

use crate::error::NotifyError;
use crate::types::{Incident, ResolutionAttempt, StepOutcome};
use async_trait::async_trait;
use autores_config::GLOBAL_SUBJECT;
use autores_ledger::{AuditAction, AuditDraft, AuditLedger};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use ulid::Ulid;

/// Actor recorded for dispatcher audit entries
pub const DISPATCHER_ACTOR: &str = "notification-dispatcher";

/// Recipient of operator alerts
pub const OPERATIONS_RECIPIENT: &str = "operations";

/// Delivery channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    InApp,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Email => "email",
            Self::InApp => "in_app",
        })
    }
}

/// What the notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    AutoResolved,
    ResolutionFailed,
    KillSwitchActivated,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AutoResolved => "auto_resolved",
            Self::ResolutionFailed => "resolution_failed",
            Self::KillSwitchActivated => "kill_switch_activated",
        })
    }
}

/// Outbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Ulid,
    pub kind: NotificationKind,
    /// Incident id, or `global` for operator alerts; used as the audit subject
    pub about: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub channels: Vec<Channel>,
    pub reopen_link: Option<String>,
    pub rating_link: Option<String>,
}

impl Notification {
    /// Resolution summary sent to the incident creator after success
    #[must_use]
    pub fn auto_resolved(incident: &Incident, attempt: &ResolutionAttempt, base_url: &str) -> Self {
        let mut body = format!(
            "Your incident \"{}\" was resolved automatically.\n",
            incident.title
        );
        write_step_summary(&mut body, attempt);
        body.push_str("\nIf the problem persists, reopen the incident using the link below.");

        let base = base_url.trim_end_matches('/');
        Self {
            id: Ulid::new(),
            kind: NotificationKind::AutoResolved,
            about: incident.id.clone(),
            recipient: incident.created_by.clone(),
            subject: format!("Incident {} Auto-Resolved", incident.id),
            body,
            channels: vec![Channel::Email, Channel::InApp],
            reopen_link: Some(format!("{base}/{}/reopen?attempt={}", incident.id, attempt.id)),
            rating_link: Some(format!("{base}/{}/rate?attempt={}", incident.id, attempt.id)),
        }
    }

    /// Failure summary sent to the incident creator
    #[must_use]
    pub fn resolution_failed(incident: &Incident, attempt: &ResolutionAttempt) -> Self {
        let mut body = format!(
            "Automatic resolution of \"{}\" did not complete; the incident stays open.\n",
            incident.title
        );
        if let Some(failure) = &attempt.failure {
            let _ = writeln!(body, "Reason: {} ({})", failure.reason, failure.detail);
        }
        write_step_summary(&mut body, attempt);

        Self {
            id: Ulid::new(),
            kind: NotificationKind::ResolutionFailed,
            about: incident.id.clone(),
            recipient: incident.created_by.clone(),
            subject: format!("Incident {} Auto-Resolution Failed", incident.id),
            body,
            channels: vec![Channel::Email, Channel::InApp],
            reopen_link: None,
            rating_link: None,
        }
    }

    /// Operator alert for a kill-switch activation
    #[must_use]
    pub fn kill_switch_alert(actor: &str, reason: &str) -> Self {
        Self {
            id: Ulid::new(),
            kind: NotificationKind::KillSwitchActivated,
            about: GLOBAL_SUBJECT.to_string(),
            recipient: OPERATIONS_RECIPIENT.to_string(),
            subject: "Auto-Resolution Kill Switch Activated".to_string(),
            body: format!("Auto-resolution was halted by {actor}.\nReason: {reason}"),
            channels: vec![Channel::Email, Channel::InApp],
            reopen_link: None,
            rating_link: None,
        }
    }

    fn channel_list(&self) -> String {
        self.channels
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn write_step_summary(body: &mut String, attempt: &ResolutionAttempt) {
    let steps = attempt.final_steps();
    let ok = steps.iter().filter(|s| s.outcome == StepOutcome::Success).count();
    let failed = steps.iter().filter(|s| s.outcome == StepOutcome::Failed).count();
    let _ = writeln!(
        body,
        "Steps executed: {} ({ok} successful, {failed} failed, {} tries)",
        steps.len(),
        attempt.try_count()
    );
    for step in steps {
        let status = match step.outcome {
            StepOutcome::Success => "ok",
            StepOutcome::Failed => "failed",
            StepOutcome::Pending => "incomplete",
        };
        let _ = writeln!(body, "  {}. {} [{status}]", step.index + 1, step.description);
    }
}

/// Delivers notifications to people
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    /// Deliver one notification
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Gateway that only logs; used by the CLI
#[derive(Debug, Clone, Copy, Default)]
pub struct LogGateway;

#[async_trait]
impl NotificationGateway for LogGateway {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::debug!(
            notification_id = %notification.id,
            kind = %notification.kind,
            recipient = %notification.recipient,
            subject = %notification.subject,
            "notification delivered"
        );
        Ok(())
    }
}

/// Bounded queue plus background delivery task
pub struct NotificationDispatcher {
    sender: Mutex<Option<mpsc::Sender<Notification>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    ledger: Arc<dyn AuditLedger>,
}

impl fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("open", &self.sender.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl NotificationDispatcher {
    /// Start the delivery task; must be called inside a tokio runtime
    #[must_use]
    pub fn spawn(
        gateway: Arc<dyn NotificationGateway>,
        ledger: Arc<dyn AuditLedger>,
        capacity: usize,
        timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(delivery_task(rx, gateway, Arc::clone(&ledger), timeout));
        Self {
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            ledger,
        }
    }

    /// Enqueue without waiting; returns whether the notification was queued
    ///
    /// A full or closed queue is audited as a failed notification.
    pub fn dispatch(&self, notification: Notification) -> bool {
        let sender = self.sender.lock().clone();
        let Some(sender) = sender else {
            record_failure(self.ledger.as_ref(), &notification, &NotifyError::Closed);
            return false;
        };
        match sender.try_send(notification) {
            Ok(()) => true,
            Err(TrySendError::Full(n)) => {
                record_failure(self.ledger.as_ref(), &n, &NotifyError::QueueFull);
                false
            }
            Err(TrySendError::Closed(n)) => {
                record_failure(self.ledger.as_ref(), &n, &NotifyError::Closed);
                false
            }
        }
    }

    /// Close the queue and wait for queued notifications to finish
    pub async fn shutdown(&self) {
        drop(self.sender.lock().take());
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "notification worker terminated abnormally");
            }
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.sender.lock().is_some()
    }
}

/// Delivery loop (runs in separate tokio task)
async fn delivery_task(
    mut rx: mpsc::Receiver<Notification>,
    gateway: Arc<dyn NotificationGateway>,
    ledger: Arc<dyn AuditLedger>,
    timeout: Duration,
) {
    while let Some(notification) = rx.recv().await {
        let result = match tokio::time::timeout(timeout, gateway.notify(&notification)).await {
            Ok(result) => result,
            Err(_) => Err(NotifyError::Timeout(timeout)),
        };
        match result {
            Ok(()) => record_sent(ledger.as_ref(), &notification),
            Err(e) => record_failure(ledger.as_ref(), &notification, &e),
        }
    }
    tracing::debug!("notification queue drained");
}

fn record_sent(ledger: &dyn AuditLedger, notification: &Notification) {
    let draft = AuditDraft::new(DISPATCHER_ACTOR, AuditAction::NotificationSent, &notification.about)
        .with_detail(format!(
            "{} sent to {} via {}",
            notification.kind,
            notification.recipient,
            notification.channel_list()
        ))
        .with_after(json!({
            "notification_id": notification.id.to_string(),
            "kind": notification.kind,
            "recipient": notification.recipient,
        }));
    if let Err(e) = ledger.append(draft) {
        tracing::error!(error = %e, notification_id = %notification.id, "failed to audit notification");
    }
}

fn record_failure(ledger: &dyn AuditLedger, notification: &Notification, error: &NotifyError) {
    tracing::warn!(
        notification_id = %notification.id,
        kind = %notification.kind,
        recipient = %notification.recipient,
        error = %error,
        "notification not delivered"
    );
    let draft = AuditDraft::new(DISPATCHER_ACTOR, AuditAction::NotificationFailed, &notification.about)
        .with_detail(format!("{} to {}: {error}", notification.kind, notification.recipient))
        .with_after(json!({
            "notification_id": notification.id.to_string(),
            "kind": notification.kind,
            "recipient": notification.recipient,
        }));
    if let Err(e) = ledger.append(draft) {
        tracing::error!(error = %e, notification_id = %notification.id, "failed to audit notification");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExecutionTry, ResolutionStep, TryOutcome};
    use autores_config::Category;
    use autores_ledger::{AuditActionKind, AuditFilter, InMemoryLedger};

    struct Refuse;

    #[async_trait]
    impl NotificationGateway for Refuse {
        async fn notify(&self, _n: &Notification) -> Result<(), NotifyError> {
            Err(NotifyError::DeliveryFailed("mailbox full".to_string()))
        }
    }

    struct Stall;

    #[async_trait]
    impl NotificationGateway for Stall {
        async fn notify(&self, _n: &Notification) -> Result<(), NotifyError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    fn finished_attempt(incident: &Incident) -> ResolutionAttempt {
        let mut attempt = ResolutionAttempt::start(incident, "system", 1, 0.9);
        attempt.tries.push(ExecutionTry {
            number: 1,
            steps: vec![ResolutionStep {
                index: 0,
                description: "Check database connection".to_string(),
                action: "connection_check".to_string(),
                outcome: StepOutcome::Success,
                error: None,
                completed_at: None,
            }],
            outcome: TryOutcome::Succeeded,
            error: None,
        });
        attempt.succeed();
        attempt
    }

    #[test]
    fn success_notification_content() {
        let incident =
            Incident::new("INC-7", "db slow", Category::Database, 0.95).with_creator("u-42");
        let attempt = finished_attempt(&incident);
        let n = Notification::auto_resolved(&incident, &attempt, "https://desk.example/incidents/");

        assert_eq!(n.subject, "Incident INC-7 Auto-Resolved");
        assert_eq!(n.recipient, "u-42");
        assert_eq!(n.channels, vec![Channel::Email, Channel::InApp]);
        assert!(n.body.contains("Steps executed: 1 (1 successful, 0 failed, 1 tries)"));
        assert!(n.body.contains("1. Check database connection [ok]"));
        assert_eq!(
            n.reopen_link.as_deref(),
            Some(format!("https://desk.example/incidents/INC-7/reopen?attempt={}", attempt.id).as_str())
        );
        assert!(n.rating_link.unwrap().contains("/INC-7/rate"));
    }

    #[tokio::test]
    async fn delivered_notifications_are_audited() {
        let ledger = Arc::new(InMemoryLedger::new());
        let dispatcher =
            NotificationDispatcher::spawn(Arc::new(LogGateway), ledger.clone(), 8, Duration::from_secs(1));

        assert!(dispatcher.dispatch(Notification::kill_switch_alert("ops", "bad deploy")));
        dispatcher.shutdown().await;

        let page = ledger
            .query(&AuditFilter::new().kind(AuditActionKind::NotificationSent))
            .unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].subject, GLOBAL_SUBJECT);
    }

    #[tokio::test]
    async fn gateway_failure_is_audited() {
        let ledger = Arc::new(InMemoryLedger::new());
        let dispatcher =
            NotificationDispatcher::spawn(Arc::new(Refuse), ledger.clone(), 8, Duration::from_secs(1));

        dispatcher.dispatch(Notification::kill_switch_alert("ops", "drill"));
        dispatcher.shutdown().await;

        let entries = ledger.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::NotificationFailed);
        assert!(entries[0].detail.contains("mailbox full"));
    }

    #[tokio::test]
    async fn slow_gateway_times_out() {
        let ledger = Arc::new(InMemoryLedger::new());
        let dispatcher =
            NotificationDispatcher::spawn(Arc::new(Stall), ledger.clone(), 8, Duration::from_millis(50));

        dispatcher.dispatch(Notification::kill_switch_alert("ops", "drill"));
        dispatcher.shutdown().await;

        let entries = ledger.entries();
        assert_eq!(entries[0].action, AuditAction::NotificationFailed);
        assert!(entries[0].detail.contains("timed out"));
    }

    #[tokio::test]
    async fn dispatch_after_shutdown_is_audited_as_failed() {
        let ledger = Arc::new(InMemoryLedger::new());
        let dispatcher =
            NotificationDispatcher::spawn(Arc::new(LogGateway), ledger.clone(), 8, Duration::from_secs(1));
        dispatcher.shutdown().await;

        assert!(!dispatcher.is_open());
        assert!(!dispatcher.dispatch(Notification::kill_switch_alert("ops", "late")));
        assert_eq!(ledger.entries()[0].action, AuditAction::NotificationFailed);
    }
}
