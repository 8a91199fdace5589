//! Audited configuration store
//!
//! Readers clone an `Arc<ConfigSnapshot>` and never see a half-applied
//! change. Writers are serialized; each builds a new snapshot, records the
//! change in the ledger, and only then publishes the snapshot.

use crate::category::Category;
use crate::error::ConfigError;
use crate::settings::Settings;
use crate::types::{
    CategoryConfig, CategoryConfigPatch, ConfigSnapshot, GlobalConfig, GlobalConfigPatch,
};
use autores_ledger::{AuditAction, AuditDraft, AuditLedger, RejectionReason};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;

/// Audit subject for global configuration changes
pub const GLOBAL_SUBJECT: &str = "global";

/// Holder of the live configuration
pub struct ConfigStore {
    current: RwLock<Arc<ConfigSnapshot>>,
    /// Serializes writers so ledger order matches publish order
    writer: Mutex<()>,
    ledger: Arc<dyn AuditLedger>,
}

impl fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigStore")
            .field("current", &*self.current.read())
            .finish_non_exhaustive()
    }
}

impl ConfigStore {
    /// Store with built-in defaults
    #[must_use]
    pub fn new(ledger: Arc<dyn AuditLedger>) -> Self {
        Self::with_snapshot_unchecked(ConfigSnapshot::defaults(), ledger)
    }

    /// Store seeded from loaded settings
    ///
    /// # Errors
    /// Validation failure of the seeded values
    pub fn from_settings(settings: &Settings, ledger: Arc<dyn AuditLedger>) -> Result<Self, ConfigError> {
        Self::with_snapshot(settings.initial_snapshot(), ledger)
    }

    /// Store seeded with an explicit snapshot
    ///
    /// # Errors
    /// Validation failure of the seeded values
    pub fn with_snapshot(snapshot: ConfigSnapshot, ledger: Arc<dyn AuditLedger>) -> Result<Self, ConfigError> {
        snapshot.validate()?;
        Ok(Self::with_snapshot_unchecked(snapshot, ledger))
    }

    fn with_snapshot_unchecked(snapshot: ConfigSnapshot, ledger: Arc<dyn AuditLedger>) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
            ledger,
        }
    }

    /// Current consistent snapshot
    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Copy of the global configuration
    #[must_use]
    pub fn get_global(&self) -> GlobalConfig {
        self.snapshot().global.clone()
    }

    /// Copy of one category's configuration
    ///
    /// # Errors
    /// `ConfigError::UnknownCategory` if the category was never registered
    pub fn get_category(&self, category: &Category) -> Result<CategoryConfig, ConfigError> {
        self.snapshot()
            .category(category)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownCategory(category.to_string()))
    }

    /// Copies of all category configurations, ordered by category
    #[must_use]
    pub fn categories(&self) -> Vec<CategoryConfig> {
        self.snapshot().categories.values().cloned().collect()
    }

    /// Apply a partial global update
    ///
    /// Turning the kill switch on through this path also requires a reason.
    ///
    /// # Errors
    /// - `ConfigError::InvalidConfig` / `ReasonRequired` (audited as rejections)
    /// - `ConfigError::AuditWriteFailed` (nothing published)
    pub fn update_global(
        &self,
        patch: &GlobalConfigPatch,
        actor: &str,
        reason: &str,
    ) -> Result<GlobalConfig, ConfigError> {
        self.apply_global(patch, actor, Some(reason), None)
    }

    /// Turn the kill switch on; `reason` must be non-blank
    ///
    /// # Errors
    /// As [`ConfigStore::update_global`]
    pub fn activate_kill_switch(&self, actor: &str, reason: &str) -> Result<GlobalConfig, ConfigError> {
        self.apply_global(
            &GlobalConfigPatch::new().kill_switch(true),
            actor,
            Some(reason),
            Some(AuditAction::KillSwitchActivated),
        )
    }

    /// Turn the kill switch off
    ///
    /// # Errors
    /// As [`ConfigStore::update_global`]
    pub fn deactivate_kill_switch(&self, actor: &str, reason: Option<&str>) -> Result<GlobalConfig, ConfigError> {
        self.apply_global(
            &GlobalConfigPatch::new().kill_switch(false),
            actor,
            reason,
            Some(AuditAction::KillSwitchDeactivated),
        )
    }

    fn apply_global(
        &self,
        patch: &GlobalConfigPatch,
        actor: &str,
        reason: Option<&str>,
        action: Option<AuditAction>,
    ) -> Result<GlobalConfig, ConfigError> {
        let _writer = self.writer.lock();
        let current = self.snapshot();
        let next = patch.apply(&current.global);
        let reason = reason.map(str::trim).unwrap_or_default();

        let action = action.unwrap_or(
            match (current.global.kill_switch_active, next.kill_switch_active) {
                (false, true) => AuditAction::KillSwitchActivated,
                (true, false) => AuditAction::KillSwitchDeactivated,
                _ => AuditAction::ConfigUpdated,
            },
        );

        let checked = next.validate().and_then(|()| {
            if action == AuditAction::KillSwitchActivated && reason.is_empty() {
                Err(ConfigError::ReasonRequired)
            } else {
                Ok(())
            }
        });
        if let Err(e) = checked {
            self.audit_rejected(GLOBAL_SUBJECT, actor, serde_json::to_value(patch)?, &e);
            return Err(e);
        }

        let draft = AuditDraft::new(actor, action, GLOBAL_SUBJECT)
            .with_change(
                Some(serde_json::to_value(&current.global)?),
                Some(serde_json::to_value(&next)?),
            )
            .with_detail(reason);
        self.ledger.append(draft)?;

        self.publish(ConfigSnapshot {
            version: current.version + 1,
            global: next.clone(),
            categories: current.categories.clone(),
        });

        match action {
            AuditAction::KillSwitchActivated => {
                tracing::warn!(actor, reason, "kill switch activated");
            }
            AuditAction::KillSwitchDeactivated => {
                tracing::info!(actor, "kill switch deactivated");
            }
            _ => tracing::info!(actor, reason, config = ?next, "global configuration updated"),
        }
        Ok(next)
    }

    /// Upsert one category's configuration
    ///
    /// An unregistered category is created from defaults and then patched.
    ///
    /// # Errors
    /// - `ConfigError::InvalidConfig` (audited as a rejection)
    /// - `ConfigError::AuditWriteFailed` (nothing published)
    pub fn update_category(
        &self,
        category: &Category,
        patch: &CategoryConfigPatch,
        actor: &str,
    ) -> Result<CategoryConfig, ConfigError> {
        let _writer = self.writer.lock();
        let current = self.snapshot();
        let subject = category.config_subject();

        let before = current.category(category).cloned();
        let base = before
            .clone()
            .unwrap_or_else(|| CategoryConfig::new(category.clone()));
        let next = patch.apply(&base);

        if let Err(e) = next.validate() {
            self.audit_rejected(&subject, actor, serde_json::to_value(patch)?, &e);
            return Err(e);
        }

        let detail = if before.is_some() {
            "category configuration updated"
        } else {
            "category onboarded"
        };
        let draft = AuditDraft::new(actor, AuditAction::ConfigUpdated, &subject)
            .with_change(
                before.as_ref().map(serde_json::to_value).transpose()?,
                Some(serde_json::to_value(&next)?),
            )
            .with_detail(detail);
        self.ledger.append(draft)?;

        let mut categories = current.categories.clone();
        categories.insert(category.clone(), next.clone());
        self.publish(ConfigSnapshot {
            version: current.version + 1,
            global: current.global.clone(),
            categories,
        });

        tracing::info!(actor, category = %category, onboarded = before.is_none(), "category configuration updated");
        Ok(next)
    }

    fn publish(&self, snapshot: ConfigSnapshot) {
        *self.current.write() = Arc::new(snapshot);
    }

    fn audit_rejected(&self, subject: &str, actor: &str, attempted: serde_json::Value, error: &ConfigError) {
        tracing::warn!(actor, subject, error = %error, "configuration update rejected");
        let draft = AuditDraft::new(
            actor,
            AuditAction::ResolutionRejected(RejectionReason::InvalidConfig),
            subject,
        )
        .with_change(None, Some(attempted))
        .with_detail(error.to_string());
        if let Err(e) = self.ledger.append(draft) {
            tracing::error!(error = %e, subject, "failed to audit rejected configuration update");
        }
    }
}
