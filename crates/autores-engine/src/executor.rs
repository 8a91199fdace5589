//! Resolution executor capability and step catalog
//!
//! The engine never performs remediation itself. It hands a `StepPlan` to a
//! `ResolutionExecutor` and records each step as it completes.

use crate::types::{Incident, ResolutionStep, StepOutcome};
use async_trait::async_trait;
use autores_config::Category;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One step the executor is asked to perform
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlannedStep {
    /// Action identifier understood by the executor
    pub action: String,
    pub description: String,
}

impl PlannedStep {
    pub fn new(action: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            description: description.into(),
        }
    }
}

/// Ordered steps for one incident
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepPlan {
    pub category: Category,
    pub steps: Vec<PlannedStep>,
}

impl StepPlan {
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Step failure as classified by the executor
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepFailure {
    /// Worth retrying the whole plan
    #[error("transient: {0}")]
    Transient(String),
    /// Retrying will not help
    #[error("terminal: {0}")]
    Terminal(String),
}

impl StepFailure {
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Transient(m) | Self::Terminal(m) => m,
        }
    }
}

/// How a run over the plan ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed {
        step_index: usize,
        failure: StepFailure,
    },
}

/// Collects step outcomes as they complete
///
/// Lives outside the executor future, so steps finished before a timeout or
/// panic are still part of the attempt record.
#[derive(Debug)]
pub struct StepRecorder {
    incident_id: String,
    try_number: u32,
    steps: Mutex<Vec<ResolutionStep>>,
}

impl StepRecorder {
    #[must_use]
    pub fn new(incident_id: &str, try_number: u32) -> Self {
        Self {
            incident_id: incident_id.to_string(),
            try_number,
            steps: Mutex::new(Vec::new()),
        }
    }

    /// Record a step as started
    pub fn begin(&self, index: usize, step: &PlannedStep) {
        self.steps.lock().push(ResolutionStep {
            index,
            description: step.description.clone(),
            action: step.action.clone(),
            outcome: StepOutcome::Pending,
            error: None,
            completed_at: None,
        });
    }

    /// Record a started step as succeeded
    pub fn succeed(&self, index: usize) {
        self.finish(index, StepOutcome::Success, None);
    }

    /// Record a started step as failed
    pub fn fail(&self, index: usize, error: &str) {
        self.finish(index, StepOutcome::Failed, Some(error.to_string()));
    }

    fn finish(&self, index: usize, outcome: StepOutcome, error: Option<String>) {
        let mut steps = self.steps.lock();
        if let Some(step) = steps.iter_mut().rev().find(|s| s.index == index) {
            step.outcome = outcome;
            step.error = error;
            step.completed_at = Some(Utc::now());
            tracing::debug!(
                incident_id = %self.incident_id,
                try_number = self.try_number,
                step = index,
                action = %step.action,
                ?outcome,
                "step finished"
            );
        }
    }

    /// Copy of the steps recorded so far
    #[must_use]
    pub fn snapshot(&self) -> Vec<ResolutionStep> {
        self.steps.lock().clone()
    }

    #[must_use]
    pub fn into_steps(self) -> Vec<ResolutionStep> {
        self.steps.into_inner()
    }
}

/// Runs resolution steps for an incident
#[async_trait]
pub trait ResolutionExecutor: Send + Sync {
    /// Perform one step
    async fn execute_step(&self, incident: &Incident, step: &PlannedStep) -> Result<(), StepFailure>;

    /// Perform the plan in order, stopping at the first failed step
    async fn run(&self, incident: &Incident, plan: &StepPlan, recorder: &StepRecorder) -> RunOutcome {
        for (index, step) in plan.steps.iter().enumerate() {
            recorder.begin(index, step);
            match self.execute_step(incident, step).await {
                Ok(()) => recorder.succeed(index),
                Err(failure) => {
                    recorder.fail(index, failure.message());
                    return RunOutcome::Failed {
                        step_index: index,
                        failure,
                    };
                }
            }
        }
        RunOutcome::Completed
    }
}

/// Default step plans per category, with overrides
#[derive(Debug, Clone)]
pub struct StepCatalog {
    plans: HashMap<Category, Vec<PlannedStep>>,
    fallback: Vec<PlannedStep>,
}

impl StepCatalog {
    /// Catalog with the standard plans
    #[must_use]
    pub fn standard() -> Self {
        let mut plans = HashMap::new();
        plans.insert(
            Category::Network,
            vec![
                PlannedStep::new("ping_check", "Check network connectivity"),
                PlannedStep::new("service_restart", "Restart network service"),
                PlannedStep::new("health_check", "Verify service health"),
            ],
        );
        plans.insert(
            Category::Database,
            vec![
                PlannedStep::new("connection_check", "Check database connection"),
                PlannedStep::new("pool_clear", "Clear connection pool"),
                PlannedStep::new("health_check", "Verify database health"),
            ],
        );
        plans.insert(
            Category::Application,
            vec![
                PlannedStep::new("log_check", "Analyze application logs"),
                PlannedStep::new("service_restart", "Restart application service"),
                PlannedStep::new("health_check", "Verify application health"),
            ],
        );
        Self {
            plans,
            fallback: vec![PlannedStep::new("health_check", "Generic health check")],
        }
    }

    /// Replace the plan for one category
    #[must_use]
    pub fn with_plan(mut self, category: Category, steps: Vec<PlannedStep>) -> Self {
        self.plans.insert(category, steps);
        self
    }

    /// Plan for a category, falling back to the generic health check
    #[must_use]
    pub fn plan_for(&self, category: &Category) -> StepPlan {
        StepPlan {
            category: category.clone(),
            steps: self
                .plans
                .get(category)
                .cloned()
                .unwrap_or_else(|| self.fallback.clone()),
        }
    }
}

impl Default for StepCatalog {
    fn default() -> Self {
        Self::standard()
    }
}
