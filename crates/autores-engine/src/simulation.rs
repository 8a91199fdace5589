//! Seeded workload simulation
//!
//! Drives the engine with random incidents against a simulated executor and
//! checks the properties that must hold under any workload:
//! - Running attempts never exceed the configured capacity
//! - Every request leaves an audit entry for its incident
//! - The audit hash chain verifies
//! - Every slot is released once the workload drains

use crate::engine::AutoResolutionEngine;
use crate::error::EngineError;
use crate::executor::{PlannedStep, ResolutionExecutor, StepFailure};
use crate::notify::LogGateway;
use crate::types::{AttemptOutcome, Incident, Priority};
use async_trait::async_trait;
use autores_config::{Category, Settings};
use autores_ledger::{AuditLedger, InMemoryLedger};
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Executor whose step outcomes are drawn from a seeded RNG
#[derive(Debug)]
pub struct SimulatedExecutor {
    rng: Mutex<StdRng>,
    transient_rate: f64,
    terminal_rate: f64,
    step_delay: Duration,
}

impl SimulatedExecutor {
    #[must_use]
    pub fn new(seed: u64, transient_rate: f64, terminal_rate: f64, step_delay: Duration) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            transient_rate: transient_rate.clamp(0.0, 1.0),
            terminal_rate: terminal_rate.clamp(0.0, 1.0),
            step_delay,
        }
    }
}

#[async_trait]
impl ResolutionExecutor for SimulatedExecutor {
    async fn execute_step(&self, _incident: &Incident, step: &PlannedStep) -> Result<(), StepFailure> {
        let roll: f64 = self.rng.lock().random();
        if !self.step_delay.is_zero() {
            tokio::time::sleep(self.step_delay).await;
        }
        if roll < self.terminal_rate {
            Err(StepFailure::Terminal(format!("{} reported an unrecoverable error", step.action)))
        } else if roll < self.terminal_rate + self.transient_rate {
            Err(StepFailure::Transient(format!("{} timed out", step.action)))
        } else {
            Ok(())
        }
    }
}

/// Simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    pub incidents: usize,
    /// Overrides `max_concurrent_resolutions`
    pub capacity: usize,
    /// Chance a step fails transiently
    pub transient_rate: f64,
    /// Chance a step fails terminally
    pub terminal_rate: f64,
    pub step_delay_ms: u64,
    /// Activate the kill switch after this many incidents, then lift it
    pub kill_switch_after: Option<usize>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            incidents: 200,
            capacity: 4,
            transient_rate: 0.10,
            terminal_rate: 0.02,
            step_delay_ms: 1,
            kill_switch_after: None,
        }
    }
}

/// Simulation results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationReport {
    pub config: SimulationConfig,
    pub succeeded: usize,
    pub failed: usize,
    pub rejected: usize,
    /// Rejection and failure codes with counts
    pub reasons: BTreeMap<String, usize>,
    pub peak_running: usize,
    pub capacity: usize,
    pub slots_leaked: usize,
    pub ledger_entries: usize,
    /// Incidents with no audit entry at all
    pub unaudited_incidents: Vec<String>,
    pub integrity_error: Option<String>,
    pub elapsed_ms: u128,
}

impl SimulationReport {
    #[must_use]
    pub fn passed(&self) -> bool {
        self.peak_running <= self.capacity
            && self.slots_leaked == 0
            && self.unaudited_incidents.is_empty()
            && self.integrity_error.is_none()
    }

    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();
        report.push_str("=== Auto-Resolution Simulation Report ===\n\n");
        let _ = writeln!(report, "Seed: {}", self.config.seed);
        let _ = writeln!(report, "Incidents: {}", self.config.incidents);
        let _ = writeln!(report, "Succeeded: {}", self.succeeded);
        let _ = writeln!(report, "Failed: {}", self.failed);
        let _ = writeln!(report, "Rejected: {}", self.rejected);
        let _ = writeln!(report, "Peak Running: {} (capacity {})", self.peak_running, self.capacity);
        let _ = writeln!(report, "Slots Leaked: {}", self.slots_leaked);
        let _ = writeln!(report, "Ledger Entries: {}", self.ledger_entries);
        let _ = writeln!(report, "Elapsed: {}ms", self.elapsed_ms);

        if !self.reasons.is_empty() {
            report.push_str("\n=== Reasons ===\n");
            for (code, count) in &self.reasons {
                let _ = writeln!(report, "{code}: {count}");
            }
        }
        if let Some(e) = &self.integrity_error {
            let _ = writeln!(report, "\n!!! Audit chain broken: {e}");
        }
        if !self.unaudited_incidents.is_empty() {
            let _ = writeln!(report, "\n!!! Unaudited incidents: {}", self.unaudited_incidents.join(", "));
        }

        let _ = writeln!(
            report,
            "\n=== Result: {} ===",
            if self.passed() { "PASS" } else { "FAIL" }
        );
        report
    }
}

fn random_incident(rng: &mut StdRng, n: usize) -> Incident {
    let categories = Category::built_in();
    let category = categories[rng.random_range(0..categories.len())].clone();
    let priority = match rng.random_range(0..4) {
        0 => Priority::Low,
        1 => Priority::Medium,
        2 => Priority::High,
        _ => Priority::Critical,
    };
    Incident::new(
        format!("SIM-{n:05}"),
        format!("simulated {category} incident"),
        category,
        rng.random_range(0.6..=1.0),
    )
    .with_priority(priority)
    .with_creator(format!("user-{}", rng.random_range(1..=20)))
}

/// Run a seeded simulation
///
/// # Errors
/// `EngineError::Config` if `settings` are invalid after applying `capacity`
pub async fn run_simulation(config: SimulationConfig, mut settings: Settings) -> Result<SimulationReport, EngineError> {
    let started = Instant::now();
    let mut rng = StdRng::seed_from_u64(config.seed);
    settings.global.max_concurrent_resolutions = config.capacity;

    let ledger: Arc<dyn AuditLedger> = Arc::new(InMemoryLedger::new());
    let executor = Arc::new(SimulatedExecutor::new(
        config.seed.wrapping_add(1),
        config.transient_rate,
        config.terminal_rate,
        Duration::from_millis(config.step_delay_ms),
    ));
    let engine = AutoResolutionEngine::builder(executor, Arc::new(LogGateway))
        .ledger(Arc::clone(&ledger))
        .settings(settings)
        .build()?;

    let incidents: Vec<Incident> = (0..config.incidents)
        .map(|n| random_incident(&mut rng, n))
        .collect();

    let split = config.kill_switch_after.unwrap_or(incidents.len()).min(incidents.len());
    let (before, after) = incidents.split_at(split);

    let mut results = engine.batch_resolve(before, "simulator").await;
    if config.kill_switch_after.is_some() {
        engine.activate_kill_switch("simulator", "simulated emergency stop")?;
        results.extend(engine.batch_resolve(after, "simulator").await);
        engine.deactivate_kill_switch("simulator")?;
    } else {
        results.extend(engine.batch_resolve(after, "simulator").await);
    }
    engine.shutdown().await;

    let mut report = SimulationReport {
        capacity: config.capacity,
        config,
        succeeded: 0,
        failed: 0,
        rejected: 0,
        reasons: BTreeMap::new(),
        peak_running: engine.stats().peak_running,
        slots_leaked: engine.slots_in_flight(),
        ledger_entries: ledger.len(),
        unaudited_incidents: Vec::new(),
        integrity_error: ledger.verify_integrity().err().map(|e| e.to_string()),
        elapsed_ms: 0,
    };

    for result in &results {
        match result.outcome {
            AttemptOutcome::Succeeded => report.succeeded += 1,
            AttemptOutcome::Failed => report.failed += 1,
            AttemptOutcome::Rejected => report.rejected += 1,
            AttemptOutcome::Running => {}
        }
        if let Some(code) = result.reason_code() {
            *report.reasons.entry(code.to_string()).or_default() += 1;
        }
    }
    for incident in &incidents {
        if engine.incident_trail(&incident.id)?.is_empty() {
            report.unaudited_incidents.push(incident.id.clone());
        }
    }

    report.elapsed_ms = started.elapsed().as_millis();
    Ok(report)
}
