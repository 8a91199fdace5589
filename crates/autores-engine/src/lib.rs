//! Autores Engine - gated incident auto-resolution
//!
//! Decides whether an incident may be fixed without a human, runs the fix
//! through a pluggable executor under a global concurrency cap, and records
//! every decision in the audit ledger.
//!
//! # Example
//!
//! ```rust,no_run
//! use autores_config::Category;
//! use autores_engine::{AutoResolutionEngine, Incident, LogGateway, SimulatedExecutor};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), autores_engine::EngineError> {
//! let executor = Arc::new(SimulatedExecutor::new(7, 0.0, 0.0, Duration::ZERO));
//! let engine = AutoResolutionEngine::builder(executor, Arc::new(LogGateway)).build()?;
//!
//! let incident = Incident::new("INC-1", "db pool exhausted", Category::Database, 0.95);
//! let result = engine.resolve(&incident, "system").await;
//! assert!(result.is_success());
//!
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod engine;
pub mod error;
pub mod executor;
pub mod limiter;
pub mod notify;
pub mod simulation;
pub mod types;

pub use engine::{check_eligibility, Admission, AutoResolutionEngine, EngineBuilder, EngineStats};
pub use error::{EngineError, LimiterError, NotifyError};
pub use executor::{
    PlannedStep, ResolutionExecutor, RunOutcome, StepCatalog, StepFailure, StepPlan, StepRecorder,
};
pub use limiter::{ConcurrencyLimiter, LimiterStats, SlotGuard, SlotToken};
pub use notify::{
    Channel, LogGateway, Notification, NotificationDispatcher, NotificationGateway, NotificationKind,
};
pub use simulation::{run_simulation, SimulatedExecutor, SimulationConfig, SimulationReport};
pub use types::{
    AttemptId, AttemptOutcome, ExecutionTry, Failure, FailureReason, Incident, Priority,
    Rejection, ResolutionAttempt, ResolutionResult, ResolutionStep, StepOutcome, TryOutcome,
};
