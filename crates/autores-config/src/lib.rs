//! Autores Config - audited auto-resolution policy
//!
//! Holds the global kill switch, the default confidence threshold, the
//! concurrency cap and per-category policy. Every change is written to the
//! audit ledger before it becomes visible.
//!
//! # Example
//!
//! ```rust
//! use autores_config::{Category, CategoryConfigPatch, ConfigStore};
//! use autores_ledger::InMemoryLedger;
//! use std::sync::Arc;
//!
//! let store = ConfigStore::new(Arc::new(InMemoryLedger::new()));
//! store
//!     .update_category(&Category::Database, &CategoryConfigPatch::new().threshold(0.95), "ops")
//!     .unwrap();
//!
//! let snapshot = store.snapshot();
//! assert_eq!(snapshot.effective_threshold(&Category::Database), Some(0.95));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod category;
pub mod error;
pub mod settings;
pub mod store;
pub mod types;

pub use category::{Category, CustomCategory};
pub use error::ConfigError;
pub use settings::{RuntimeSettings, Settings};
pub use store::{ConfigStore, GLOBAL_SUBJECT};
pub use types::{
    CategoryConfig, CategoryConfigPatch, ConfigSnapshot, GlobalConfig, GlobalConfigPatch,
    DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_RETRIES, MAX_RETRY_LIMIT,
};
