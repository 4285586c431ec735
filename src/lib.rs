// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod change_detector;
pub mod config;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod notify;
pub mod report;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::change_detector::{DeltaTracker, Direction, FlaggedDelta};
pub use crate::config::{Dataset, MonitorConfig};
pub use crate::engine::{run, run_dataset, RunContext, RunSummary};
pub use crate::ingest::{resolve, Resolution};
pub use crate::notify::{Notifier, NotifierMux};
pub use crate::store::{JsonFileStore, KvStore, MemoryStore};
