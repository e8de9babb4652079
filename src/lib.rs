// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod ingest;
pub mod metrics;
pub mod retry;
pub mod store;
pub mod writer;

// ---- Re-exports for stable public API ----
pub use crate::config::HarvesterConfig;
pub use crate::ingest::scheduler::{run_scheduler, SchedulerCfg};
pub use crate::ingest::source::{SourceClient, SourceError};
pub use crate::ingest::types::{Comment, Harvest, Post};
pub use crate::ingest::{CycleReport, IngestManager, Targets};
pub use crate::store::{Document, StoreClient, StoreError};
pub use crate::writer::{BatchWriter, RecordWriter, WriteOutcome};
