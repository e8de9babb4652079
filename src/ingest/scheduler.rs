// src/ingest/scheduler.rs
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ingest::source::SourceClient;
use crate::ingest::IngestManager;
use crate::writer::BatchWriter;

#[derive(Clone, Copy, Debug)]
pub struct SchedulerCfg {
    /// Pause between the end of one cycle and the start of the next.
    pub interval: Duration,
    /// Stop after this many cycles; `None` runs until cancelled.
    pub max_cycles: Option<u64>,
}

impl SchedulerCfg {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            max_cycles: None,
        }
    }
}

/// Run cycles until cancelled (or `max_cycles` is reached). Returns completed cycles.
///
/// Cancellation is observed both while a cycle is in flight (which also drops any
/// pending backoff wait) and during the inter-cycle sleep.
pub async fn run_scheduler<S, W>(
    manager: &IngestManager<S, W>,
    sources: &[String],
    cfg: SchedulerCfg,
    cancel: CancellationToken,
) -> u64
where
    S: SourceClient + ?Sized,
    W: BatchWriter + ?Sized,
{
    let mut completed: u64 = 0;
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let report = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(target: "ingest", "cancelled during cycle");
                break;
            }
            report = manager.run_cycle(sources) => report,
        };
        completed += 1;

        tracing::info!(
            target: "ingest",
            cycle = completed,
            sources = report.sources.len(),
            failed_sources = report.failed_sources(),
            dropped_batches = report.dropped_batches(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "ingest cycle finished"
        );

        if cfg.max_cycles.is_some_and(|max| completed >= max) {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(cfg.interval) => {}
        }
    }
    tracing::info!(target: "ingest", cycles = completed, "scheduler stopped");
    completed
}

/// Spawn the scheduler on the runtime; the manager and source list move into the task.
pub fn spawn_scheduler<S, W>(
    manager: std::sync::Arc<IngestManager<S, W>>,
    sources: Vec<String>,
    cfg: SchedulerCfg,
    cancel: CancellationToken,
) -> JoinHandle<u64>
where
    S: SourceClient + ?Sized + 'static,
    W: BatchWriter + ?Sized + 'static,
{
    tokio::spawn(async move { run_scheduler(&manager, &sources, cfg, cancel).await })
}
