// src/ingest/mod.rs
pub mod providers;
pub mod scheduler;
pub mod source;
pub mod types;

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;

use crate::ingest::source::SourceClient;
use crate::ingest::types::Harvest;
use crate::writer::{BatchWriter, WriteOutcome};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("harvest_cycles_total", "Completed ingestion cycles.");
        describe_counter!(
            "harvest_posts_fetched_total",
            "Posts returned by the source client."
        );
        describe_counter!(
            "harvest_comments_fetched_total",
            "Comments returned by the source client."
        );
        describe_counter!(
            "harvest_comment_trees_skipped_total",
            "Comment trees the source refused; their posts are still kept."
        );
        describe_counter!(
            "harvest_source_errors_total",
            "Sources whose fetch failed and were treated as empty."
        );
        describe_counter!(
            "harvest_records_inserted_total",
            "Records newly inserted into the store."
        );
        describe_counter!(
            "harvest_duplicates_total",
            "Records skipped because their id was already stored."
        );
        describe_counter!(
            "harvest_batches_dropped_total",
            "Batches discarded because the store was unavailable."
        );
        describe_counter!(
            "harvest_write_errors_total",
            "Batches rejected by the store for non-connectivity reasons."
        );
        describe_histogram!("harvest_cycle_ms", "Cycle duration in milliseconds.");
        describe_gauge!("harvest_last_cycle_ts", "Unix ts when the last cycle finished.");
    });
}

/// Names of the two persisted record sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Targets {
    pub posts: String,
    pub comments: String,
}

impl Default for Targets {
    fn default() -> Self {
        Self {
            posts: "posts".to_string(),
            comments: "comments".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchStatus {
    Fetched { posts: usize, comments: usize },
    /// Fetch failed; the source was processed as empty.
    Failed { unavailable: bool, error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceReport {
    pub source: String,
    pub fetch: FetchStatus,
    pub posts: Result<WriteOutcome, String>,
    pub comments: Result<WriteOutcome, String>,
}

impl SourceReport {
    pub fn dropped_batches(&self) -> usize {
        [&self.posts, &self.comments]
            .into_iter()
            .filter(|r| matches!(r, Ok(o) if o.is_dropped()))
            .count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub sources: Vec<SourceReport>,
    pub elapsed: Duration,
}

impl CycleReport {
    pub fn failed_sources(&self) -> usize {
        self.sources
            .iter()
            .filter(|s| matches!(s.fetch, FetchStatus::Failed { .. }))
            .count()
    }

    pub fn dropped_batches(&self) -> usize {
        self.sources.iter().map(SourceReport::dropped_batches).sum()
    }
}

/// Per-source fetch → write orchestration. One source failing never affects another.
pub struct IngestManager<S: ?Sized, W: ?Sized> {
    source: Arc<S>,
    writer: Arc<W>,
    targets: Targets,
    limit: u32,
    max_concurrent_sources: usize,
}

impl<S, W> IngestManager<S, W>
where
    S: SourceClient + ?Sized,
    W: BatchWriter + ?Sized,
{
    pub fn new(source: Arc<S>, writer: Arc<W>, targets: Targets, limit: u32) -> Self {
        Self {
            source,
            writer,
            targets,
            limit,
            max_concurrent_sources: 1,
        }
    }

    /// Process up to `n` sources at once. `1` keeps strict list order.
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.max_concurrent_sources = n.max(1);
        self
    }

    /// Run one full pass over `sources`. Never fails; problems end up in the report.
    pub async fn run_cycle(&self, sources: &[String]) -> CycleReport {
        ensure_metrics_described();
        let t0 = Instant::now();

        let reports: Vec<SourceReport> = if self.max_concurrent_sources == 1 {
            let mut out = Vec::with_capacity(sources.len());
            for source in sources {
                out.push(self.process_source(source).await);
            }
            out
        } else {
            let futs: Vec<_> = sources.iter().map(|source| self.process_source(source)).collect();
            stream::iter(futs)
                .buffered(self.max_concurrent_sources)
                .collect()
                .await
        };

        let elapsed = t0.elapsed();
        let now = chrono::Utc::now().timestamp().max(0);
        counter!("harvest_cycles_total").increment(1);
        histogram!("harvest_cycle_ms").record(elapsed.as_secs_f64() * 1_000.0);
        gauge!("harvest_last_cycle_ts").set(now as f64);

        CycleReport {
            sources: reports,
            elapsed,
        }
    }

    async fn process_source(&self, source: &str) -> SourceReport {
        tracing::info!(source, "grab submissions and comments");
        let (harvest, fetch) = match self.source.fetch(source, self.limit).await {
            Ok(h) => {
                let status = FetchStatus::Fetched {
                    posts: h.posts.len(),
                    comments: h.comments.len(),
                };
                (h, status)
            }
            Err(e) => {
                counter!("harvest_source_errors_total").increment(1);
                tracing::warn!(
                    source,
                    client = self.source.name(),
                    error = %e,
                    "fetch failed, treating source as empty"
                );
                let status = FetchStatus::Failed {
                    unavailable: e.is_unavailable(),
                    error: e.to_string(),
                };
                (Harvest::empty(), status)
            }
        };

        tracing::info!(source, collection = %self.targets.posts, "push items");
        let posts = self
            .writer
            .write_posts(&self.targets.posts, &harvest.posts)
            .await
            .map_err(|e| self.write_failed(source, &self.targets.posts, e));

        tracing::info!(source, collection = %self.targets.comments, "push items");
        let comments = self
            .writer
            .write_comments(&self.targets.comments, &harvest.comments)
            .await
            .map_err(|e| self.write_failed(source, &self.targets.comments, e));

        SourceReport {
            source: source.to_string(),
            fetch,
            posts,
            comments,
        }
    }

    fn write_failed(&self, source: &str, collection: &str, e: crate::store::StoreError) -> String {
        counter!("harvest_write_errors_total").increment(1);
        tracing::error!(source, collection, error = %e, "batch rejected by store");
        e.to_string()
    }
}
