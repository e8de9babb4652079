// src/writer.rs
//! Record writer: turns harvested records into documents and hands them to the store.
//! A store outage drops the batch and reports it instead of failing the cycle.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;

use crate::ingest::types::{Comment, Post};
use crate::store::{StoreClient, StoreError};

/// What happened to one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Empty batch; the store was not called.
    Skipped,
    Persisted { inserted: usize, duplicates: usize },
    /// Store unavailable for the whole retry budget; batch discarded.
    Dropped { records: usize },
}

impl WriteOutcome {
    pub fn is_dropped(&self) -> bool {
        matches!(self, WriteOutcome::Dropped { .. })
    }
}

/// The seam the ingestion manager writes through.
#[async_trait]
pub trait BatchWriter: Send + Sync {
    async fn write_posts(&self, target: &str, posts: &[Post])
        -> Result<WriteOutcome, StoreError>;
    async fn write_comments(
        &self,
        target: &str,
        comments: &[Comment],
    ) -> Result<WriteOutcome, StoreError>;
}

pub struct RecordWriter<C: ?Sized> {
    store: Arc<C>,
}

impl<C: StoreClient + ?Sized> RecordWriter<C> {
    pub fn new(store: Arc<C>) -> Self {
        Self { store }
    }

    /// Write a batch of records to `target`.
    pub async fn write<R: crate::ingest::types::Persistable + Sync>(
        &self,
        target: &str,
        records: &[R],
    ) -> Result<WriteOutcome, StoreError> {
        if records.is_empty() {
            return Ok(WriteOutcome::Skipped);
        }
        let docs = records.iter().map(|r| r.to_document()).collect();

        match self.store.bulk_insert(target, docs).await {
            Ok(report) => {
                counter!("harvest_records_inserted_total").increment(report.inserted as u64);
                counter!("harvest_duplicates_total").increment(report.duplicates as u64);
                tracing::info!(
                    collection = target,
                    inserted = report.inserted,
                    duplicates = report.duplicates,
                    "batch written"
                );
                Ok(WriteOutcome::Persisted {
                    inserted: report.inserted,
                    duplicates: report.duplicates,
                })
            }
            Err(StoreError::Unavailable { attempts, reason, .. }) => {
                counter!("harvest_batches_dropped_total").increment(1);
                tracing::warn!(
                    collection = target,
                    records = records.len(),
                    attempts,
                    reason = %reason,
                    "store unavailable, batch dropped"
                );
                Ok(WriteOutcome::Dropped {
                    records: records.len(),
                })
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl<C: StoreClient + ?Sized> BatchWriter for RecordWriter<C> {
    async fn write_posts(
        &self,
        target: &str,
        posts: &[Post],
    ) -> Result<WriteOutcome, StoreError> {
        self.write(target, posts).await
    }

    async fn write_comments(
        &self,
        target: &str,
        comments: &[Comment],
    ) -> Result<WriteOutcome, StoreError> {
        self.write(target, comments).await
    }
}
