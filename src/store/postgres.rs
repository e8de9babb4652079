// src/store/postgres.rs
//! PostgreSQL backend. One table per collection:
//! `id TEXT PRIMARY KEY, created DOUBLE PRECISION, source TEXT, doc JSONB`.
//!
//! Bulk inserts are a single `INSERT ... SELECT FROM UNNEST(...) ON CONFLICT (id) DO
//! NOTHING`, so a colliding id never aborts the rest of the batch.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};

use super::{validate_identifier, Document, InsertReport, StoreClient, StoreError};
use crate::retry::{with_backoff, Attempt, RetryError, RetryPolicy};

/// Columns that exist on every collection table; other fields live in `doc`.
const COLUMNS: [&str; 3] = ["id", "created", "source"];

#[derive(Debug, Clone)]
pub struct PgStoreConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PgStoreConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/reddit".to_string(),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    retry: RetryPolicy,
}

impl PgStore {
    /// Build a lazily connecting pool; nothing touches the network until first use.
    pub fn connect_lazy(cfg: &PgStoreConfig, retry: RetryPolicy) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections.max(1))
            .acquire_timeout(cfg.acquire_timeout)
            .connect_lazy(&cfg.url)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        tracing::info!(
            max_connections = cfg.max_connections,
            "postgres pool initialized (lazy)"
        );
        Ok(Self { pool, retry })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn execute(&self, target: &str, what: &str, sql: &str) -> Result<u64, StoreError> {
        let res = with_backoff(&self.retry, what, || async {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map(|r| r.rows_affected())
                .map_err(classify)
        })
        .await;
        res.map_err(|e| lift(target, e))
    }
}

/// Connectivity problems are retried; everything else is reported as-is.
fn classify(e: sqlx::Error) -> Attempt<sqlx::Error> {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => Attempt::Transient(e),
        other => Attempt::Fatal(other),
    }
}

fn lift(target: &str, e: RetryError<sqlx::Error>) -> StoreError {
    match e {
        RetryError::Exhausted { attempts, last } => StoreError::Unavailable {
            target: target.to_string(),
            attempts,
            reason: last.to_string(),
        },
        RetryError::Fatal(e) => StoreError::Backend(e.to_string()),
    }
}

fn index_name(target: &str, field: &str, descending: bool) -> String {
    let dir = if descending { "desc" } else { "asc" };
    format!("{target}_{field}_{dir}_idx")
}

#[async_trait]
impl StoreClient for PgStore {
    async fn bulk_insert(
        &self,
        target: &str,
        docs: Vec<Document>,
    ) -> Result<InsertReport, StoreError> {
        validate_identifier(target)?;
        if docs.is_empty() {
            return Ok(InsertReport::default());
        }

        let total = docs.len();
        let mut ids = Vec::with_capacity(total);
        let mut created = Vec::with_capacity(total);
        let mut sources = Vec::with_capacity(total);
        let mut bodies: Vec<Value> = Vec::with_capacity(total);
        for doc in docs {
            let id = doc
                .id()
                .ok_or_else(|| StoreError::MissingId(target.to_string()))?
                .to_string();
            ids.push(id);
            created.push(doc.created().unwrap_or(0.0));
            sources.push(doc.source().unwrap_or_default().to_string());
            bodies.push(doc.into_value());
        }

        let sql = format!(
            r#"INSERT INTO "{target}" (id, created, source, doc)
               SELECT * FROM UNNEST($1::text[], $2::float8[], $3::text[], $4::jsonb[])
               ON CONFLICT (id) DO NOTHING"#
        );

        let res = with_backoff(&self.retry, "postgres bulk insert", || async {
            sqlx::query(&sql)
                .bind(&ids)
                .bind(&created)
                .bind(&sources)
                .bind(&bodies)
                .execute(&self.pool)
                .await
                .map(|r| r.rows_affected())
                .map_err(classify)
        })
        .await
        .map_err(|e| lift(target, e))?;

        let inserted = res as usize;
        let report = InsertReport {
            inserted,
            duplicates: total.saturating_sub(inserted),
        };
        if report.duplicates > 0 {
            tracing::debug!(
                collection = target,
                duplicates = report.duplicates,
                "duplicate ids skipped"
            );
        }
        Ok(report)
    }

    async fn ensure_index(
        &self,
        target: &str,
        field: &str,
        descending: bool,
    ) -> Result<(), StoreError> {
        validate_identifier(target)?;
        validate_identifier(field)?;
        let order = if descending { "DESC" } else { "ASC" };
        let key = if COLUMNS.contains(&field) {
            format!("{field} {order}")
        } else {
            format!("(doc->>'{field}') {order}")
        };
        let sql = format!(
            r#"CREATE INDEX IF NOT EXISTS "{name}" ON "{target}" ({key})"#,
            name = index_name(target, field, descending),
        );
        self.execute(target, "postgres ensure index", &sql).await?;
        Ok(())
    }

    async fn ensure_collection(&self, name: &str) -> Result<(), StoreError> {
        validate_identifier(name)?;
        let sql = format!(
            r#"CREATE TABLE IF NOT EXISTS "{name}" (
                   id      TEXT PRIMARY KEY,
                   created DOUBLE PRECISION NOT NULL,
                   source  TEXT NOT NULL,
                   doc     JSONB NOT NULL
               )"#
        );
        self.execute(name, "postgres ensure collection", &sql).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_names_encode_direction() {
        assert_eq!(index_name("posts", "created", true), "posts_created_desc_idx");
        assert_eq!(index_name("posts", "created", false), "posts_created_asc_idx");
    }

    #[test]
    fn pool_errors_are_transient() {
        assert!(matches!(classify(sqlx::Error::PoolTimedOut), Attempt::Transient(_)));
        assert!(matches!(classify(sqlx::Error::RowNotFound), Attempt::Fatal(_)));
    }

    #[test]
    fn exhausted_retry_becomes_unavailable() {
        let e = lift(
            "posts",
            RetryError::Exhausted {
                attempts: 4,
                last: sqlx::Error::PoolTimedOut,
            },
        );
        assert!(matches!(e, StoreError::Unavailable { attempts: 4, .. }));
    }
}
