// src/ingest/source.rs
use async_trait::async_trait;
use thiserror::Error;

use crate::ingest::types::Harvest;

#[derive(Debug, Error)]
pub enum SourceError {
    /// Connectivity kept failing for the whole retry budget.
    #[error("source `{feed}` unavailable after {attempts} attempt(s): {reason}")]
    Unavailable {
        feed: String,
        attempts: u32,
        reason: String,
    },

    /// The upstream answered, but with something retrying will not fix.
    #[error("source `{feed}` rejected the request: HTTP {status}")]
    Rejected { feed: String, status: u16 },

    #[error("source `{feed}` returned an unreadable payload: {reason}")]
    Decode { feed: String, reason: String },

    #[error("`{0}` is not a valid source name")]
    InvalidSource(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("http client setup failed: {0}")]
    Client(String),
}

impl SourceError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SourceError::Unavailable { .. })
    }
}

/// Read side of the pipeline: newest posts of one source plus their comments.
#[async_trait]
pub trait SourceClient: Send + Sync {
    async fn fetch(&self, source: &str, limit: u32) -> Result<Harvest, SourceError>;

    fn name(&self) -> &'static str;
}
