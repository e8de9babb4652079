// src/store/mod.rs
//! Persistence layer: a flat document model plus the [`StoreClient`] seam.
//!
//! Two backends ship with the crate: [`postgres::PgStore`] for production and
//! [`memory::MemoryStore`] for dry runs and tests.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Store-ready representation of a record: a flat field → value map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    pub fn created(&self) -> Option<f64> {
        self.0.get("created").and_then(Value::as_f64)
    }

    pub fn source(&self) -> Option<&str> {
        self.0.get("source").and_then(Value::as_str)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Result of an unordered bulk insert. Duplicates are expected, not failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertReport {
    pub inserted: usize,
    pub duplicates: usize,
}

/// A secondary index on a single field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexSpec {
    pub field: String,
    pub descending: bool,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// Connectivity kept failing for the whole retry budget.
    #[error("store unavailable for `{target}` after {attempts} attempt(s): {reason}")]
    Unavailable {
        target: String,
        attempts: u32,
        reason: String,
    },

    #[error("invalid collection or field name: {0:?}")]
    InvalidName(String),

    #[error("document without a string `id` field in `{0}`")]
    MissingId(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Insert documents independently of each other; colliding ids are skipped.
    async fn bulk_insert(&self, target: &str, docs: Vec<Document>)
        -> Result<InsertReport, StoreError>;

    /// Idempotently create a secondary index on `field`.
    async fn ensure_index(
        &self,
        target: &str,
        field: &str,
        descending: bool,
    ) -> Result<(), StoreError>;

    /// Idempotently create a collection.
    async fn ensure_collection(&self, name: &str) -> Result<(), StoreError>;
}

/// Collection and field names end up in SQL, so only plain identifiers are allowed.
pub fn validate_identifier(name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let head_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let tail_ok = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if head_ok && tail_ok && name.len() <= 48 {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

/// Create every collection plus a secondary index on `index_field` (descending).
pub async fn provision<C: StoreClient + ?Sized>(
    client: &C,
    collections: &[String],
    index_field: &str,
) -> Result<(), StoreError> {
    for collection in collections {
        tracing::info!(collection = %collection, "create collection");
        client.ensure_collection(collection).await?;
        tracing::info!(collection = %collection, field = index_field, "create secondary index");
        client.ensure_index(collection, index_field, true).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_restricted() {
        assert!(validate_identifier("posts").is_ok());
        assert!(validate_identifier("_comments_2").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("2posts").is_err());
        assert!(validate_identifier("posts; drop table x").is_err());
        assert!(validate_identifier("Posts").is_err());
    }

    #[test]
    fn document_accessors_read_flat_fields() {
        let mut m = Map::new();
        m.insert("id".into(), Value::from("t3_x"));
        m.insert("created".into(), Value::from(12));
        let d = Document::from_fields(m);
        assert_eq!(d.id(), Some("t3_x"));
        assert_eq!(d.created(), Some(12.0));
        assert_eq!(d.source(), None);
    }
}
