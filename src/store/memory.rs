// src/store/memory.rs
//! In-process store with the same semantics as the Postgres backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{validate_identifier, Document, IndexSpec, InsertReport, StoreClient, StoreError};

#[derive(Debug, Default)]
struct Collection {
    docs: BTreeMap<String, Document>,
    indexes: Vec<IndexSpec>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a collection, ordered by id.
    pub fn documents(&self, target: &str) -> Vec<Document> {
        let guard = self.inner.lock().expect("memory store mutex poisoned");
        guard
            .get(target)
            .map(|c| c.docs.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn count(&self, target: &str) -> usize {
        let guard = self.inner.lock().expect("memory store mutex poisoned");
        guard.get(target).map_or(0, |c| c.docs.len())
    }

    pub fn indexes(&self, target: &str) -> Vec<IndexSpec> {
        let guard = self.inner.lock().expect("memory store mutex poisoned");
        guard
            .get(target)
            .map(|c| c.indexes.clone())
            .unwrap_or_default()
    }

    pub fn has_collection(&self, name: &str) -> bool {
        let guard = self.inner.lock().expect("memory store mutex poisoned");
        guard.contains_key(name)
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn bulk_insert(
        &self,
        target: &str,
        docs: Vec<Document>,
    ) -> Result<InsertReport, StoreError> {
        validate_identifier(target)?;
        if docs.iter().any(|d| d.id().is_none()) {
            return Err(StoreError::MissingId(target.to_string()));
        }
        let mut guard = self.inner.lock().expect("memory store mutex poisoned");
        // Inserting into a missing collection creates it.
        let coll = guard.entry(target.to_string()).or_default();

        let mut report = InsertReport::default();
        for doc in docs {
            let id = doc.id().unwrap_or_default().to_owned();
            if coll.docs.contains_key(&id) {
                report.duplicates += 1;
                continue;
            }
            coll.docs.insert(id, doc);
            report.inserted += 1;
        }
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
        let mut guard = self.inner.lock().expect("memory store mutex poisoned");
        let coll = guard.entry(target.to_string()).or_default();
        let spec = IndexSpec {
            field: field.to_string(),
            descending,
        };
        if !coll.indexes.contains(&spec) {
            coll.indexes.push(spec);
        }
        Ok(())
    }

    async fn ensure_collection(&self, name: &str) -> Result<(), StoreError> {
        validate_identifier(name)?;
        let mut guard = self.inner.lock().expect("memory store mutex poisoned");
        guard.entry(name.to_string()).or_default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value};

    fn doc(id: &str, created: f64) -> Document {
        let mut m = Map::new();
        m.insert("id".into(), Value::from(id));
        m.insert("created".into(), Value::from(created));
        Document::from_fields(m)
    }

    #[tokio::test]
    async fn duplicates_do_not_block_siblings() {
        let store = MemoryStore::new();
        store
            .bulk_insert("posts", vec![doc("a", 1.0), doc("b", 2.0)])
            .await
            .unwrap();
        let r = store
            .bulk_insert("posts", vec![doc("a", 1.0), doc("c", 3.0), doc("b", 2.0)])
            .await
            .unwrap();
        assert_eq!(r, InsertReport { inserted: 1, duplicates: 2 });
        assert_eq!(store.count("posts"), 3);
    }

    #[tokio::test]
    async fn first_write_wins_on_duplicate_id() {
        let store = MemoryStore::new();
        store.bulk_insert("posts", vec![doc("a", 1.0)]).await.unwrap();
        store.bulk_insert("posts", vec![doc("a", 99.0)]).await.unwrap();
        assert_eq!(store.documents("posts")[0].created(), Some(1.0));
    }

    #[tokio::test]
    async fn ensure_index_is_idempotent() {
        let store = MemoryStore::new();
        store.ensure_collection("comments").await.unwrap();
        store.ensure_collection("comments").await.unwrap();
        store.ensure_index("comments", "created", true).await.unwrap();
        store.ensure_index("comments", "created", true).await.unwrap();
        assert_eq!(store.indexes("comments").len(), 1);
        assert!(store.has_collection("comments"));
    }

    #[tokio::test]
    async fn rejects_unsafe_names() {
        let store = MemoryStore::new();
        let err = store.ensure_collection("bad name").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidName(_)));
    }
}
