// src/ingest/types.rs
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::store::Document;

/// A post as harvested from a source. `id` is the source's own fullname (e.g. `t3_abc`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Post {
    pub id: String,
    pub title: String,
    pub created: f64, // unix seconds, fractional allowed
    pub source: String,
}

/// A comment as harvested from a source. No reference to its parent post is kept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    pub id: String,
    pub text: String,
    pub created: f64,
    pub source: String,
}

/// Everything one fetch of one source produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Harvest {
    pub posts: Vec<Post>,
    pub comments: Vec<Comment>,
}

impl Harvest {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Records that can be handed to a [`crate::writer::RecordWriter`].
pub trait Persistable {
    fn to_document(&self) -> Document;
}

impl Persistable for Post {
    fn to_document(&self) -> Document {
        let mut fields = Map::new();
        fields.insert("id".into(), Value::from(self.id.as_str()));
        fields.insert("title".into(), Value::from(self.title.as_str()));
        fields.insert("created".into(), Value::from(self.created));
        fields.insert("source".into(), Value::from(self.source.as_str()));
        Document::from_fields(fields)
    }
}

impl Persistable for Comment {
    fn to_document(&self) -> Document {
        let mut fields = Map::new();
        fields.insert("id".into(), Value::from(self.id.as_str()));
        fields.insert("text".into(), Value::from(self.text.as_str()));
        fields.insert("created".into(), Value::from(self.created));
        fields.insert("source".into(), Value::from(self.source.as_str()));
        Document::from_fields(fields)
    }
}
