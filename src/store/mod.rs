//! Document store abstraction.
//!
//! Every stage receives an explicitly constructed store handle instead of
//! reaching for a process-wide client. Two implementations exist:
//!
//! | Store | Module | Notes |
//! |-------|--------|-------|
//! | Elasticsearch | [`elastic`] | REST API over `reqwest`; bulk `update` + scroll |
//! | In-memory | [`memory`] | Same merge and scroll semantics; used by tests and dry runs |
//!
//! # Write semantics
//!
//! [`DocumentStore::bulk_upsert`] merges each supplied partial document into
//! the stored one (nested objects merged recursively, scalars replaced), or
//! creates the document when absent. Fields not present in the patch are left
//! untouched.
//!
//! # Read semantics
//!
//! [`DocumentStore::open_scroll`] and [`DocumentStore::next_page`] implement
//! cursor pagination over an exact `term` match on `query_id`. A page with no
//! articles signals exhaustion.

use crate::error::{ItemFailure, PersistenceFailure};
use crate::models::{Analysis, Article};
use async_trait::async_trait;
use serde_json::{Value, json};

pub mod elastic;
pub mod memory;

pub use elastic::ElasticStore;
pub use memory::MemoryStore;

/// Fields fetched when streaming articles back out.
pub const ARTICLE_FIELDS: [&str; 6] = ["id", "query_id", "title", "description", "url", "analysis"];

/// One merge write keyed by document id.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertDoc {
    pub id: String,
    /// Partial document; must be a JSON object.
    pub doc: Value,
    /// Create the document when it does not exist. When false, a missing
    /// document is skipped and reported in [`BulkOutcome::missing`].
    pub upsert: bool,
}

impl UpsertDoc {
    /// Full candidate document as produced at ingestion time.
    pub fn from_article(article: &Article) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: article.id.clone(),
            doc: serde_json::to_value(article)?,
            upsert: true,
        })
    }

    /// Patch that only touches the given analysis fields of an existing
    /// document; it never creates one.
    pub fn analysis(id: &str, analysis: &Analysis) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: id.to_string(),
            doc: json!({ "analysis": serde_json::to_value(analysis)? }),
            upsert: false,
        })
    }
}

/// What happened to a bulk request the store accepted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkOutcome {
    pub written: usize,
    /// Update-only writes whose document no longer exists.
    pub missing: usize,
    pub failures: Vec<ItemFailure>,
}

/// Result of index existence check-then-create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    Existing,
    Created,
    /// Another caller created the index between our check and our create.
    CreatedConcurrently,
}

/// One page of a scroll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrollPage {
    pub articles: Vec<Article>,
    /// Continuation token; `None` when the store holds no scroll context.
    pub cursor: Option<String>,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create the article index with its mapping unless it already exists.
    async fn ensure_index(&self) -> Result<IndexStatus, PersistenceFailure>;

    /// Merge each document, creating it first when [`UpsertDoc::upsert`] is set.
    ///
    /// `Err` means the request as a whole failed and nothing is known to be
    /// written; item-level rejections come back inside [`BulkOutcome`].
    async fn bulk_upsert(&self, docs: &[UpsertDoc]) -> Result<BulkOutcome, PersistenceFailure>;

    /// Start a scroll over every article stored under `query_id`.
    async fn open_scroll(
        &self,
        query_id: &str,
        page_size: usize,
    ) -> Result<ScrollPage, PersistenceFailure>;

    /// Fetch the page following `cursor`.
    async fn next_page(&self, cursor: &str) -> Result<ScrollPage, PersistenceFailure>;

    /// Drop the server-side scroll context. Best-effort.
    async fn release_scroll(&self, cursor: &str) -> Result<(), PersistenceFailure>;
}

/// Index settings and mapping for the article index.
pub fn index_mapping() -> Value {
    json!({
        "settings": { "number_of_shards": 1, "number_of_replicas": 0 },
        "mappings": {
            "properties": {
                "id": { "type": "keyword" },
                "query_id": { "type": "keyword" },
                "title": { "type": "text", "analyzer": "english" },
                "description": { "type": "text", "analyzer": "english" },
                "url": { "type": "keyword" },
                "analysis": {
                    "properties": {
                        "claim_coverage": { "type": "float" },
                        "subjectivity": { "type": "float" },
                        "claims": { "type": "text", "analyzer": "english" },
                        "cluster_id": { "type": "integer" }
                    }
                }
            }
        }
    })
}

/// Merge `patch` into `target` the way a partial document update does:
/// objects merge key by key, anything else replaces.
pub fn merge_document(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                let nested = value.is_object() && target.get(key).is_some_and(Value::is_object);
                if nested {
                    if let Some(existing) = target.get_mut(key) {
                        merge_document(existing, value);
                    }
                } else {
                    target.insert(key.clone(), value.clone());
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}
