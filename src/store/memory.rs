//! In-process [`DocumentStore`] with Elasticsearch-compatible semantics.
//!
//! Documents live in a map keyed by id and are merged with
//! [`merge_document`]. Scrolls snapshot the matching ids when opened, so a
//! scan sees the documents present at its start, like a search context.
//!
//! Fault injection hooks ([`MemoryStore::reject_ids`],
//! [`MemoryStore::fail_bulk_requests`]) let callers exercise partial and total
//! write failures.

use super::{
    BulkOutcome, DocumentStore, IndexStatus, ScrollPage, UpsertDoc, index_mapping, merge_document,
};
use crate::error::{ItemFailure, PersistenceFailure};
use crate::models::Article;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

struct Scroll {
    remaining: VecDeque<String>,
    page_size: usize,
}

#[derive(Default)]
pub struct MemoryStore {
    mapping: Mutex<Option<Value>>,
    docs: Mutex<HashMap<String, Value>>,
    scrolls: Mutex<HashMap<String, Scroll>>,
    rejected: Mutex<HashSet<String>>,
    fail_bulk: AtomicBool,
    next_scroll: AtomicU64,
    page_requests: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later bulk item with one of these ids fail with status 409.
    pub async fn reject_ids<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rejected.lock().await.extend(ids.into_iter().map(Into::into));
    }

    /// Make whole bulk requests fail as if the store were unreachable.
    pub fn fail_bulk_requests(&self, fail: bool) {
        self.fail_bulk.store(fail, Ordering::SeqCst);
    }

    /// Stored document by id, as raw JSON.
    pub async fn document(&self, id: &str) -> Option<Value> {
        self.docs.lock().await.get(id).cloned()
    }

    /// Every stored document, sorted by id.
    pub async fn documents(&self) -> Vec<Value> {
        let docs = self.docs.lock().await;
        let mut ids: Vec<&String> = docs.keys().collect();
        ids.sort();
        ids.into_iter().map(|id| docs[id].clone()).collect()
    }

    /// Delete a document, as retention outside this system would.
    pub async fn remove(&self, id: &str) -> Option<Value> {
        self.docs.lock().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.docs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.lock().await.is_empty()
    }

    pub async fn open_scrolls(&self) -> usize {
        self.scrolls.lock().await.len()
    }

    /// Number of `open_scroll` and `next_page` calls served so far.
    pub fn page_requests(&self) -> usize {
        self.page_requests.load(Ordering::SeqCst)
    }

    async fn take_page(&self, cursor: &str) -> Result<ScrollPage, PersistenceFailure> {
        let ids = {
            let mut scrolls = self.scrolls.lock().await;
            let scroll = scrolls.get_mut(cursor).ok_or_else(|| {
                PersistenceFailure::new("scroll", format!("no search context for cursor {cursor}"))
            })?;
            let n = scroll.page_size.min(scroll.remaining.len());
            scroll.remaining.drain(..n).collect::<Vec<_>>()
        };

        let docs = self.docs.lock().await;
        let mut articles = Vec::with_capacity(ids.len());
        for id in ids {
            // Deleted after the snapshot; nothing to return.
            let Some(doc) = docs.get(&id) else { continue };
            let article: Article = serde_json::from_value(doc.clone()).map_err(|e| {
                PersistenceFailure::new("scroll", format!("document {id} is not an article: {e}"))
            })?;
            articles.push(article);
        }

        Ok(ScrollPage {
            articles,
            cursor: Some(cursor.to_string()),
        })
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn ensure_index(&self) -> Result<IndexStatus, PersistenceFailure> {
        let mut mapping = self.mapping.lock().await;
        if mapping.is_some() {
            return Ok(IndexStatus::Existing);
        }
        *mapping = Some(index_mapping());
        Ok(IndexStatus::Created)
    }

    async fn bulk_upsert(&self, docs: &[UpsertDoc]) -> Result<BulkOutcome, PersistenceFailure> {
        if self.fail_bulk.load(Ordering::SeqCst) {
            return Err(PersistenceFailure::new("bulk upsert", "store unreachable")
                .with_counts(docs.len(), 0));
        }

        let rejected = self.rejected.lock().await;
        let mut stored = self.docs.lock().await;
        let mut outcome = BulkOutcome::default();

        for doc in docs {
            if rejected.contains(&doc.id) {
                outcome.failures.push(ItemFailure {
                    id: doc.id.clone(),
                    status: 409,
                    reason: "version_conflict_engine_exception".to_string(),
                });
                continue;
            }
            match stored.get_mut(&doc.id) {
                Some(existing) => merge_document(existing, &doc.doc),
                None if doc.upsert => {
                    stored.insert(doc.id.clone(), doc.doc.clone());
                }
                None => {
                    outcome.missing += 1;
                    continue;
                }
            }
            outcome.written += 1;
        }

        debug!(
            written = outcome.written,
            missing = outcome.missing,
            failed = outcome.failures.len(),
            "Memory bulk upsert"
        );
        Ok(outcome)
    }

    async fn open_scroll(
        &self,
        query_id: &str,
        page_size: usize,
    ) -> Result<ScrollPage, PersistenceFailure> {
        self.page_requests.fetch_add(1, Ordering::SeqCst);
        let snapshot: VecDeque<String> = self
            .docs
            .lock()
            .await
            .iter()
            .filter(|(_, doc)| doc.get("query_id").and_then(Value::as_str) == Some(query_id))
            .map(|(id, _)| id.clone())
            .collect();

        let cursor = format!("mem-scroll-{}", self.next_scroll.fetch_add(1, Ordering::SeqCst));
        self.scrolls.lock().await.insert(
            cursor.clone(),
            Scroll {
                remaining: snapshot,
                page_size: page_size.max(1),
            },
        );
        self.take_page(&cursor).await
    }

    async fn next_page(&self, cursor: &str) -> Result<ScrollPage, PersistenceFailure> {
        self.page_requests.fetch_add(1, Ordering::SeqCst);
        self.take_page(cursor).await
    }

    async fn release_scroll(&self, cursor: &str) -> Result<(), PersistenceFailure> {
        self.scrolls.lock().await.remove(cursor);
        Ok(())
    }
}
