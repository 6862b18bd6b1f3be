//! Elasticsearch-backed [`DocumentStore`] speaking the REST API directly.
//!
//! # Requests
//!
//! | Operation | Request |
//! |-----------|---------|
//! | index check | `HEAD /{index}` |
//! | index create | `PUT /{index}` with [`index_mapping`] |
//! | upsert | `POST /_bulk` with `update` actions (NDJSON), `doc_as_upsert` for new documents |
//! | scroll open | `POST /{index}/_search?scroll={keep_alive}` with a `term` query on `query_id` |
//! | scroll next | `POST /_search/scroll` |
//! | scroll release | `DELETE /_search/scroll` |
//!
//! Every request carries the configured timeout; a timeout surfaces as a
//! [`PersistenceFailure`] like any other transport error.
//!
//! Updates carry `retry_on_conflict`, so concurrent writers to one id merge
//! instead of failing with a version conflict. An update-only write whose
//! document is gone (`document_missing_exception`) is counted as missing,
//! not as a failure.

use super::{
    ARTICLE_FIELDS, BulkOutcome, DocumentStore, IndexStatus, ScrollPage, UpsertDoc, index_mapping,
};
use crate::error::{ItemFailure, PersistenceFailure};
use crate::models::Article;
use crate::utils::truncate_for_log;
use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use serde_json::{Value, json};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Default lifetime of a scroll context between page requests.
pub const DEFAULT_SCROLL_KEEP_ALIVE: &str = "2m";

/// Times the store re-runs an update that lost a version race.
pub const RETRY_ON_CONFLICT: u32 = 3;

#[derive(Debug, Clone)]
pub struct ElasticStore {
    client: Client,
    base_url: String,
    index: String,
    timeout: Duration,
    scroll_keep_alive: String,
}

impl ElasticStore {
    /// # Arguments
    ///
    /// * `base_url` - Cluster endpoint, e.g. `http://localhost:9200`
    /// * `index` - Article index name
    /// * `timeout` - Per-request timeout
    pub fn new(base_url: &str, index: &str, timeout: Duration) -> Result<Self, url::ParseError> {
        let parsed = Url::parse(base_url)?;
        Ok(Self {
            client: Client::new(),
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            index: index.to_string(),
            timeout,
            scroll_keep_alive: DEFAULT_SCROLL_KEEP_ALIVE.to_string(),
        })
    }

    /// Override the scroll keep-alive, in Elasticsearch time units (`90s`, `5m`).
    pub fn with_scroll_keep_alive(mut self, keep_alive: impl Into<String>) -> Self {
        self.scroll_keep_alive = keep_alive.into();
        self
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    fn index_url(&self) -> String {
        format!("{}/{}", self.base_url, urlencoding::encode(&self.index))
    }

    fn scroll_url(&self) -> String {
        format!("{}/_search/scroll", self.base_url)
    }

    async fn error_body(resp: reqwest::Response) -> String {
        truncate_for_log(&resp.text().await.unwrap_or_default(), 500)
    }

    async fn create_index(&self) -> Result<IndexStatus, PersistenceFailure> {
        let resp = self
            .client
            .put(self.index_url())
            .json(&index_mapping())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| PersistenceFailure::transport("index create", &e))?;

        let status = resp.status();
        if status.is_success() {
            info!(index = %self.index, "Created article index");
            return Ok(IndexStatus::Created);
        }

        let body: Value = resp.json().await.unwrap_or(Value::Null);
        if is_already_exists(&body) {
            info!(index = %self.index, "Index created concurrently by another caller");
            return Ok(IndexStatus::CreatedConcurrently);
        }
        Err(PersistenceFailure::new(
            "index create",
            format!(
                "status {}: {}",
                status.as_u16(),
                truncate_for_log(&body.to_string(), 500)
            ),
        ))
    }

    async fn search_page(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<ScrollPage, PersistenceFailure> {
        let resp = request
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| PersistenceFailure::transport(operation, &e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = Self::error_body(resp).await;
            return Err(PersistenceFailure::new(
                operation,
                format!("status {}: {}", status.as_u16(), body),
            ));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| PersistenceFailure::new(operation, format!("malformed response: {e}")))?;
        parse_scroll_page(&body).map_err(|e| PersistenceFailure::new(operation, e))
    }
}

#[async_trait]
impl DocumentStore for ElasticStore {
    #[instrument(level = "info", skip_all, fields(index = %self.index))]
    async fn ensure_index(&self) -> Result<IndexStatus, PersistenceFailure> {
        let resp = self
            .client
            .head(self.index_url())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| PersistenceFailure::transport("index check", &e))?;

        match resp.status() {
            status if status.is_success() => Ok(IndexStatus::Existing),
            StatusCode::NOT_FOUND => self.create_index().await,
            status => Err(PersistenceFailure::new(
                "index check",
                format!("unexpected status {}", status.as_u16()),
            )),
        }
    }

    #[instrument(level = "info", skip_all, fields(index = %self.index, docs = docs.len()))]
    async fn bulk_upsert(&self, docs: &[UpsertDoc]) -> Result<BulkOutcome, PersistenceFailure> {
        if docs.is_empty() {
            return Ok(BulkOutcome::default());
        }
        let body = bulk_body(&self.index, docs)
            .map_err(|e| PersistenceFailure::new("bulk upsert", e.to_string()))?;

        let t0 = Instant::now();
        let resp = self
            .client
            .post(format!("{}/_bulk", self.base_url))
            .header(header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                PersistenceFailure::transport("bulk upsert", &e).with_counts(docs.len(), 0)
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = Self::error_body(resp).await;
            return Err(PersistenceFailure::new(
                "bulk upsert",
                format!("status {}: {}", status.as_u16(), body),
            )
            .with_counts(docs.len(), 0));
        }

        let body: Value = resp.json().await.map_err(|e| {
            PersistenceFailure::new("bulk upsert", format!("malformed response: {e}"))
                .with_counts(docs.len(), 0)
        })?;
        let outcome = parse_bulk_response(&body);
        debug!(
            written = outcome.written,
            missing = outcome.missing,
            failed = outcome.failures.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Bulk request completed"
        );
        Ok(outcome)
    }

    #[instrument(level = "info", skip(self), fields(index = %self.index))]
    async fn open_scroll(
        &self,
        query_id: &str,
        page_size: usize,
    ) -> Result<ScrollPage, PersistenceFailure> {
        let request = self
            .client
            .post(format!("{}/_search", self.index_url()))
            .query(&[("scroll", self.scroll_keep_alive.as_str())])
            .json(&scroll_query(query_id, page_size));

        match self.search_page("scroll open", request).await {
            // Nothing has been ingested into this deployment yet.
            Err(e) if e.message.contains("index_not_found_exception") => {
                warn!(index = %self.index, "Index missing; nothing to stream");
                Ok(ScrollPage::default())
            }
            other => other,
        }
    }

    async fn next_page(&self, cursor: &str) -> Result<ScrollPage, PersistenceFailure> {
        let request = self
            .client
            .post(self.scroll_url())
            .json(&json!({ "scroll": self.scroll_keep_alive, "scroll_id": cursor }));
        self.search_page("scroll next", request).await
    }

    async fn release_scroll(&self, cursor: &str) -> Result<(), PersistenceFailure> {
        let resp = self
            .client
            .delete(self.scroll_url())
            .json(&json!({ "scroll_id": [cursor] }))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| PersistenceFailure::transport("scroll release", &e))?;

        let status = resp.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(PersistenceFailure::new(
                "scroll release",
                format!("status {}", status.as_u16()),
            ))
        }
    }
}

/// Search body for one scroll: exact match on `query_id`, `_doc` order.
pub fn scroll_query(query_id: &str, page_size: usize) -> Value {
    json!({
        "query": { "term": { "query_id": query_id } },
        "size": page_size.max(1),
        "_source": ARTICLE_FIELDS,
        "sort": ["_doc"]
    })
}

/// NDJSON body of `update` actions; `doc_as_upsert` only where creation is allowed.
pub fn bulk_body(index: &str, docs: &[UpsertDoc]) -> Result<String, serde_json::Error> {
    let mut body = String::new();
    for doc in docs {
        let action = json!({
            "update": { "_index": index, "_id": doc.id, "retry_on_conflict": RETRY_ON_CONFLICT }
        });
        let source = if doc.upsert {
            json!({ "doc": doc.doc, "doc_as_upsert": true })
        } else {
            json!({ "doc": doc.doc })
        };
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&source)?);
        body.push('\n');
    }
    Ok(body)
}

/// Count written items and collect per-item failures of a `_bulk` response.
pub fn parse_bulk_response(body: &Value) -> BulkOutcome {
    let mut outcome = BulkOutcome::default();
    let items = body.get("items").and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]);

    for item in items {
        // Each item is keyed by its action name.
        let Some(result) = item.as_object().and_then(|o| o.values().next()) else {
            continue;
        };
        let status = result.get("status").and_then(Value::as_u64).unwrap_or(0) as u16;
        if (200..300).contains(&status) {
            outcome.written += 1;
            continue;
        }
        let error = result.get("error");
        let error_type = error.and_then(|e| e.get("type")).and_then(Value::as_str);
        if status == 404 && error_type == Some("document_missing_exception") {
            outcome.missing += 1;
            continue;
        }
        let reason = error
            .and_then(|e| e.get("reason").or_else(|| e.get("type")))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| error.map(Value::to_string))
            .unwrap_or_else(|| "unknown error".to_string());
        outcome.failures.push(ItemFailure {
            id: result.get("_id").and_then(Value::as_str).unwrap_or_default().to_string(),
            status,
            reason,
        });
    }
    outcome
}

/// Decode a search or scroll response into a page of articles.
pub fn parse_scroll_page(body: &Value) -> Result<ScrollPage, String> {
    let cursor = body.get("_scroll_id").and_then(Value::as_str).map(str::to_string);
    let hits = body
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .ok_or_else(|| "response has no hits".to_string())?;

    let mut articles = Vec::with_capacity(hits.len());
    for hit in hits {
        let mut source = hit.get("_source").cloned().unwrap_or_else(|| json!({}));
        if let (Some(map), Some(id)) = (source.as_object_mut(), hit.get("_id")) {
            map.entry("id").or_insert_with(|| id.clone());
        }
        let article: Article = serde_json::from_value(source).map_err(|e| {
            let id = hit.get("_id").unwrap_or(&Value::Null);
            format!("hit {id} is not an article: {e}")
        })?;
        articles.push(article);
    }
    Ok(ScrollPage { articles, cursor })
}

fn is_already_exists(body: &Value) -> bool {
    body.pointer("/error/type").and_then(Value::as_str) == Some("resource_already_exists_exception")
}
