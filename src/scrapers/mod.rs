//! Retrieval adapter: turn a query string into candidate articles.
//!
//! Retrieval happens in two phases:
//!
//! 1. **Search**: a [`SearchProvider`] returns the provider's raw JSON answer
//! 2. **Normalization**: [`extract_articles`] maps raw results to [`Article`]s
//!
//! # Supported Providers
//!
//! | Provider | Module | Method | Notes |
//! |----------|--------|--------|-------|
//! | Google Custom Search | [`google`] | JSON API | Requires API key and engine id |
//!
//! # Normalization Rules
//!
//! The answer is an object whose `items` array holds raw results; a missing
//! `items` key means zero results.
//!
//! | Article field | Source keys, first non-empty wins |
//! |---------------|-----------------------------------|
//! | `title` | `title` |
//! | `url` | `link`, `url` |
//! | `description` | `snippet`, `htmlSnippet` (markup stripped), `description`, else empty |
//!
//! Items that are not objects, lack a title or link, or carry a link that is
//! not an absolute http(s) URL are skipped one by one. Provider order is kept.

pub mod google;

pub use google::GoogleCustomSearch;

use crate::error::{RetrievalError, ValidationError};
use crate::models::Article;
use crate::utils::first_non_empty;
use async_trait::async_trait;
use scraper::Html;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

/// A ranked search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Run `query` and return the provider's raw JSON answer.
    async fn search(&self, query: &str) -> Result<Value, RetrievalError>;
}

/// Search for `query` and normalize the results under `query_id`.
#[instrument(level = "info", skip(provider))]
pub async fn retrieve(
    provider: &dyn SearchProvider,
    query: &str,
    query_id: &str,
) -> Result<Vec<Article>, RetrievalError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(ValidationError::missing("query").into());
    }
    let query_id = query_id.trim();
    if query_id.is_empty() {
        return Err(ValidationError::missing("query_id").into());
    }

    let answer = provider.search(query).await?;
    let articles = extract_articles(&answer, query_id);
    info!(count = articles.len(), "Normalized search results");
    Ok(articles)
}

/// Map a provider answer to candidate articles, skipping malformed items.
pub fn extract_articles(answer: &Value, query_id: &str) -> Vec<Article> {
    let Some(items) = answer.get("items").and_then(Value::as_array) else {
        debug!("Provider answer has no items");
        return Vec::new();
    };

    items
        .iter()
        .enumerate()
        .filter_map(|(position, item)| {
            if !item.is_object() {
                debug!(position, "Skipping non-object result");
                return None;
            }
            let title = first_non_empty(item, &["title"])?;
            let link = first_non_empty(item, &["link", "url"])?;
            let description = description_of(item);

            match Article::candidate(query_id, title, &description, link) {
                Ok(article) => Some(article),
                Err(e) => {
                    warn!(position, error = %e, "Skipping result with invalid link");
                    None
                }
            }
        })
        .collect()
}

fn description_of(item: &Value) -> String {
    if let Some(snippet) = first_non_empty(item, &["snippet"]) {
        return snippet.to_string();
    }
    if let Some(html) = first_non_empty(item, &["htmlSnippet"]) {
        let text = strip_markup(html);
        if !text.is_empty() {
            return text;
        }
    }
    first_non_empty(item, &["description"])
        .unwrap_or_default()
        .to_string()
}

/// Text content of an HTML fragment with whitespace collapsed.
fn strip_markup(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text: String = fragment.root_element().text().collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
