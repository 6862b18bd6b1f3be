//! Google Custom Search JSON API provider.
//!
//! Issues `GET {endpoint}?key=..&cx=..&q=..` and returns the answer as is.
//! Normalization happens in [`super::extract_articles`].
//!
//! # Status Mapping
//!
//! | Answer | Error |
//! |--------|-------|
//! | no API key configured | [`RetrievalError::Unauthorized`], no request sent |
//! | 401, 403, or 400 "API key not valid" | [`RetrievalError::Unauthorized`] |
//! | any other non-success, timeout, connection error | [`RetrievalError::Unavailable`] |

use super::SearchProvider;
use crate::error::RetrievalError;
use crate::utils::truncate_for_log;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";
pub const DEFAULT_CX: &str = "d5b275046e0124b12";

#[derive(Clone)]
pub struct GoogleCustomSearch {
    client: Client,
    api_key: Option<String>,
    cx: String,
    endpoint: String,
    timeout: Duration,
}

impl std::fmt::Debug for GoogleCustomSearch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleCustomSearch")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("cx", &self.cx)
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl GoogleCustomSearch {
    pub fn new(
        api_key: Option<String>,
        cx: impl Into<String>,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            cx: cx.into(),
            endpoint: endpoint.into(),
            timeout,
        }
    }
}

#[async_trait]
impl SearchProvider for GoogleCustomSearch {
    #[instrument(level = "info", skip(self))]
    async fn search(&self, query: &str) -> Result<Value, RetrievalError> {
        let Some(key) = self.api_key.as_deref() else {
            return Err(RetrievalError::Unauthorized(
                "GOOGLE_SEARCH_ENGINE_API_KEY is not configured".to_string(),
            ));
        };

        let t0 = Instant::now();
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[("key", key), ("cx", self.cx.as_str()), ("q", query)])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    let timeout = self.timeout;
                    RetrievalError::Unavailable(format!("search timed out after {timeout:?}"))
                } else {
                    RetrievalError::Unavailable(format!("search request failed: {e}"))
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(
                status = status.as_u16(),
                body = %truncate_for_log(&body, 300),
                "Search provider refused request"
            );
            return Err(classify_failure(status, &body));
        }

        let answer: Value = resp
            .json()
            .await
            .map_err(|e| RetrievalError::Unavailable(format!("malformed search answer: {e}")))?;
        let items = answer
            .get("items")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        info!(items, elapsed_ms = t0.elapsed().as_millis() as u64, "Search completed");
        debug!(answer = %truncate_for_log(&answer.to_string(), 500), "Search answer");
        Ok(answer)
    }
}

fn classify_failure(status: StatusCode, body: &str) -> RetrievalError {
    let detail = format!("status {}: {}", status.as_u16(), truncate_for_log(body, 300));
    let bad_key = status == StatusCode::BAD_REQUEST
        && (body.contains("API key not valid") || body.contains("keyInvalid"));
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN || bad_key {
        RetrievalError::Unauthorized(detail)
    } else {
        RetrievalError::Unavailable(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::collections::HashMap;

    async fn spawn(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/customsearch/v1")
    }

    fn provider(key: Option<&str>, endpoint: &str) -> GoogleCustomSearch {
        GoogleCustomSearch::new(
            key.map(str::to_string),
            DEFAULT_CX,
            endpoint,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_missing_key_is_unauthorized_without_request() {
        // Nothing listens here; a request would surface as Unavailable.
        let err = provider(None, "http://127.0.0.1:9/customsearch/v1")
            .search("rust")
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Unauthorized(_)));

        let err = provider(Some("  "), "http://127.0.0.1:9/customsearch/v1")
            .search("rust")
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_sends_key_cx_and_encoded_query() {
        let router = Router::new().route(
            "/customsearch/v1",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                let param = |name: &str| params.get(name).cloned().unwrap_or_default();
                Json(json!({ "items": [{
                    "title": param("q"),
                    "link": format!("https://example.com/{}", param("key")),
                    "snippet": param("cx")
                }]}))
            }),
        );
        let endpoint = spawn(router).await;
        let answer = provider(Some("k1"), &endpoint)
            .search("rust & tokio")
            .await
            .unwrap();
        assert_eq!(answer["items"][0]["title"], "rust & tokio");
        assert_eq!(answer["items"][0]["link"], "https://example.com/k1");
        assert_eq!(answer["items"][0]["snippet"], DEFAULT_CX);
    }

    #[tokio::test]
    async fn test_rejected_key_is_unauthorized() {
        let router = Router::new().route(
            "/customsearch/v1",
            get(|| async { (AxumStatus::FORBIDDEN, "forbidden") }),
        );
        let endpoint = spawn(router).await;
        let err = provider(Some("k1"), &endpoint).search("rust").await.unwrap_err();
        assert!(matches!(err, RetrievalError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_rate_limit_is_unavailable() {
        let router = Router::new().route(
            "/customsearch/v1",
            get(|| async { (AxumStatus::TOO_MANY_REQUESTS, "quota") }),
        );
        let endpoint = spawn(router).await;
        let err = provider(Some("k1"), &endpoint).search("rust").await.unwrap_err();
        assert!(matches!(err, RetrievalError::Unavailable(_)));
    }

    #[test]
    fn test_invalid_key_answer_maps_to_unauthorized() {
        let body =
            r#"{"error":{"code":400,"message":"API key not valid. Please pass a valid API key."}}"#;
        assert!(matches!(
            classify_failure(StatusCode::BAD_REQUEST, body),
            RetrievalError::Unauthorized(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::BAD_REQUEST, "bad cx"),
            RetrievalError::Unavailable(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::SERVICE_UNAVAILABLE, ""),
            RetrievalError::Unavailable(_)
        ));
    }
}
