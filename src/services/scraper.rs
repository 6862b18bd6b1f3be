//! Scraper service: retrieve candidates for a query and ingest them.

use super::{Reply, error_reply, health, string_field};
use crate::error::{RetrievalError, ScrapeError, ValidationError};
use crate::ingest::scrape_and_ingest;
use crate::scrapers::SearchProvider;
use crate::store::DocumentStore;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Clone)]
pub struct ScraperState {
    pub provider: Arc<dyn SearchProvider>,
    pub store: Arc<dyn DocumentStore>,
}

pub fn router(state: ScraperState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/service/scraper", post(scrape))
        .with_state(state)
}

async fn scrape(
    State(state): State<ScraperState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Reply {
    let (Some(query), Some(query_id)) = (
        string_field(&body, "query").map(str::to_string),
        string_field(&body, "query_id").map(str::to_string),
    ) else {
        let err = ScrapeError::from(RetrievalError::from(ValidationError::missing("query")));
        return error_reply(StatusCode::BAD_REQUEST, err.public_message());
    };

    let provider = state.provider.as_ref();
    match scrape_and_ingest(provider, state.store.as_ref(), &query, &query_id).await {
        Ok(report) => {
            info!(%query_id, written = report.written, "Scrape finished");
            (
                StatusCode::OK,
                Json(json!({ "status": "ok", "ingested": report.written })),
            )
        }
        Err(e) => {
            error!(%query_id, error = %e, "Scrape failed");
            let status =
                StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            error_reply(status, e.public_message())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::call;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    enum Provider {
        Results(Value),
        Unauthorized,
        Down,
    }

    #[async_trait]
    impl SearchProvider for Provider {
        async fn search(&self, _query: &str) -> Result<Value, RetrievalError> {
            match self {
                Provider::Results(v) => Ok(v.clone()),
                Provider::Unauthorized => Err(RetrievalError::Unauthorized("no key".into())),
                Provider::Down => Err(RetrievalError::Unavailable("timeout".into())),
            }
        }
    }

    fn app(provider: Provider, store: Arc<MemoryStore>) -> Router {
        router(ScraperState {
            provider: Arc::new(provider),
            store,
        })
    }

    fn results() -> Value {
        json!({ "items": [
            { "title": "A", "link": "https://e.com/a", "snippet": "One." },
            { "title": "B", "link": "https://e.com/b", "snippet": "Two." },
            { "title": "dup", "link": "https://e.com/a" }
        ]})
    }

    const BODY: &str = r#"{"query":"rust","query_id":"q1"}"#;

    #[tokio::test]
    async fn test_success_ingests_and_dedups() {
        let store = Arc::new(MemoryStore::new());
        let service = app(Provider::Results(results()), store.clone());
        let (status, body) = call(service, "POST", "/service/scraper", BODY).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["ingested"], 2);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_missing_query_id_is_400_without_side_effects() {
        let store = Arc::new(MemoryStore::new());
        let (status, _) = call(
            app(Provider::Results(results()), store.clone()),
            "POST",
            "/service/scraper",
            r#"{"query":"rust"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let cases = [
            (Provider::Unauthorized, StatusCode::UNAUTHORIZED),
            (Provider::Down, StatusCode::BAD_GATEWAY),
        ];
        for (provider, expected) in cases {
            let store = Arc::new(MemoryStore::new());
            let (status, body) =
                call(app(provider, store.clone()), "POST", "/service/scraper", BODY).await;
            assert_eq!(status, expected);
            assert!(body["error"].is_string());
            assert!(store.is_empty().await);
        }

        let store = Arc::new(MemoryStore::new());
        store.fail_bulk_requests(true);
        let (status, body) =
            call(app(Provider::Results(results()), store), "POST", "/service/scraper", BODY).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to save articles into elastic search");
    }
}
