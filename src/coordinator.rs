//! Query coordination: mint a `query_id` and hand the query to ingestion.
//!
//! The coordinator keeps no state. It validates the query, mints a fresh
//! UUIDv4 correlation token and asks an [`IngestTrigger`] to retrieve and
//! store candidates under it. The trigger is either the scraper service over
//! HTTP ([`HttpIngestTrigger`]) or the pipeline run in-process
//! ([`LocalIngestTrigger`]).

use crate::error::{CoordinatorError, ValidationError};
use crate::ingest::scrape_and_ingest;
use crate::scrapers::SearchProvider;
use crate::store::DocumentStore;
use crate::utils::truncate_for_log;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument};
use uuid::Uuid;

pub const DEFAULT_SCRAPER_URL: &str = "http://127.0.0.1:8000/service/scraper";
pub const TRIGGER_TIMEOUT: Duration = Duration::from_secs(15);

/// Body of an ingestion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestRequest {
    pub query: String,
    pub query_id: String,
}

/// Starts retrieval and ingestion for one query.
#[async_trait]
pub trait IngestTrigger: Send + Sync {
    async fn trigger(&self, request: &IngestRequest) -> Result<(), CoordinatorError>;
}

/// Posts the request to a remote ingestion service.
#[derive(Debug, Clone)]
pub struct HttpIngestTrigger {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpIngestTrigger {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            timeout: TRIGGER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl IngestTrigger for HttpIngestTrigger {
    #[instrument(level = "info", skip_all, fields(url = %self.url, query_id = %request.query_id))]
    async fn trigger(&self, request: &IngestRequest) -> Result<(), CoordinatorError> {
        let resp = self
            .client
            .post(&self.url)
            .json(request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Ingestion trigger unreachable");
                CoordinatorError::Unreachable(e.to_string())
            })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        error!(
            status = status.as_u16(),
            body = %truncate_for_log(&body, 300),
            "Ingestion trigger failed"
        );
        Err(CoordinatorError::Upstream {
            status: status.as_u16(),
            details: serde_json::from_str(&body).unwrap_or(Value::Null),
        })
    }
}

/// Runs retrieval and ingestion in-process.
pub struct LocalIngestTrigger {
    provider: Arc<dyn SearchProvider>,
    store: Arc<dyn DocumentStore>,
}

impl LocalIngestTrigger {
    pub fn new(provider: Arc<dyn SearchProvider>, store: Arc<dyn DocumentStore>) -> Self {
        Self { provider, store }
    }
}

#[async_trait]
impl IngestTrigger for LocalIngestTrigger {
    async fn trigger(&self, request: &IngestRequest) -> Result<(), CoordinatorError> {
        scrape_and_ingest(
            self.provider.as_ref(),
            self.store.as_ref(),
            &request.query,
            &request.query_id,
        )
        .await
        .map(|report| info!(written = report.written, "Local ingestion finished"))
        .map_err(|e| {
            error!(error = %e, "Local ingestion failed");
            CoordinatorError::Upstream {
                status: e.http_status(),
                details: json!({ "error": e.public_message() }),
            }
        })
    }
}

type IdGenerator = Box<dyn Fn() -> String + Send + Sync>;

pub struct Coordinator {
    trigger: Arc<dyn IngestTrigger>,
    mint: IdGenerator,
}

impl Coordinator {
    pub fn new(trigger: Arc<dyn IngestTrigger>) -> Self {
        Self {
            trigger,
            mint: Box::new(|| Uuid::new_v4().to_string()),
        }
    }

    /// Replace the UUIDv4 generator, e.g. for deterministic ids.
    pub fn with_id_generator<F>(mut self, mint: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.mint = Box::new(mint);
        self
    }

    /// Validate `query`, mint a `query_id` and trigger ingestion for it.
    ///
    /// Returns the minted `query_id` once the trigger reports success.
    #[instrument(level = "info", skip(self))]
    pub async fn submit(&self, query: &str) -> Result<String, CoordinatorError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ValidationError::missing("query").into());
        }

        let query_id = (self.mint)();
        info!(%query_id, "Minted query id");
        self.trigger
            .trigger(&IngestRequest {
                query: query.to_string(),
                query_id: query_id.clone(),
            })
            .await?;
        Ok(query_id)
    }
}
