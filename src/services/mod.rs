//! HTTP surface: one axum service per pipeline stage.
//!
//! | Service | Route | Module |
//! |---------|-------|--------|
//! | explorer | `POST /service/explorer` | [`explorer`] |
//! | scraper | `POST /service/scraper` | [`scraper`] |
//! | analyzer | `POST /service/analyzer` | [`analyzer`] |
//!
//! Every service also answers `GET /health`. Request bodies are parsed as
//! loose JSON so that a missing, empty or non-string field is answered with
//! 400 `{error}` instead of axum's default rejection.

pub mod analyzer;
pub mod explorer;
pub mod scraper;

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::{Json, Router};
use serde_json::{Value, json};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

pub type Reply = (StatusCode, Json<Value>);

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Trimmed, non-empty string field of a request body.
pub fn string_field<'a>(
    body: &'a Result<Json<Value>, JsonRejection>,
    key: &str,
) -> Option<&'a str> {
    let Ok(Json(body)) = body else { return None };
    body.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub fn error_reply(status: StatusCode, message: impl Into<String>) -> Reply {
    (status, Json(json!({ "error": message.into() })))
}

/// Bind `addr` and serve `router` with request tracing until the process exits.
pub async fn serve(name: &str, addr: SocketAddr, router: Router) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(service = name, addr = %listener.local_addr()?, "Listening");
    axum::serve(listener, router.layer(TraceLayer::new_for_http())).await
}
