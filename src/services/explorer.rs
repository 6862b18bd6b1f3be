//! Explorer service: accepts a query and starts ingestion for it.

use super::{Reply, error_reply, health, string_field};
use crate::coordinator::Coordinator;
use crate::error::CoordinatorError;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{info, warn};

pub fn router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/service/explorer", post(explore))
        .with_state(coordinator)
}

async fn explore(
    State(coordinator): State<Arc<Coordinator>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Reply {
    let Some(query) = string_field(&body, "query").map(str::to_string) else {
        return error_reply(
            StatusCode::BAD_REQUEST,
            "Missing or invalid 'query' (string required).",
        );
    };

    match coordinator.submit(&query).await {
        Ok(query_id) => {
            info!(%query_id, "Exploration started");
            (StatusCode::OK, Json(json!({ "status": "ok", "query_id": query_id })))
        }
        Err(e) => {
            warn!(error = %e, "Exploration failed");
            reply_for(e)
        }
    }
}

fn reply_for(err: CoordinatorError) -> Reply {
    match err {
        CoordinatorError::Validation(e) => error_reply(StatusCode::BAD_REQUEST, e.to_string()),
        CoordinatorError::Unreachable(message) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": "scraper_unreachable", "message": message })),
        ),
        CoordinatorError::Upstream { status, details } => (
            StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
            Json(json!({ "error": "scraper_error", "status": status, "details": details })),
        ),
    }
}
