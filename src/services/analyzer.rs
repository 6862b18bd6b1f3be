//! Analyzer service: score every article of a query and report the mean.

use super::{Reply, error_reply, health, string_field};
use crate::analysis::{AnalyzeOptions, analyze};
use crate::classifier::Classifier;
use crate::store::DocumentStore;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::error;

#[derive(Clone)]
pub struct AnalyzerState {
    pub store: Arc<dyn DocumentStore>,
    pub classifier: Arc<dyn Classifier>,
    pub options: AnalyzeOptions,
}

pub fn router(state: AnalyzerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/service/analyzer", post(run_analysis))
        .with_state(state)
}

async fn run_analysis(
    State(state): State<AnalyzerState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Reply {
    let Some(query_id) = string_field(&body, "query_id").map(str::to_string) else {
        return error_reply(
            StatusCode::BAD_REQUEST,
            "Missing or invalid 'query_id' (string required).",
        );
    };

    match analyze(
        Arc::clone(&state.store),
        Arc::clone(&state.classifier),
        &query_id,
        &state.options,
    )
    .await
    {
        Ok(report) => {
            let mut reply = json!({ "status": "ok" });
            if let (Some(map), Ok(Value::Object(fields))) =
                (reply.as_object_mut(), serde_json::to_value(&report))
            {
                map.extend(fields);
            }
            (StatusCode::OK, Json(reply))
        }
        Err(e) => {
            error!(%query_id, error = %e, "Analysis failed");
            error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Failed to analyze articles")
        }
    }
}
