//! Subjectivity classifier interaction with exponential backoff retry logic.
//!
//! The classifier is an external model reached over HTTP. This module keeps
//! it behind a trait so scoring can run against any backend:
//!
//! - [`Classifier`]: core trait, one label per input segment
//! - [`HttpClassifier`]: text-classification inference server client
//! - [`RetryClassifier`]: decorator adding retry logic to any `Classifier`
//!
//! # Retry Strategy
//!
//! - Only transient failures are retried (transport errors, 429, 5xx)
//! - Exponential backoff starting at `base_delay`
//! - Maximum delay capped at 30 seconds
//! - Random jitter (0-250ms) added to prevent thundering herd

use crate::error::ClassificationFailure;
use crate::models::SubjectivityLabel;
use crate::utils::truncate_for_log;
use async_trait::async_trait;
use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, instrument, warn};

/// Something that labels text segments as subjective or objective.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Label every segment. The result has the same length and order as
    /// `segments`.
    async fn classify(
        &self,
        segments: &[&str],
    ) -> Result<Vec<SubjectivityLabel>, ClassificationFailure>;
}

/// Wrapper that adds exponential backoff retry logic to any [`Classifier`].
///
/// # Backoff Strategy
///
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
pub struct RetryClassifier<T> {
    inner: T,
    max_retries: usize,
    base_delay: Duration,
    max_delay: Duration,
}

impl<T> RetryClassifier<T>
where
    T: Classifier,
{
    /// # Arguments
    ///
    /// * `inner` - The classifier to wrap
    /// * `max_retries` - Retries after the first attempt
    /// * `base_delay` - Delay before the first retry; doubles each time
    pub fn new(inner: T, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
        }
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let shift = (attempt.saturating_sub(1)).min(16) as u32;
        let delay = self.base_delay.saturating_mul(1 << shift).min(self.max_delay);
        let jitter_ms: u64 = rng().random_range(0..=250);
        delay + Duration::from_millis(jitter_ms)
    }
}

impl<T> fmt::Debug for RetryClassifier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryClassifier")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

#[async_trait]
impl<T> Classifier for RetryClassifier<T>
where
    T: Classifier,
{
    #[instrument(level = "debug", skip_all, fields(segments = segments.len()))]
    async fn classify(
        &self,
        segments: &[&str],
    ) -> Result<Vec<SubjectivityLabel>, ClassificationFailure> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.classify(segments).await {
                Ok(labels) => return Ok(labels),
                Err(e) => {
                    attempt += 1;
                    let elapsed_ms_attempt = attempt_t0.elapsed().as_millis() as u64;
                    let elapsed_ms_total = total_t0.elapsed().as_millis() as u64;

                    if !e.is_transient() || attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt,
                            elapsed_ms_total,
                            error = %e,
                            "classify() giving up"
                        );
                        return Err(e);
                    }

                    let delay = self.backoff(attempt);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt,
                        elapsed_ms_total,
                        ?delay,
                        error = %e,
                        "classify() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    inputs: &'a [&'a str],
}

#[derive(Deserialize)]
struct Prediction {
    label: String,
    #[allow(dead_code)]
    #[serde(default)]
    score: f64,
}

/// Client for a text-classification inference endpoint.
///
/// Sends `{"inputs": [...]}` and expects a JSON array of `{label, score}`
/// objects in input order, labels `SUBJ` / `OBJ`.
#[derive(Debug, Clone)]
pub struct HttpClassifier {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpClassifier {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    #[instrument(level = "debug", skip_all, fields(segments = segments.len()))]
    async fn classify(
        &self,
        segments: &[&str],
    ) -> Result<Vec<SubjectivityLabel>, ClassificationFailure> {
        if segments.is_empty() {
            return Ok(Vec::new());
        }

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&ClassifyRequest { inputs: segments })
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ClassificationFailure::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ClassificationFailure::Status {
                status: status.as_u16(),
                body: truncate_for_log(&body, 300),
            });
        }

        let predictions: Vec<Prediction> = resp
            .json()
            .await
            .map_err(|e| ClassificationFailure::Malformed(e.to_string()))?;
        labels_from_predictions(predictions, segments.len())
    }
}

fn labels_from_predictions(
    predictions: Vec<Prediction>,
    expected: usize,
) -> Result<Vec<SubjectivityLabel>, ClassificationFailure> {
    if predictions.len() != expected {
        return Err(ClassificationFailure::Malformed(format!(
            "expected {expected} predictions, got {}",
            predictions.len()
        )));
    }
    predictions
        .into_iter()
        .map(|p| {
            SubjectivityLabel::from_label(&p.label).ok_or_else(|| {
                ClassificationFailure::Malformed(format!("unknown label '{}'", p.label))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Flaky {
        failures_left: AtomicUsize,
        calls: AtomicUsize,
        error: ClassificationFailure,
    }

    #[async_trait]
    impl Classifier for Flaky {
        async fn classify(
            &self,
            segments: &[&str],
        ) -> Result<Vec<SubjectivityLabel>, ClassificationFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(self.error.clone());
            }
            Ok(vec![SubjectivityLabel::Objective; segments.len()])
        }
    }

    fn flaky(failures: usize, error: ClassificationFailure) -> Flaky {
        Flaky {
            failures_left: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
            error,
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let retry = RetryClassifier::new(
            flaky(2, ClassificationFailure::Transport("reset".into())),
            3,
            Duration::from_millis(1),
        );
        let labels = retry.classify(&["a", "b"]).await.unwrap();
        assert_eq!(labels.len(), 2);
        assert_eq!(retry.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_retries() {
        let retry = RetryClassifier::new(
            flaky(10, ClassificationFailure::Transport("reset".into())),
            2,
            Duration::from_millis(1),
        );
        assert!(retry.classify(&["a"]).await.is_err());
        assert_eq!(retry.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_does_not_repeat_permanent_failures() {
        let retry = RetryClassifier::new(
            flaky(10, ClassificationFailure::Malformed("bad".into())),
            5,
            Duration::from_millis(1),
        );
        assert!(retry.classify(&["a"]).await.is_err());
        assert_eq!(retry.inner.calls.load(Ordering::SeqCst), 1);
    }

    fn prediction(label: &str) -> Prediction {
        Prediction {
            label: label.into(),
            score: 0.9,
        }
    }

    #[test]
    fn test_labels_from_predictions_checks_length_and_labels() {
        let ok = vec![prediction("SUBJ"), prediction("OBJ")];
        assert_eq!(
            labels_from_predictions(ok, 2).unwrap(),
            vec![SubjectivityLabel::Subjective, SubjectivityLabel::Objective]
        );

        let short = vec![prediction("SUBJ")];
        assert!(labels_from_predictions(short, 2).is_err());

        let unknown = vec![prediction("NEUTRAL")];
        assert!(labels_from_predictions(unknown, 1).is_err());
    }

    #[tokio::test]
    async fn test_http_classifier_round_trip() {
        let router = Router::new().route(
            "/classify",
            post(|Json(body): Json<Value>| async move {
                let labels: Vec<Value> = body["inputs"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|s| {
                        let subjective = s.as_str().unwrap().contains("think");
                        let label = if subjective { "SUBJ" } else { "OBJ" };
                        json!({ "label": label, "score": 0.99 })
                    })
                    .collect();
                Json(Value::Array(labels))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        let classifier =
            HttpClassifier::new(format!("http://{addr}/classify"), Duration::from_secs(5));
        let labels = classifier
            .classify(&["I think this is great", "The sky is blue"])
            .await
            .unwrap();
        assert_eq!(
            labels,
            vec![SubjectivityLabel::Subjective, SubjectivityLabel::Objective]
        );
    }

    #[tokio::test]
    async fn test_http_classifier_maps_server_errors() {
        let router = Router::new().route(
            "/classify",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "model loading") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });

        let classifier =
            HttpClassifier::new(format!("http://{addr}/classify"), Duration::from_secs(5));
        let err = classifier.classify(&["x"]).await.unwrap_err();
        assert!(matches!(err, ClassificationFailure::Status { status: 503, .. }));
        assert!(err.is_transient());
    }
}
