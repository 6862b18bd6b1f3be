//! Subjectivity analysis of stored articles.
//!
//! An article's score is the fraction of its description segments the
//! classifier labels subjective:
//!
//! ```text
//! score = count(SUBJ) / total_segments      (0.0 when there are no segments)
//! ```
//!
//! [`analyze`] runs this over every article of a query. It drains the scroll
//! first, so cursor requests never wait on the classifier and the scroll
//! keep-alive only has to cover the store round trips. It then classifies on a
//! bounded pool of in-flight requests, writes each score back as
//! `analysis.subjectivity`, and reports the query mean. A classifier failure
//! only drops the affected article; a store failure aborts the whole run, so a
//! partial mean is never reported.
//!
//! Score write-back only patches existing documents. An article deleted while
//! the run was classifying stays deleted.

use crate::classifier::Classifier;
use crate::error::{ClassificationFailure, PersistenceFailure};
use crate::ingest::{DEFAULT_CHUNK_SIZE, upsert_all};
use crate::models::{Analysis, Article, SubjectivityLabel};
use crate::store::{DocumentStore, UpsertDoc};
use crate::stream::{DEFAULT_PAGE_SIZE, stream_articles};
use futures::{StreamExt, TryStreamExt, stream};
use itertools::{Either, Itertools};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Hard ceiling on concurrent classifier requests.
pub const MAX_CLASSIFIER_WORKERS: usize = 16;

static SENTENCE_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]+").expect("static regex"));

/// Split text on sentence delimiters into trimmed, non-empty segments.
///
/// ```
/// use news_explorer::analysis::split_segments;
///
/// assert_eq!(split_segments("Rates rose. Wow! Why? "), vec!["Rates rose", "Wow", "Why"]);
/// assert!(split_segments(" ... ").is_empty());
/// ```
pub fn split_segments(text: &str) -> Vec<&str> {
    SENTENCE_BOUNDARY
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Subjectivity score of one article, in `[0, 1]`.
pub async fn score(
    classifier: &dyn Classifier,
    article: &Article,
) -> Result<f64, ClassificationFailure> {
    let segments = split_segments(&article.description);
    if segments.is_empty() {
        return Ok(0.0);
    }

    let labels = classifier.classify(&segments).await?;
    if labels.len() != segments.len() {
        return Err(ClassificationFailure::Malformed(format!(
            "expected {} labels, got {}",
            segments.len(),
            labels.len()
        )));
    }
    let subjective = labels
        .iter()
        .filter(|l| **l == SubjectivityLabel::Subjective)
        .count();
    Ok(subjective as f64 / segments.len() as f64)
}

/// Knobs for one [`analyze`] run.
#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    /// Classifier requests in flight at once, clamped to `1..=MAX_CLASSIFIER_WORKERS`.
    pub workers: usize,
    pub page_size: usize,
    pub write_chunk_size: usize,
}

impl AnalyzeOptions {
    pub fn new(workers: usize, page_size: usize) -> Self {
        Self {
            workers: workers.clamp(1, MAX_CLASSIFIER_WORKERS),
            page_size: page_size.max(1),
            write_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self::new(4, DEFAULT_PAGE_SIZE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedArticle {
    pub id: String,
    pub reason: String,
}

/// Outcome of analysing every article of one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryReport {
    pub query_id: String,
    /// Articles streamed from the store.
    pub articles: usize,
    /// Articles scored and written back.
    pub scored: usize,
    pub failed: Vec<FailedArticle>,
    /// Mean over scored articles; `0.0` when none were scored.
    pub mean_subjectivity: f64,
}

/// Score every article stored under `query_id` and write the scores back.
#[instrument(
    level = "info",
    skip(store, classifier, options),
    fields(workers = options.workers.clamp(1, MAX_CLASSIFIER_WORKERS))
)]
pub async fn analyze(
    store: Arc<dyn DocumentStore>,
    classifier: Arc<dyn Classifier>,
    query_id: &str,
    options: &AnalyzeOptions,
) -> Result<QueryReport, PersistenceFailure> {
    let t0 = Instant::now();
    let workers = options.workers.clamp(1, MAX_CLASSIFIER_WORKERS);

    let scanned: Vec<Article> = stream_articles(Arc::clone(&store), query_id, options.page_size)
        .try_collect()
        .await?;
    debug!(
        articles = scanned.len(),
        elapsed_ms = t0.elapsed().as_millis() as u64,
        "Scroll drained"
    );

    let outcomes: Vec<(String, Result<f64, ClassificationFailure>)> = stream::iter(scanned)
        .map(|article| {
            let classifier = Arc::clone(&classifier);
            async move {
                let result = score(classifier.as_ref(), &article).await;
                (article.id, result)
            }
        })
        .buffer_unordered(workers)
        .collect()
        .await;

    let articles = outcomes.len();
    let (scores, failed): (Vec<(String, f64)>, Vec<FailedArticle>) =
        outcomes.into_iter().partition_map(|(id, result)| match result {
            Ok(s) => Either::Left((id, s)),
            Err(e) => {
                warn!(%id, error = %e, "Classification failed; article skipped");
                Either::Right(FailedArticle {
                    id,
                    reason: e.to_string(),
                })
            }
        });

    let docs = scores
        .iter()
        .map(|(id, s)| UpsertDoc::analysis(id, &Analysis::subjectivity(*s)))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| PersistenceFailure::new("analysis write-back", e.to_string()))?;
    let written = upsert_all(store.as_ref(), &docs, options.write_chunk_size).await?;
    debug!(written, "Scores written back");

    let mean_subjectivity = if scores.is_empty() {
        0.0
    } else {
        scores.iter().map(|(_, s)| s).sum::<f64>() / scores.len() as f64
    };

    info!(
        articles,
        scored = scores.len(),
        failed = failed.len(),
        mean_subjectivity,
        elapsed_ms = t0.elapsed().as_millis() as u64,
        "Query analysed"
    );

    Ok(QueryReport {
        query_id: query_id.to_string(),
        articles,
        scored: scores.len(),
        failed,
        mean_subjectivity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ingest;
    use crate::store::{BulkOutcome, IndexStatus, MemoryStore, ScrollPage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Labels a segment subjective when it contains "think"; fails on "boom".
    #[derive(Default)]
    struct KeywordClassifier {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Classifier for KeywordClassifier {
        async fn classify(
            &self,
            segments: &[&str],
        ) -> Result<Vec<SubjectivityLabel>, ClassificationFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if segments.iter().any(|s| s.contains("boom")) {
                return Err(ClassificationFailure::Malformed("boom".into()));
            }
            Ok(segments
                .iter()
                .map(|s| {
                    if s.contains("think") {
                        SubjectivityLabel::Subjective
                    } else {
                        SubjectivityLabel::Objective
                    }
                })
                .collect())
        }
    }

    /// Delegates to a [`MemoryStore`] and records how many classifier calls had
    /// started at each cursor request. Follow-up pages fail when asked to.
    struct ObservedStore {
        inner: Arc<MemoryStore>,
        classifier: Arc<KeywordClassifier>,
        calls_at_page: std::sync::Mutex<Vec<usize>>,
        fail_next_page: bool,
    }

    impl ObservedStore {
        fn new(inner: Arc<MemoryStore>, classifier: Arc<KeywordClassifier>) -> Self {
            Self {
                inner,
                classifier,
                calls_at_page: std::sync::Mutex::new(Vec::new()),
                fail_next_page: false,
            }
        }

        fn record(&self) {
            let calls = self.classifier.calls.load(Ordering::SeqCst);
            self.calls_at_page.lock().unwrap().push(calls);
        }
    }

    #[async_trait]
    impl DocumentStore for ObservedStore {
        async fn ensure_index(&self) -> Result<IndexStatus, PersistenceFailure> {
            self.inner.ensure_index().await
        }

        async fn bulk_upsert(
            &self,
            docs: &[UpsertDoc],
        ) -> Result<BulkOutcome, PersistenceFailure> {
            self.inner.bulk_upsert(docs).await
        }

        async fn open_scroll(
            &self,
            query_id: &str,
            page_size: usize,
        ) -> Result<ScrollPage, PersistenceFailure> {
            self.record();
            self.inner.open_scroll(query_id, page_size).await
        }

        async fn next_page(&self, cursor: &str) -> Result<ScrollPage, PersistenceFailure> {
            self.record();
            if self.fail_next_page {
                return Err(PersistenceFailure::new("scroll", "connection reset by peer"));
            }
            self.inner.next_page(cursor).await
        }

        async fn release_scroll(&self, cursor: &str) -> Result<(), PersistenceFailure> {
            self.inner.release_scroll(cursor).await
        }
    }

    /// Deletes one stored article the first time it classifies anything.
    struct DeletingClassifier {
        store: Arc<MemoryStore>,
        target: tokio::sync::Mutex<Option<String>>,
    }

    #[async_trait]
    impl Classifier for DeletingClassifier {
        async fn classify(
            &self,
            segments: &[&str],
        ) -> Result<Vec<SubjectivityLabel>, ClassificationFailure> {
            if let Some(id) = self.target.lock().await.take() {
                self.store.remove(&id).await;
            }
            Ok(vec![SubjectivityLabel::Objective; segments.len()])
        }
    }

    fn article(description: &str) -> Article {
        Article::candidate("q1", "T", description, "https://example.com/a").unwrap()
    }

    async fn seeded(descriptions: &[&str]) -> (Arc<MemoryStore>, Vec<Article>) {
        let store = Arc::new(MemoryStore::new());
        let batch: Vec<Article> = descriptions
            .iter()
            .enumerate()
            .map(|(i, d)| {
                Article::candidate("q1", "T", d, &format!("https://example.com/{i}")).unwrap()
            })
            .collect();
        ingest(store.as_ref(), &batch).await.unwrap();
        (store, batch)
    }

    #[test]
    fn test_split_segments_drops_empty_pieces() {
        assert_eq!(split_segments("One. Two!! Three?"), vec!["One", "Two", "Three"]);
        assert_eq!(split_segments("No delimiter"), vec!["No delimiter"]);
        assert!(split_segments("").is_empty());
        assert!(split_segments("?!.").is_empty());
    }

    #[tokio::test]
    async fn test_score_is_fraction_of_subjective_segments() {
        let classifier = KeywordClassifier::default();
        let s = score(&classifier, &article("I think so. It rained. We think not. Sun."))
            .await
            .unwrap();
        assert_eq!(s, 0.5);
    }

    #[tokio::test]
    async fn test_empty_description_scores_zero_without_classifier_call() {
        let classifier = KeywordClassifier::default();
        assert_eq!(score(&classifier, &article("")).await.unwrap(), 0.0);
        assert_eq!(score(&classifier, &article(" . ! ")).await.unwrap(), 0.0);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_analyze_writes_scores_and_reports_mean() {
        let (store, batch) = seeded(&["I think so.", "Facts only.", "I think. Facts."]).await;
        let classifier = Arc::new(KeywordClassifier::default());

        let report = analyze(store.clone(), classifier, "q1", &AnalyzeOptions::new(2, 2))
            .await
            .unwrap();

        assert_eq!(report.articles, 3);
        assert_eq!(report.scored, 3);
        assert!(report.failed.is_empty());
        assert!((report.mean_subjectivity - 0.5).abs() < 1e-9);

        let stored = store.document(&batch[0].id).await.unwrap();
        assert_eq!(stored["analysis"]["subjectivity"], 1.0);
        assert_eq!(stored["title"], "T");
        let stored = store.document(&batch[2].id).await.unwrap();
        assert_eq!(stored["analysis"]["subjectivity"], 0.5);
    }

    #[tokio::test]
    async fn test_classification_failure_is_isolated() {
        let (store, batch) = seeded(&["I think.", "boom.", "Plain."]).await;
        let classifier = Arc::new(KeywordClassifier::default());

        let report = analyze(store.clone(), classifier, "q1", &AnalyzeOptions::default())
            .await
            .unwrap();

        assert_eq!(report.articles, 3);
        assert_eq!(report.scored, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].id, batch[1].id);
        assert!((report.mean_subjectivity - 0.5).abs() < 1e-9);

        let failed = store.document(&batch[1].id).await.unwrap();
        assert!(failed.get("analysis").is_none());
    }

    #[tokio::test]
    async fn test_unknown_query_reports_zero_mean() {
        let store = Arc::new(MemoryStore::new());
        let report = analyze(
            store,
            Arc::new(KeywordClassifier::default()),
            "nothing",
            &AnalyzeOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(report.articles, 0);
        assert_eq!(report.mean_subjectivity, 0.0);
    }

    #[tokio::test]
    async fn test_worker_pool_is_bounded() {
        let descriptions: Vec<String> = (0..40).map(|i| format!("Item {i}.")).collect();
        let refs: Vec<&str> = descriptions.iter().map(String::as_str).collect();
        let (store, _) = seeded(&refs).await;
        let classifier = Arc::new(KeywordClassifier::default());

        let options = AnalyzeOptions::new(100, 7);
        assert_eq!(options.workers, MAX_CLASSIFIER_WORKERS);
        let report = analyze(store, classifier.clone(), "q1", &AnalyzeOptions::new(3, 7))
            .await
            .unwrap();

        assert_eq!(report.scored, 40);
        assert!(classifier.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 40);
    }

    #[tokio::test]
    async fn test_write_back_failure_aborts_report() {
        let (store, _) = seeded(&["I think."]).await;
        store.fail_bulk_requests(true);
        let err = analyze(
            store,
            Arc::new(KeywordClassifier::default()),
            "q1",
            &AnalyzeOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(err.nothing_written());
    }

    #[tokio::test]
    async fn test_scan_finishes_before_classification_starts() {
        let descriptions: Vec<String> = (0..30).map(|i| format!("Item {i}.")).collect();
        let refs: Vec<&str> = descriptions.iter().map(String::as_str).collect();
        let (inner, _) = seeded(&refs).await;
        let classifier = Arc::new(KeywordClassifier::default());
        let store = Arc::new(ObservedStore::new(inner, classifier.clone()));

        let report = analyze(store.clone(), classifier.clone(), "q1", &AnalyzeOptions::new(4, 4))
            .await
            .unwrap();

        assert_eq!(report.scored, 30);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 30);
        let seen = store.calls_at_page.lock().unwrap();
        assert!(seen.len() >= 8, "expected one request per page, saw {}", seen.len());
        assert!(seen.iter().all(|&calls| calls == 0), "cursor waited on classifier: {seen:?}");
    }

    #[tokio::test]
    async fn test_scroll_failure_after_first_page_writes_nothing() {
        let (inner, _) = seeded(&["I think.", "Plain.", "We think.", "Facts.", "More."]).await;
        let classifier = Arc::new(KeywordClassifier::default());
        let mut store = ObservedStore::new(inner.clone(), classifier.clone());
        store.fail_next_page = true;

        let err = analyze(Arc::new(store), classifier.clone(), "q1", &AnalyzeOptions::new(2, 2))
            .await
            .unwrap_err();

        assert_eq!(err.message, "connection reset by peer");
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
        for doc in inner.documents().await {
            assert!(doc.get("analysis").is_none(), "partial score written: {doc}");
        }
    }

    #[tokio::test]
    async fn test_article_deleted_mid_run_is_not_recreated() {
        let (store, batch) = seeded(&["One.", "Two.", "Three."]).await;
        let classifier = Arc::new(DeletingClassifier {
            store: store.clone(),
            target: tokio::sync::Mutex::new(Some(batch[1].id.clone())),
        });

        let report = analyze(store.clone(), classifier, "q1", &AnalyzeOptions::new(1, 10))
            .await
            .unwrap();

        assert_eq!(report.articles, 3);
        assert!(store.document(&batch[1].id).await.is_none());
        assert_eq!(store.len().await, 2);
        let kept = store.document(&batch[0].id).await.unwrap();
        assert_eq!(kept["analysis"]["subjectivity"], 0.0);
        assert_eq!(kept["title"], "T");
    }
}
