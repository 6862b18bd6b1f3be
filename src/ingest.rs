//! Ingestion pipeline: idempotent bulk create-or-merge of candidate articles.
//!
//! # Idempotency
//!
//! Every candidate is written as an upsert keyed by [`Article::id`], which is
//! derived from `(url, query_id)`. Replaying a batch converges to the same
//! stored documents, so re-running ingestion is the recovery path after any
//! [`PersistenceFailure`], partial or total.
//!
//! # Batching
//!
//! Candidates sharing an id within one batch are collapsed to the first
//! occurrence, so reported counts are distinct documents. Documents go out
//! in chunks of [`DEFAULT_CHUNK_SIZE`]. Item rejections in one chunk do not
//! stop later chunks; a transport failure does, because the store is
//! presumably gone.

use crate::error::{PersistenceFailure, ScrapeError};
use crate::models::Article;
use crate::scrapers::{SearchProvider, retrieve};
use crate::store::{DocumentStore, UpsertDoc};
use itertools::Itertools;
use serde::Serialize;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// Documents per bulk request.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Counts for a completed ingestion, in distinct documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub attempted: usize,
    pub written: usize,
}

/// Ensure the index exists, then upsert every candidate.
pub async fn ingest(
    store: &dyn DocumentStore,
    candidates: &[Article],
) -> Result<IngestReport, PersistenceFailure> {
    ingest_in_chunks(store, candidates, DEFAULT_CHUNK_SIZE).await
}

#[instrument(
    level = "info",
    skip_all,
    fields(candidates = candidates.len(), chunk_size = chunk_size)
)]
pub async fn ingest_in_chunks(
    store: &dyn DocumentStore,
    candidates: &[Article],
    chunk_size: usize,
) -> Result<IngestReport, PersistenceFailure> {
    let status = store.ensure_index().await?;
    info!(?status, "Article index ready");

    let distinct: Vec<&Article> = candidates.iter().unique_by(|a| a.id.clone()).collect();
    if distinct.len() < candidates.len() {
        info!(
            duplicates = candidates.len() - distinct.len(),
            "Collapsed duplicate candidates"
        );
    }

    let docs = distinct
        .into_iter()
        .map(UpsertDoc::from_article)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| {
            PersistenceFailure::new("bulk upsert", format!("cannot serialize article: {e}"))
                .with_counts(candidates.len(), 0)
        })?;

    let written = upsert_all(store, &docs, chunk_size).await?;
    Ok(IngestReport {
        attempted: docs.len(),
        written,
    })
}

/// Write `docs` in chunks and fail if any document was rejected.
///
/// The returned failure carries how many documents did make it, so callers
/// can tell a partial write from a total one. Update-only documents that no
/// longer exist are skipped, not failed.
pub async fn upsert_all(
    store: &dyn DocumentStore,
    docs: &[UpsertDoc],
    chunk_size: usize,
) -> Result<usize, PersistenceFailure> {
    let attempted = docs.len();
    let mut written = 0usize;
    let mut missing = 0usize;
    let mut failures = Vec::new();
    let t0 = Instant::now();

    for (chunk_index, chunk) in docs.chunks(chunk_size.max(1)).enumerate() {
        match store.bulk_upsert(chunk).await {
            Ok(outcome) => {
                written += outcome.written;
                missing += outcome.missing;
                if !outcome.failures.is_empty() {
                    warn!(
                        chunk = chunk_index,
                        rejected = outcome.failures.len(),
                        first_reason = %outcome.failures[0].reason,
                        "Store rejected documents in chunk"
                    );
                }
                failures.extend(outcome.failures);
                info!(chunk = chunk_index, size = chunk.len(), written, "Chunk written");
            }
            Err(e) => {
                error!(chunk = chunk_index, written, error = %e, "Bulk request failed; aborting");
                return Err(e.with_counts(attempted, written).with_items(failures));
            }
        }
    }

    if !failures.is_empty() {
        return Err(PersistenceFailure::new(
            "bulk upsert",
            format!("{} of {} documents rejected", failures.len(), attempted),
        )
        .with_counts(attempted, written)
        .with_items(failures));
    }

    if missing > 0 {
        warn!(missing, "Skipped updates to documents that no longer exist");
    }
    info!(
        attempted,
        written,
        missing,
        elapsed_ms = t0.elapsed().as_millis() as u64,
        "Upsert completed"
    );
    Ok(written)
}

/// Retrieve candidates for `query` and ingest them under `query_id`.
///
/// This is the whole job of the ingestion trigger. Retrieval errors surface
/// before anything is written.
#[instrument(level = "info", skip(provider, store))]
pub async fn scrape_and_ingest(
    provider: &dyn SearchProvider,
    store: &dyn DocumentStore,
    query: &str,
    query_id: &str,
) -> Result<IngestReport, ScrapeError> {
    let candidates = retrieve(provider, query, query_id).await?;
    info!(count = candidates.len(), "Retrieved candidates");
    Ok(ingest(store, &candidates).await?)
}
