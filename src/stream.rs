//! Streaming reader: enumerate every article stored under a `query_id`.
//!
//! The reader walks a store scroll page by page: open the scroll, then keep
//! asking for the page after the latest cursor until the store answers with an
//! empty page. It never uses numeric offsets, so it stays correct for result
//! sets far larger than one page.
//!
//! # Guarantees
//!
//! - Every article stored under `query_id` when the scan starts is yielded
//!   exactly once.
//! - No ordering, within or across pages.
//! - Lazy: nothing is requested until the stream is polled, and dropping the
//!   stream (or cutting it short with `take`/`take_until`) stops further cursor
//!   requests. The scan is read-only, so stopping early needs no cleanup.
//! - Restartable: every call starts an independent scan.

use crate::error::PersistenceFailure;
use crate::models::Article;
use crate::store::DocumentStore;
use futures::stream::{self, Stream, TryStreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Articles requested per scroll page.
pub const DEFAULT_PAGE_SIZE: usize = 500;

enum Scan {
    Start,
    Next {
        cursor: String,
        pages: usize,
        seen: usize,
    },
    Done,
}

/// Stream every article stored under `query_id`.
pub fn stream_articles(
    store: Arc<dyn DocumentStore>,
    query_id: impl Into<String>,
    page_size: usize,
) -> impl Stream<Item = Result<Article, PersistenceFailure>> + Send + 'static {
    let query_id: String = query_id.into();
    let page_size = page_size.max(1);

    stream::try_unfold(Scan::Start, move |scan| {
        let store = Arc::clone(&store);
        let query_id = query_id.clone();
        async move {
            let (page, pages, seen) = match scan {
                Scan::Done => return Ok(None),
                Scan::Start => {
                    debug!(%query_id, page_size, "Opening scroll");
                    (store.open_scroll(&query_id, page_size).await?, 0, 0)
                }
                Scan::Next { cursor, pages, seen } => {
                    let mut page = store.next_page(&cursor).await?;
                    // Keep the previous cursor if the store did not hand out a new one.
                    page.cursor.get_or_insert(cursor);
                    (page, pages, seen)
                }
            };

            let pages = pages + 1;
            let seen = seen + page.articles.len();

            if page.articles.is_empty() {
                if let Some(cursor) = page.cursor.as_deref() {
                    if let Err(e) = store.release_scroll(cursor).await {
                        warn!(%query_id, error = %e, "Failed to release scroll; it will expire");
                    }
                }
                info!(%query_id, pages, articles = seen, "Scroll exhausted");
                return Ok(None);
            }

            let next = match page.cursor {
                Some(cursor) => Scan::Next {
                    cursor,
                    pages,
                    seen,
                },
                None => {
                    info!(%query_id, pages, articles = seen, "Scroll finished without cursor");
                    Scan::Done
                }
            };
            let articles = page.articles.into_iter().map(Ok::<Article, PersistenceFailure>);
            Ok::<_, PersistenceFailure>(Some((stream::iter(articles), next)))
        }
    })
    .try_flatten()
}
