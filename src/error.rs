//! Error taxonomy shared by every stage of the pipeline.
//!
//! Each failure type says whether anything reached the store, because the
//! recovery strategy end to end is "retry the whole operation": ingestion is
//! idempotent, so a retry after a partial write converges to the same state.
//!
//! | Error | Cause | Retry? |
//! |-------|-------|--------|
//! | [`ValidationError`] | malformed request fields | never |
//! | [`RetrievalError::Unavailable`] | provider unreachable, timed out, 5xx/429 | with backoff |
//! | [`RetrievalError::Unauthorized`] | API key missing or rejected | fix config |
//! | [`PersistenceFailure`] | store read/write failed | yes |
//! | [`ClassificationFailure`] | classifier failed for one article | isolated per article |

use thiserror::Error;

/// A request was rejected at the boundary, before any side effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid request: {0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn missing(field: &str) -> Self {
        Self(format!("missing or invalid '{field}' (non-empty string required)"))
    }
}

/// Failures of the retrieval adapter.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Transport error, timeout, or a non-success answer from the provider.
    #[error("search provider unavailable: {0}")]
    Unavailable(String),

    /// Credentials are absent or were refused by the provider.
    #[error("search provider unauthorized: {0}")]
    Unauthorized(String),
}

/// One document the store refused inside an otherwise accepted bulk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub id: String,
    pub status: u16,
    pub reason: String,
}

/// A store read or write failed.
///
/// The write path is not transactional, so `attempted` and `written` tell the
/// caller whether the failure left some documents behind. Either way the
/// remedy is to re-run the operation.
#[derive(Debug, Clone, Error)]
#[error("{operation} failed: {message} ({written}/{attempted} documents written)")]
pub struct PersistenceFailure {
    pub operation: &'static str,
    pub message: String,
    pub attempted: usize,
    pub written: usize,
    pub items: Vec<ItemFailure>,
}

impl PersistenceFailure {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
            attempted: 0,
            written: 0,
            items: Vec::new(),
        }
    }

    /// Map a transport-level client error, flagging timeouts explicitly.
    pub fn transport(operation: &'static str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::new(operation, format!("store request timed out: {err}"))
        } else {
            Self::new(operation, format!("store unreachable: {err}"))
        }
    }

    pub fn with_counts(mut self, attempted: usize, written: usize) -> Self {
        self.attempted = attempted;
        self.written = written;
        self
    }

    pub fn with_items(mut self, items: Vec<ItemFailure>) -> Self {
        self.items = items;
        self
    }

    pub fn nothing_written(&self) -> bool {
        self.written == 0
    }

    pub fn is_partial(&self) -> bool {
        self.written > 0 && self.written < self.attempted
    }
}

/// The classifier could not label the segments of one article.
#[derive(Debug, Clone, Error)]
pub enum ClassificationFailure {
    #[error("classifier request failed: {0}")]
    Transport(String),

    #[error("classifier answered status {status}: {body}")]
    Status {
        status: u16,
        body: String,
    },

    #[error("classifier response malformed: {0}")]
    Malformed(String),
}

impl ClassificationFailure {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ClassificationFailure::Transport(_) => true,
            ClassificationFailure::Status { status, .. } => *status == 429 || *status >= 500,
            ClassificationFailure::Malformed(_) => false,
        }
    }
}

/// Failures of the combined retrieve-then-ingest step behind the ingestion trigger.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Persistence(#[from] PersistenceFailure),
}

impl ScrapeError {
    /// HTTP status the ingestion trigger answers with for this failure.
    pub fn http_status(&self) -> u16 {
        match self {
            ScrapeError::Retrieval(RetrievalError::Validation(_)) => 400,
            ScrapeError::Retrieval(RetrievalError::Unauthorized(_)) => 401,
            ScrapeError::Retrieval(RetrievalError::Unavailable(_)) => 502,
            ScrapeError::Persistence(_) => 500,
        }
    }

    /// Client-facing message; details stay in the logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            ScrapeError::Retrieval(RetrievalError::Validation(_)) => {
                "Missing or invalid 'query' or 'query_id' (string required)."
            }
            ScrapeError::Retrieval(RetrievalError::Unauthorized(_)) => {
                "Search provider credentials are missing or invalid"
            }
            ScrapeError::Retrieval(RetrievalError::Unavailable(_)) => {
                "Search provider is unavailable"
            }
            ScrapeError::Persistence(_) => "Failed to save articles into elastic search",
        }
    }
}

/// Failures seen by the query coordinator.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("ingestion trigger unreachable: {0}")]
    Unreachable(String),

    /// The ingestion trigger answered with a non-success status.
    #[error("ingestion trigger answered status {status}")]
    Upstream {
        status: u16,
        details: serde_json::Value,
    },
}
