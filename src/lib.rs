//! # News Explorer
//!
//! Query-scoped article discovery and analysis. A submitted query is turned
//! into a correlation token (`query_id`), candidate articles are pulled from a
//! ranked search provider, deduplicated per query and upserted into
//! Elasticsearch, and later scrolled back out in full to compute a
//! subjectivity score per article and per query.
//!
//! ## Architecture
//!
//! The pipeline is split into independently runnable stages that only share
//! the document store and the `query_id`:
//!
//! 1. **Coordination** ([`coordinator`]): mint a `query_id` and trigger ingestion
//! 2. **Retrieval** ([`scrapers`]): normalize provider results into [`models::Article`]s
//! 3. **Ingestion** ([`ingest`]): idempotent bulk create-or-merge into the store
//! 4. **Streaming** ([`stream`]): scroll every document stored for a `query_id`
//! 5. **Analysis** ([`analysis`]): classify description segments on a bounded
//!    worker pool and write scores back
//!
//! Each stage is exposed as an HTTP service in [`services`]; the binary runs
//! one service per subcommand.

pub mod analysis;
pub mod classifier;
pub mod cli;
pub mod coordinator;
pub mod error;
pub mod ingest;
pub mod models;
pub mod scrapers;
pub mod services;
pub mod store;
pub mod stream;
pub mod utils;

pub use error::{
    ClassificationFailure, CoordinatorError, PersistenceFailure, RetrievalError, ScrapeError,
    ValidationError,
};
pub use models::{Analysis, Article, SubjectivityLabel};
pub use store::DocumentStore;
