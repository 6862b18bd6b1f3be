//! # News Explorer
//!
//! Runs one stage of the query-scoped news pipeline as an HTTP service, or
//! the whole pipeline once from the command line.
//!
//! ## Usage
//!
//! ```sh
//! EXPLORER_PORT=8001 news_explorer explorer
//! SCRAPER_PORT=8000 news_explorer scraper
//! ANALYZER_PORT=8002 news_explorer analyzer
//! news_explorer run "rust async runtimes"
//! ```
//!
//! ## Architecture
//!
//! 1. **Explorer**: mint a `query_id` and trigger the scraper
//! 2. **Scraper**: search, normalize, dedup and upsert into Elasticsearch
//! 3. **Analyzer**: scroll the query's articles, classify, write scores back

use anyhow::Context;
use clap::Parser;
use news_explorer::analysis::{AnalyzeOptions, analyze};
use news_explorer::classifier::{Classifier, HttpClassifier, RetryClassifier};
use news_explorer::cli::{ClassifierArgs, Cli, Command, SearchArgs, StoreArgs};
use news_explorer::coordinator::{Coordinator, HttpIngestTrigger, LocalIngestTrigger};
use news_explorer::scrapers::{GoogleCustomSearch, SearchProvider};
use news_explorer::services::{self, analyzer, explorer, scraper};
use news_explorer::store::{DocumentStore, ElasticStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

/// First backoff delay for transient classifier failures.
const CLASSIFIER_BASE_DELAY: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        // A missing .env is the normal case outside development.
        if !e.not_found() {
            eprintln!("failed to load .env: {e}");
        }
    }

    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let cli = Cli::parse();
    debug!(command = cli.command.name(), "Parsed CLI arguments");

    match cli.command {
        Command::Explorer(args) => {
            let trigger = Arc::new(HttpIngestTrigger::new(args.scraper_url.clone()));
            let router = explorer::router(Arc::new(Coordinator::new(trigger)));
            services::serve("explorer", args.addr(), router).await?;
        }
        Command::Scraper(args) => {
            let router = scraper::router(scraper::ScraperState {
                provider: search_provider(&args.search),
                store: document_store(&args.store)?,
            });
            services::serve("scraper", args.addr(), router).await?;
        }
        Command::Analyzer(args) => {
            let router = analyzer::router(analyzer::AnalyzerState {
                store: document_store(&args.store)?,
                classifier: classifier(&args.classifier),
                options: AnalyzeOptions::new(
                    args.classifier.classifier_workers,
                    args.store.scroll_page_size,
                ),
            });
            services::serve("analyzer", args.addr(), router).await?;
        }
        Command::Run(args) => {
            let start_time = std::time::Instant::now();
            let store = document_store(&args.store)?;
            let provider = search_provider(&args.search);
            let trigger = LocalIngestTrigger::new(provider, Arc::clone(&store));
            let query_id = Coordinator::new(Arc::new(trigger))
                .submit(&args.query)
                .await
                .context("exploration failed")?;

            let options = AnalyzeOptions::new(
                args.classifier.classifier_workers,
                args.store.scroll_page_size,
            );
            let report = analyze(store, classifier(&args.classifier), &query_id, &options)
                .await
                .context("analysis failed")?;
            if !report.failed.is_empty() {
                warn!(failed = report.failed.len(), "Some articles could not be classified");
            }

            println!("{}", serde_json::to_string_pretty(&report)?);
            info!(
                elapsed_ms = start_time.elapsed().as_millis() as u64,
                %query_id,
                "Run finished"
            );
        }
    }

    Ok(())
}

fn document_store(args: &StoreArgs) -> anyhow::Result<Arc<dyn DocumentStore>> {
    let store = ElasticStore::new(&args.es_server_url, &args.es_index, args.timeout())
        .with_context(|| format!("invalid ES_SERVER_URL '{}'", args.es_server_url))?
        .with_scroll_keep_alive(args.scroll_keep_alive.clone());
    Ok(Arc::new(store))
}

fn search_provider(args: &SearchArgs) -> Arc<dyn SearchProvider> {
    if args.google_api_key.is_none() {
        warn!("GOOGLE_SEARCH_ENGINE_API_KEY is not set; every search will be refused");
    }
    Arc::new(GoogleCustomSearch::new(
        args.google_api_key.clone(),
        args.google_cx.clone(),
        args.google_endpoint.clone(),
        args.timeout(),
    ))
}

fn classifier(args: &ClassifierArgs) -> Arc<dyn Classifier> {
    Arc::new(RetryClassifier::new(
        HttpClassifier::new(args.classifier_url.clone(), args.timeout()),
        args.classifier_max_retries,
        CLASSIFIER_BASE_DELAY,
    ))
}
