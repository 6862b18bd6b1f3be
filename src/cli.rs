//! Command-line interface definitions for News Explorer.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! All arguments can be provided via command-line flags or environment
//! variables; a `.env` file in the working directory is loaded first.

use clap::{Args, Parser, Subcommand};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Command-line arguments for the News Explorer application.
///
/// Each pipeline stage runs as its own HTTP service; `run` executes the whole
/// pipeline once in-process.
///
/// # Examples
///
/// ```sh
/// # Start the three services
/// EXPLORER_PORT=8001 news_explorer explorer
/// SCRAPER_PORT=8000 news_explorer scraper
/// ANALYZER_PORT=8002 news_explorer analyzer
///
/// # One-shot run printing the query report
/// news_explorer run "rust async runtimes"
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the query coordinator (`POST /service/explorer`)
    Explorer(ExplorerArgs),
    /// Serve retrieval + ingestion (`POST /service/scraper`)
    Scraper(ScraperArgs),
    /// Serve streaming analysis (`POST /service/analyzer`)
    Analyzer(AnalyzerArgs),
    /// Explore, ingest and analyze one query in-process, then print the report
    Run(RunArgs),
}

#[derive(Args, Debug)]
pub struct ExplorerArgs {
    #[arg(long, env = "EXPLORER_HOST", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub host: IpAddr,

    #[arg(long, env = "EXPLORER_PORT")]
    pub port: u16,

    /// Ingestion trigger endpoint
    #[arg(long, env = "SCRAPER_URL", default_value = "http://127.0.0.1:8000/service/scraper")]
    pub scraper_url: String,
}

#[derive(Args, Debug)]
pub struct ScraperArgs {
    #[arg(long, env = "SCRAPER_HOST", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub host: IpAddr,

    #[arg(long, env = "SCRAPER_PORT")]
    pub port: u16,

    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub search: SearchArgs,
}

#[derive(Args, Debug)]
pub struct AnalyzerArgs {
    #[arg(long, env = "ANALYZER_HOST", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub host: IpAddr,

    #[arg(long, env = "ANALYZER_PORT")]
    pub port: u16,

    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub classifier: ClassifierArgs,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Free-text search query
    pub query: String,

    #[command(flatten)]
    pub store: StoreArgs,

    #[command(flatten)]
    pub search: SearchArgs,

    #[command(flatten)]
    pub classifier: ClassifierArgs,
}

/// Elasticsearch connection settings.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    #[arg(long, env = "ES_SERVER_URL", default_value = "http://localhost:9200")]
    pub es_server_url: String,

    #[arg(long, env = "ES_INDEX", default_value = "articles")]
    pub es_index: String,

    /// Per-request store timeout in seconds
    #[arg(long, env = "ES_TIMEOUT_SECS", default_value_t = 60)]
    pub es_timeout_secs: u64,

    /// Articles fetched per scroll page
    #[arg(long, env = "SCROLL_PAGE_SIZE", default_value_t = 500)]
    pub scroll_page_size: usize,

    /// Scroll context lifetime between page requests (`90s`, `5m`)
    #[arg(long, env = "SCROLL_KEEP_ALIVE", default_value = "2m")]
    pub scroll_keep_alive: String,
}

/// Google Custom Search settings.
#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    #[arg(long, env = "GOOGLE_SEARCH_ENGINE_API_KEY", hide_env_values = true)]
    pub google_api_key: Option<String>,

    #[arg(long, env = "GOOGLE_SEARCH_ENGINE_CX", default_value = "d5b275046e0124b12")]
    pub google_cx: String,

    #[arg(
        long,
        env = "GOOGLE_SEARCH_ENDPOINT",
        default_value = "https://www.googleapis.com/customsearch/v1"
    )]
    pub google_endpoint: String,

    #[arg(long, env = "GOOGLE_SEARCH_TIMEOUT_SECS", default_value_t = 15)]
    pub google_timeout_secs: u64,
}

/// Subjectivity classifier settings.
#[derive(Args, Debug, Clone)]
pub struct ClassifierArgs {
    #[arg(long, env = "CLASSIFIER_URL", default_value = "http://127.0.0.1:8080/classify")]
    pub classifier_url: String,

    /// Concurrent classifier requests (capped at 16)
    #[arg(long, env = "CLASSIFIER_WORKERS", default_value_t = 4)]
    pub classifier_workers: usize,

    /// Retries for transient classifier failures
    #[arg(long, env = "CLASSIFIER_MAX_RETRIES", default_value_t = 3)]
    pub classifier_max_retries: usize,

    #[arg(long, env = "CLASSIFIER_TIMEOUT_SECS", default_value_t = 30)]
    pub classifier_timeout_secs: u64,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Explorer(_) => "explorer",
            Command::Scraper(_) => "scraper",
            Command::Analyzer(_) => "analyzer",
            Command::Run(_) => "run",
        }
    }
}

impl StoreArgs {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.es_timeout_secs)
    }
}

impl SearchArgs {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.google_timeout_secs)
    }
}

impl ClassifierArgs {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.classifier_timeout_secs)
    }
}

impl ExplorerArgs {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl ScraperArgs {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl AnalyzerArgs {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
