//! # Sitemap News Monitor
//!
//! Tracks what a set of news websites publish by reading their XML sitemaps,
//! enriching each newly discovered article with metadata from its HTML page,
//! and appending the results to a CSV table that a separate dashboard reads.
//!
//! ## Features
//!
//! - Resolves sitemap indexes (up to 20 children each) down to leaf sitemaps
//! - Understands Google News sitemaps and standard `<urlset>` sitemaps
//! - Normalizes the many date formats publishers use into RFC-3339 timestamps
//! - Fills titles, descriptions, images and publication dates from article
//!   pages through ordered selector cascades
//! - Never re-crawls a URL already in the table; stored rows are never
//!   rewritten
//!
//! ## Usage
//!
//! ```sh
//! sitemap_news_monitor --sites sites.yaml -o data/articles.csv
//! ```
//!
//! ## Architecture
//!
//! The application follows a pipeline architecture, one site at a time:
//! 1. **Discovery**: fetch the site's sitemap tree and collect article URLs
//! 2. **Filtering**: drop URLs already stored and cap the per-site batch
//! 3. **Extraction**: fetch article pages concurrently and merge their metadata
//! 4. **Persistence**: append the batch to the article table

use clap::Parser;
use std::error::Error;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::{debug, info, info_span, instrument, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod dates;
mod error;
mod extractor;
mod fetch;
mod models;
mod monitor;
mod sitemap;
mod store;
mod utils;
mod xml;

use cli::Cli;
use monitor::Monitor;
use store::ArticleStore;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // Parse CLI first; it decides where logs go.
    let args = Cli::parse();

    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = tfmt::layer()
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(UtcTime::rfc_3339());
    let file_layer = match &args.log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                tfmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_timer(UtcTime::rfc_3339())
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    let start_time = std::time::Instant::now();
    info!("sitemap_news_monitor starting up");
    debug!(?args, "Parsed CLI arguments");

    let sites = config::load_sites(args.sites.as_deref()).await?;
    let settings = args.crawl_settings();

    let span = info_span!("monitor");
    let store = ArticleStore::new(&args.output, info_span!(parent: &span, "store"));
    store.ensure_writable().await?;
    info!(output = %store.path().display(), sites = sites.len(), "Starting crawl");

    let monitor = Monitor::new(&settings, store, span)?;

    // A site's batch is only written once all its workers finish, so
    // abandoning the run here never leaves a partial batch on disk.
    tokio::select! {
        result = monitor.run(&sites) => {
            let summary = result?;
            for site in &summary.sites {
                debug!(
                    site = %site.site,
                    discovered = site.discovered,
                    attempted = site.attempted,
                    extracted = site.extracted,
                    stored = site.stored,
                    "Site summary"
                );
            }
            info!(new_articles = summary.new_articles(), "Run finished");
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; abandoning the run");
        }
    }

    info!(elapsed = ?start_time.elapsed(), "sitemap_news_monitor finished");
    Ok(())
}
