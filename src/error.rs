//! Error types for the crawl pipeline.
//!
//! The taxonomy follows how far each failure is allowed to travel:
//!
//! - [`FetchError`]: transient network failures. Always absorbed by the unit
//!   that owns the request (one sitemap, one article) and turned into an empty
//!   or missing result.
//! - [`StoreError`]: persistence failures. A failed write is the only runtime
//!   error that ends a run, since swallowing it would silently lose data.
//! - [`ConfigError`]: setup defects in the site list. Raised before any
//!   crawling starts.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by a single HTTP fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected status {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("Timeout after {0:?}")]
    Timeout(Duration),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Errors raised while reading or writing the article table.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("CSV buffer error: {0}")]
    Buffer(String),
}

/// Errors raised while loading the site list.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid site list: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Site {site:?} has an empty `{field}`")]
    MissingField { site: String, field: &'static str },
    #[error("Site {site:?} has an invalid URL {url:?}")]
    InvalidUrl { site: String, url: String },
}
