//! Command-line interface definitions for the sitemap news monitor.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Every option has a default, and the paths can also come from environment
//! variables, so a bare invocation crawls the built-in site list into
//! `data/articles.csv`.

use crate::config::{CrawlSettings, DEFAULT_USER_AGENT};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for one crawl run.
///
/// # Examples
///
/// ```sh
/// # Crawl the built-in site list
/// sitemap_news_monitor
///
/// # Custom site list and output, ten articles per site
/// sitemap_news_monitor --sites sites.yaml -o /srv/news/articles.csv --limit 10
///
/// # Also keep a log file next to the data
/// sitemap_news_monitor --log-file data/monitor.log
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// CSV file the article table is read from and appended to
    #[arg(short, long, env = "MONITOR_OUTPUT", default_value = "data/articles.csv")]
    pub output: PathBuf,

    /// Optional YAML site list; the built-in list is used when absent
    #[arg(short, long, env = "MONITOR_SITES")]
    pub sites: Option<PathBuf>,

    /// Maximum new articles extracted per site per run
    #[arg(short, long, default_value_t = 50)]
    pub limit: usize,

    /// Concurrent fetches for sitemap children and article pages
    #[arg(short, long, default_value_t = 5)]
    pub workers: usize,

    /// Child sitemaps followed per sitemap index
    #[arg(long, default_value_t = 20)]
    pub index_fanout: usize,

    /// Sitemap request timeout in seconds
    #[arg(long, default_value_t = 15)]
    pub sitemap_timeout: u64,

    /// Article request timeout in seconds
    #[arg(long, default_value_t = 15)]
    pub article_timeout: u64,

    /// User-Agent header sent with every request
    #[arg(long, default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    /// Also append log output to this file
    #[arg(long, env = "MONITOR_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Crawl settings described by the flags.
    pub fn crawl_settings(&self) -> CrawlSettings {
        CrawlSettings {
            max_articles_per_site: self.limit,
            max_workers: self.workers,
            index_fanout: self.index_fanout,
            sitemap_timeout: Duration::from_secs(self.sitemap_timeout),
            article_timeout: Duration::from_secs(self.article_timeout),
            user_agent: self.user_agent.clone(),
        }
    }
}
