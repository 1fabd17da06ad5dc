//! The crawl orchestrator.
//!
//! One run walks every configured site in order:
//!
//! 1. Load the URLs already in the article table, once, up front.
//! 2. For each site, fetch its whole sitemap tree.
//! 3. Stamp every discovered article with the site's name and flag, drop
//!    URLs that are already known (or listed twice), and keep at most
//!    `max_articles_per_site` of what is left.
//! 4. Extract the survivors concurrently, `max_workers` at a time.
//! 5. Append the successful extractions to the table in one batch.
//!
//! Discoveries join the known set as soon as they are extracted, so a URL
//! shared by two sites is only extracted once per run. Network and parse
//! failures are absorbed per sitemap or per article; only a failed table
//! write ends the run.

use crate::config::{CrawlSettings, SiteConfig};
use crate::error::{FetchError, StoreError};
use crate::extractor::ArticleExtractor;
use crate::fetch::HttpClient;
use crate::models::Article;
use crate::sitemap::SitemapParser;
use crate::store::ArticleStore;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use std::collections::HashSet;
use tracing::{Span, info, info_span, instrument, warn};

/// What happened to one site during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteOutcome {
    pub site: String,
    /// Articles found in the sitemap tree.
    pub discovered: usize,
    /// New articles submitted for extraction after filtering and the cap.
    pub attempted: usize,
    /// Articles whose page was fetched and parsed.
    pub extracted: usize,
    /// Rows added to the table.
    pub stored: usize,
}

/// Per-site outcomes of a run, in site order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub sites: Vec<SiteOutcome>,
}

impl RunSummary {
    /// Rows added across all sites.
    pub fn new_articles(&self) -> usize {
        self.sites.iter().map(|s| s.stored).sum()
    }
}

/// Drives sitemap discovery, extraction and persistence for a list of sites.
#[derive(Debug, Clone)]
pub struct Monitor {
    sitemaps: SitemapParser,
    extractor: ArticleExtractor,
    store: ArticleStore,
    max_articles_per_site: usize,
    max_workers: usize,
    span: Span,
}

impl Monitor {
    /// Wire up the pipeline. Each component logs under its own child of
    /// `span`.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] if the HTTP client cannot be built.
    pub fn new(settings: &CrawlSettings, store: ArticleStore, span: Span) -> Result<Self, FetchError> {
        let http = HttpClient::new(&settings.user_agent)?;
        let sitemaps = SitemapParser::new(
            http.clone(),
            settings,
            info_span!(parent: &span, "sitemaps"),
        );
        let extractor = ArticleExtractor::new(
            http,
            settings.article_timeout,
            info_span!(parent: &span, "extractor"),
        );

        Ok(Self {
            sitemaps,
            extractor,
            store,
            max_articles_per_site: settings.max_articles_per_site,
            max_workers: settings.max_workers.max(1),
            span,
        })
    }

    /// Crawl every site in `sites` and store what is new.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if a batch cannot be written. Sites crawled
    /// before the failure keep their stored rows.
    #[instrument(parent = &self.span, level = "info", skip_all, fields(sites = sites.len()))]
    pub async fn run(&self, sites: &[SiteConfig]) -> Result<RunSummary, StoreError> {
        let mut known = self.store.known_urls().await;
        info!(known = known.len(), "Loaded known article URLs");

        let mut summary = RunSummary::default();
        for site in sites {
            let outcome = self.crawl_site(site, &mut known).await?;
            summary.sites.push(outcome);
        }

        info!(
            new_articles = summary.new_articles(),
            sites = summary.sites.len(),
            "Crawl complete"
        );
        Ok(summary)
    }

    #[instrument(parent = &self.span, level = "info", skip_all, fields(site = %site.name))]
    async fn crawl_site(&self, site: &SiteConfig, known: &mut HashSet<String>) -> Result<SiteOutcome, StoreError> {
        info!(sitemap = %site.sitemap, "Processing site");
        let mut outcome = SiteOutcome {
            site: site.name.clone(),
            ..SiteOutcome::default()
        };

        let discovered = self.sitemaps.fetch_articles(&site.sitemap).await;
        outcome.discovered = discovered.len();

        let candidates = discovered
            .into_iter()
            .map(|article| article.with_site(&site.name, site.is_own_site))
            .filter(|article| article.is_storable() && !known.contains(&article.url))
            .unique_by(|article| article.url.clone())
            .take(self.max_articles_per_site)
            .collect::<Vec<_>>();
        outcome.attempted = candidates.len();
        info!(
            discovered = outcome.discovered,
            new = outcome.attempted,
            limit = self.max_articles_per_site,
            "Selected new articles"
        );

        if candidates.is_empty() {
            info!("No new articles for site");
            return Ok(outcome);
        }

        let ingested_at = Utc::now().fixed_offset();
        let extracted = stream::iter(candidates)
            .map(|article| self.extractor.extract(article))
            .buffer_unordered(self.max_workers)
            .collect::<Vec<Option<Article>>>()
            .await
            .into_iter()
            .flatten()
            .map(|article| Article {
                ingested_at: Some(ingested_at),
                ..article
            })
            .collect::<Vec<_>>();
        outcome.extracted = extracted.len();

        let failed = outcome.attempted - outcome.extracted;
        if failed > 0 {
            warn!(failed, attempted = outcome.attempted, "Some articles could not be extracted");
        }

        known.extend(extracted.iter().map(|a| a.url.clone()));

        if extracted.is_empty() {
            warn!("No articles extracted for site; nothing to store");
            return Ok(outcome);
        }

        outcome.stored = self.store.append(&extracted).await?;
        info!(stored = outcome.stored, "Site done");
        Ok(outcome)
    }
}
