//! Sitemap discovery: fetching, classifying and parsing sitemap documents.
//!
//! A site's configured sitemap is either a **sitemap index** (a list of
//! further sitemaps) or a leaf sitemap listing pages. Leaves come in two
//! flavours:
//!
//! | Kind | Detected by | Yields |
//! |------|-------------|--------|
//! | Index | `sitemapindex` token | child sitemap URLs |
//! | News | `newssitemap` or `<news:news` token | articles with title, publication date, image |
//! | Standard | anything else | articles with optional lastmod, title, description, image |
//!
//! # Index resolution
//!
//! [`SitemapParser::fetch_articles`] walks the tree breadth-first with an
//! explicit worklist. Each index contributes at most `index_fanout` children
//! (20 by default, in document order); anything past the cap is dropped.
//! Already-visited sitemap URLs are skipped and nesting stops after
//! [`MAX_INDEX_DEPTH`] levels, so self-referencing indexes terminate.
//!
//! # Failure handling
//!
//! Nothing here returns an error. A failed fetch or an unparseable document
//! contributes zero articles and is logged; the rest of the tree proceeds.

use crate::config::CrawlSettings;
use crate::dates::parse_date;
use crate::fetch::HttpClient;
use crate::models::{Article, UNTITLED, section_from_url};
use crate::utils::{clean_text, truncate_for_log};
use crate::xml::{self, Element, IMAGE_NS, Mode, NEWS_NS, Name, SITEMAP_NS};
use futures::stream::{self, StreamExt};
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{Span, debug, error, info, instrument, warn};

/// Levels of nested sitemap indexes followed below the configured sitemap.
pub const MAX_INDEX_DEPTH: usize = 5;

const NEWS_TOKENS: &[&str] = &["newssitemap", "<news:news"];

const URL: Name<'static> = Name::plain("url");
const LOC: Name<'static> = Name::plain("loc");
const LASTMOD: Name<'static> = Name::plain("lastmod");
const TITLE: Name<'static> = Name::plain("title");
const DESCRIPTION: Name<'static> = Name::plain("description");
const IMAGE: Name<'static> = Name::plain("image");
const NEWS: Name<'static> = Name::prefixed("news", "news", NEWS_NS);
const NEWS_TITLE: Name<'static> = Name::prefixed("news", "title", NEWS_NS);
const NEWS_DESCRIPTION: Name<'static> = Name::prefixed("news", "description", NEWS_NS);
const NEWS_PUBLICATION_DATE: Name<'static> = Name::prefixed("news", "publication_date", NEWS_NS);
const IMAGE_IMAGE: Name<'static> = Name::prefixed("image", "image", IMAGE_NS);
const IMAGE_LOC: Name<'static> = Name::prefixed("image", "loc", IMAGE_NS);

/// What a sitemap document turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SitemapKind {
    Index,
    News,
    Standard,
}

/// Parse result for one fetched sitemap.
#[derive(Debug, Clone, PartialEq)]
pub enum SitemapNode {
    /// Child sitemap URLs of an index.
    Index(Vec<String>),
    /// Partially populated articles from a leaf sitemap.
    Leaf(Vec<Article>),
}

/// Decide what kind of sitemap `content` is by sniffing the body and the
/// `Content-Type` for identifying tokens. Ambiguous documents are treated as
/// standard sitemaps so extraction is still attempted.
pub fn classify(content: &str, content_type: &str) -> SitemapKind {
    let body = content.to_ascii_lowercase();
    let content_type = content_type.to_ascii_lowercase();
    let mentions = |token: &str| body.contains(token) || content_type.contains(token);

    if mentions("sitemapindex") {
        SitemapKind::Index
    } else if NEWS_TOKENS.iter().any(|t| mentions(t)) {
        SitemapKind::News
    } else {
        SitemapKind::Standard
    }
}

/// Extract child sitemap URLs from a sitemap index.
///
/// `<loc>` elements are looked up in the sitemap namespace first, then
/// without a namespace, then in any namespace. If the document is not
/// well-formed XML, an HTML parser is used to salvage the `<loc>` elements.
/// Relative locations are invalid in a sitemap and are dropped with a
/// warning. Never fails; a hopeless document yields an empty list.
pub fn parse_index(xml: &str) -> Vec<String> {
    debug!(preview = %truncate_for_log(xml, 200), "Parsing sitemap index");

    let locations = match xml::parse(xml, Mode::Strict) {
        Ok(root) => index_locations(&root),
        Err(e) => {
            error!(error = %e, "Sitemap index is not well-formed XML; falling back to HTML parser");
            html_locations(xml)
        }
    };

    let urls = locations
        .into_iter()
        .filter(|loc| {
            let absolute = loc.starts_with("http://") || loc.starts_with("https://");
            if !absolute {
                warn!(%loc, "Skipping relative URL in sitemap index");
            }
            absolute
        })
        .collect::<Vec<_>>();

    info!(count = urls.len(), "Found sitemap URLs in index");
    urls
}

fn index_locations(root: &Element) -> Vec<String> {
    let all = root.find_all_local("loc");
    let texts = |pred: &dyn Fn(&Element) -> bool| -> Vec<String> {
        all.iter()
            .filter(|e| pred(e))
            .filter_map(|e| e.trimmed_text())
            .map(str::to_string)
            .collect()
    };

    let namespaced = texts(&|e: &Element| e.namespace.as_deref() == Some(SITEMAP_NS));
    if !namespaced.is_empty() {
        return namespaced;
    }

    debug!("No namespaced <loc> entries; trying without namespace");
    let bare = texts(&|e: &Element| e.namespace.is_none() && e.prefix.is_none());
    if !bare.is_empty() {
        return bare;
    }

    debug!("No bare <loc> entries; trying any namespace");
    texts(&|_: &Element| true)
}

fn html_locations(content: &str) -> Vec<String> {
    let document = Html::parse_document(content);
    let Ok(selector) = Selector::parse("loc") else {
        return Vec::new();
    };
    let urls = document
        .select(&selector)
        .filter_map(|loc| clean_text(&loc.text().collect::<String>()))
        .collect::<Vec<_>>();
    info!(count = urls.len(), "Recovered sitemap URLs with HTML parser");
    urls
}

/// Extract articles from a Google News sitemap.
///
/// Only `<url>` entries carrying both a `<loc>` and a `<news:news>` block are
/// kept; in a news sitemap the news-annotated entries are the article set.
/// A missing `<news:title>` becomes the placeholder title and a missing or
/// unparseable `<news:publication_date>` leaves the date empty.
pub fn parse_news_sitemap(xml: &str) -> Vec<Article> {
    debug!(preview = %truncate_for_log(xml, 200), "Parsing news sitemap");
    let root = lenient_tree(xml);
    let entries = root.find_all(URL);
    info!(count = entries.len(), "Found <url> entries in news sitemap");

    let articles = entries
        .into_iter()
        .filter_map(|entry| {
            let loc = entry_location(entry)?;
            let Some(news) = entry.find(NEWS) else {
                debug!(%loc, "Entry has no news block; skipping");
                return None;
            };

            let title = news
                .find(NEWS_TITLE)
                .and_then(|t| clean_text(&t.text))
                .unwrap_or_else(|| UNTITLED.to_string());
            let published_date = news
                .find(NEWS_PUBLICATION_DATE)
                .and_then(Element::trimmed_text)
                .and_then(parse_date);
            let image_url = entry
                .find(IMAGE_IMAGE)
                .and_then(|image| image.find(IMAGE_LOC))
                .and_then(Element::trimmed_text)
                .map(str::to_string);

            debug!(%loc, %title, "Parsed news entry");
            Some(Article {
                title,
                section: section_from_url(loc),
                published_date,
                image_url,
                ..Article::new(loc)
            })
        })
        .collect::<Vec<_>>();

    info!(count = articles.len(), "Parsed articles from news sitemap");
    articles
}

/// Extract articles from a standard `<urlset>` sitemap.
///
/// Every `<url>` with a `<loc>` becomes an article. `lastmod`, `title`,
/// `description` and `image` are optional; missing ones stay empty.
pub fn parse_standard_sitemap(xml: &str) -> Vec<Article> {
    debug!(preview = %truncate_for_log(xml, 200), "Parsing standard sitemap");
    let root = lenient_tree(xml);
    let entries = root.find_all(URL);
    info!(count = entries.len(), "Found <url> entries in standard sitemap");

    let articles = entries
        .into_iter()
        .filter_map(|entry| {
            let loc = entry_location(entry)?;

            let last_modified = entry
                .find(LASTMOD)
                .and_then(Element::trimmed_text)
                .and_then(parse_date);
            let title = entry
                .find(TITLE)
                .or_else(|| entry.find(NEWS_TITLE))
                .and_then(|t| clean_text(&t.text))
                .unwrap_or_default();
            let description = entry
                .find(DESCRIPTION)
                .or_else(|| entry.find(NEWS_DESCRIPTION))
                .and_then(|d| clean_text(&d.text))
                .unwrap_or_default();
            let image_url = entry
                .find(IMAGE_IMAGE)
                .or_else(|| entry.find(IMAGE))
                .and_then(|image| image.find(IMAGE_LOC).or_else(|| image.find(LOC)))
                .and_then(Element::trimmed_text)
                .map(str::to_string);

            Some(Article {
                title,
                description,
                section: section_from_url(loc),
                last_modified,
                image_url,
                ..Article::new(loc)
            })
        })
        .collect::<Vec<_>>();

    info!(count = articles.len(), "Parsed articles from standard sitemap");
    articles
}

/// The entry's own `<loc>`, preferring a direct child over one nested in an
/// image block.
fn entry_location(entry: &Element) -> Option<&str> {
    entry
        .child(LOC)
        .or_else(|| entry.find(LOC))
        .and_then(Element::trimmed_text)
}

fn lenient_tree(xml: &str) -> Element {
    xml::parse(xml, Mode::Lenient).unwrap_or_else(|e| {
        error!(error = %e, "Could not parse sitemap");
        Element::default()
    })
}

/// Fetches a sitemap and everything below it.
#[derive(Debug, Clone)]
pub struct SitemapParser {
    http: HttpClient,
    timeout: Duration,
    max_workers: usize,
    index_fanout: usize,
    span: Span,
}

impl SitemapParser {
    /// Create a parser that logs under `span`.
    pub fn new(http: HttpClient, settings: &CrawlSettings, span: Span) -> Self {
        Self {
            http,
            timeout: settings.sitemap_timeout,
            max_workers: settings.max_workers.max(1),
            index_fanout: settings.index_fanout,
            span,
        }
    }

    /// Fetch `sitemap_url`, resolve any indexes below it, and return every
    /// article found in the leaf sitemaps. Order is not meaningful.
    #[instrument(parent = &self.span, level = "info", skip(self))]
    pub async fn fetch_articles(&self, sitemap_url: &str) -> Vec<Article> {
        let mut articles = Vec::new();
        let mut visited = HashSet::from([sitemap_url.to_string()]);
        let mut level = vec![sitemap_url.to_string()];
        let mut depth = 0;

        while !level.is_empty() {
            let nodes: Vec<SitemapNode> = stream::iter(std::mem::take(&mut level))
                .map(|url| async move { self.fetch_node(&url).await })
                .buffer_unordered(self.max_workers)
                .collect()
                .await;

            for node in nodes {
                match node {
                    SitemapNode::Leaf(found) => articles.extend(found),
                    SitemapNode::Index(children) => {
                        if depth >= MAX_INDEX_DEPTH {
                            warn!(depth, dropped = children.len(), "Sitemap indexes nested too deeply; ignoring children");
                            continue;
                        }
                        if children.len() > self.index_fanout {
                            info!(
                                listed = children.len(),
                                fetched = self.index_fanout,
                                "Sitemap index exceeds fan-out cap; dropping the rest"
                            );
                        }
                        for child in children.into_iter().take(self.index_fanout) {
                            if visited.insert(child.clone()) {
                                level.push(child);
                            }
                        }
                    }
                }
            }
            depth += 1;
        }

        info!(count = articles.len(), "Collected articles from sitemap tree");
        articles
    }

    /// Fetch and parse a single sitemap document.
    async fn fetch_node(&self, url: &str) -> SitemapNode {
        info!(%url, "Fetching sitemap");
        let page = match self.http.get(url, self.timeout).await {
            Ok(page) => page,
            Err(e) => {
                error!(%url, error = %e, "Sitemap fetch failed");
                return SitemapNode::Leaf(Vec::new());
            }
        };

        match classify(&page.body, &page.content_type) {
            SitemapKind::Index => {
                info!(%url, "Detected sitemap index");
                SitemapNode::Index(parse_index(&page.body))
            }
            SitemapKind::News => {
                info!(%url, "Detected news sitemap");
                SitemapNode::Leaf(parse_news_sitemap(&page.body))
            }
            SitemapKind::Standard => {
                info!(%url, "Detected standard sitemap");
                SitemapNode::Leaf(parse_standard_sitemap(&page.body))
            }
        }
    }
}
