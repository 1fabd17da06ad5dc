//! Article page metadata extraction.
//!
//! Each field is read through an ordered cascade of CSS selectors; the first
//! selector that yields a non-empty (and, for dates, parseable) value wins.
//!
//! | Field | Cascade |
//! |-------|---------|
//! | title | `h1.article-title`, `h1.entry-title`, `h1.post-title`, `h1`, `<title>`, `og:title`, `meta[name=title]` |
//! | description | `meta[name=description]`, `og:description`, `itemprop=description`, summary and body paragraphs |
//! | image | `og:image`, `twitter:image`, common article image classes, first `<img>` |
//! | published date | publication `<meta>` tags, date classes, `<time datetime>` |
//!
//! Relative image URLs are resolved against the page URL after redirects.
//! The extracted values are merged into the sitemap's article with
//! [`Article::merge`], which only fills fields that are still empty.

use crate::dates::parse_date;
use crate::fetch::HttpClient;
use crate::models::{Article, ExtractedMetadata};
use crate::utils::clean_text;
use chrono::{DateTime, FixedOffset};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::{Span, debug, error, instrument};
use url::Url;

/// How a matched element yields its value.
#[derive(Debug, Clone, Copy)]
enum Read {
    Text,
    Attr(&'static str),
    /// The attribute, then the element text, as separate candidates.
    AttrThenText(&'static str),
}

struct Rule {
    selector: Selector,
    read: Read,
}

impl Rule {
    fn new(css: &str, read: Read) -> Self {
        Self {
            selector: Selector::parse(css).unwrap(),
            read,
        }
    }

    /// Non-empty candidate values of `element`, in the order they are tried.
    fn candidates(&self, element: ElementRef<'_>) -> Vec<String> {
        let text = || clean_text(&element.text().collect::<String>());
        let attr = |name: &str| element.value().attr(name).and_then(clean_text);
        match self.read {
            Read::Text => text().into_iter().collect(),
            Read::Attr(name) => attr(name).into_iter().collect(),
            Read::AttrThenText(name) => attr(name).into_iter().chain(text()).collect(),
        }
    }
}

static TITLE_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        Rule::new("h1.article-title", Read::Text),
        Rule::new("h1.entry-title", Read::Text),
        Rule::new("h1.post-title", Read::Text),
        Rule::new("h1", Read::Text),
        Rule::new("title", Read::Text),
        Rule::new(r#"meta[property="og:title"]"#, Read::Attr("content")),
        Rule::new(r#"meta[name="title"]"#, Read::Attr("content")),
    ]
});

static DESCRIPTION_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        Rule::new(r#"meta[name="description"]"#, Read::Attr("content")),
        Rule::new(r#"meta[property="og:description"]"#, Read::Attr("content")),
        Rule::new(r#"meta[itemprop="description"]"#, Read::Attr("content")),
        Rule::new("p.article-summary", Read::Text),
        Rule::new("div.article-content > p", Read::Text),
        Rule::new("div.entry-content > p", Read::Text),
        Rule::new("article p", Read::Text),
    ]
});

static IMAGE_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        Rule::new(r#"meta[property="og:image"]"#, Read::Attr("content")),
        Rule::new(r#"meta[name="twitter:image"]"#, Read::Attr("content")),
        Rule::new(r#"meta[property="twitter:image"]"#, Read::Attr("content")),
        Rule::new("img.article-image", Read::Attr("src")),
        Rule::new("img.wp-post-image", Read::Attr("src")),
        Rule::new("figure img", Read::Attr("src")),
        Rule::new("div.article-image img", Read::Attr("src")),
        Rule::new("img[src]", Read::Attr("src")),
    ]
});

static DATE_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        Rule::new(r#"meta[property="article:published_time"]"#, Read::Attr("content")),
        Rule::new(r#"meta[name="article:published_time"]"#, Read::Attr("content")),
        Rule::new(r#"meta[name="date"]"#, Read::Attr("content")),
        Rule::new(r#"meta[property="og:published_time"]"#, Read::Attr("content")),
        Rule::new(r#"meta[name="publish-date"]"#, Read::Attr("content")),
        Rule::new(r#"meta[name="pubdate"]"#, Read::Attr("content")),
        Rule::new(".date-published", Read::AttrThenText("datetime")),
        Rule::new(".entry-date", Read::AttrThenText("datetime")),
        Rule::new(".published", Read::AttrThenText("datetime")),
        Rule::new("time[datetime]", Read::AttrThenText("datetime")),
    ]
});

/// Walk `rules` in order and return the first value `accept` keeps.
fn cascade<T>(document: &Html, rules: &[Rule], accept: impl Fn(String) -> Option<T>) -> Option<T> {
    rules.iter().find_map(|rule| {
        document
            .select(&rule.selector)
            .flat_map(|element| rule.candidates(element))
            .find_map(&accept)
    })
}

/// Pull title, description, image and publication date out of an article
/// page.
///
/// # Arguments
///
/// * `html` - The page body
/// * `base` - URL the page was served from, for resolving relative images
///
/// # Returns
///
/// The metadata found. Fields no selector produced are `None`.
pub fn extract_metadata(html: &str, base: &Url) -> ExtractedMetadata {
    let document = Html::parse_document(html);

    let title = cascade(&document, &TITLE_RULES, Some);
    let description = cascade(&document, &DESCRIPTION_RULES, Some);
    let image_url = cascade(&document, &IMAGE_RULES, |src| resolve_image(base, &src));
    let published_date: Option<DateTime<FixedOffset>> =
        cascade(&document, &DATE_RULES, |raw| parse_date(&raw));

    debug!(
        has_title = title.is_some(),
        has_description = description.is_some(),
        has_image = image_url.is_some(),
        has_date = published_date.is_some(),
        "Extracted page metadata"
    );

    ExtractedMetadata {
        title,
        description,
        image_url,
        published_date,
    }
}

fn resolve_image(base: &Url, src: &str) -> Option<String> {
    if src.starts_with("data:") {
        return None;
    }
    base.join(src).ok().map(String::from)
}

/// Fetches article pages and fills in what the sitemap left out.
#[derive(Debug, Clone)]
pub struct ArticleExtractor {
    http: HttpClient,
    timeout: Duration,
    span: Span,
}

impl ArticleExtractor {
    /// Create an extractor that logs under `span`.
    pub fn new(http: HttpClient, timeout: Duration, span: Span) -> Self {
        Self { http, timeout, span }
    }

    /// Fetch `article`'s page and merge the metadata found there into it.
    ///
    /// # Returns
    ///
    /// The enriched article, or `None` if the page could not be fetched or
    /// is not HTML. Failures are logged with the article URL.
    #[instrument(parent = &self.span, level = "debug", skip(self, article), fields(url = %article.url))]
    pub async fn extract(&self, article: Article) -> Option<Article> {
        let page = match self.http.get(&article.url, self.timeout).await {
            Ok(page) => page,
            Err(e) => {
                error!(url = %article.url, error = %e, "Article fetch failed");
                return None;
            }
        };

        if !page.is_html() {
            error!(
                url = %article.url,
                content_type = %page.content_type,
                "Article is not an HTML page; skipping"
            );
            return None;
        }

        let base = match Url::parse(&page.final_url).or_else(|_| Url::parse(&article.url)) {
            Ok(base) => base,
            Err(e) => {
                error!(url = %article.url, error = %e, "Article URL does not parse");
                return None;
            }
        };

        let metadata = extract_metadata(&page.body, &base);
        Some(article.merge(&metadata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UNTITLED;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn base() -> Url {
        Url::parse("https://example.com/politics/story").unwrap()
    }

    fn extractor() -> ArticleExtractor {
        ArticleExtractor::new(
            HttpClient::new("TestAgent/1.0").unwrap(),
            Duration::from_secs(5),
            Span::none(),
        )
    }

    #[test]
    fn test_title_cascade_order() {
        let html = r#"<html><head><title>Head title</title>
            <meta property="og:title" content="OG title"></head>
            <body><h1>Plain h1</h1><h1 class="entry-title">Entry title</h1></body></html>"#;
        assert_eq!(extract_metadata(html, &base()).title.as_deref(), Some("Entry title"));

        let html = r#"<html><head><title> Head
            title </title></head><body></body></html>"#;
        assert_eq!(extract_metadata(html, &base()).title.as_deref(), Some("Head title"));

        let html = r#"<html><head><meta property="og:title" content="OG title"></head></html>"#;
        assert_eq!(extract_metadata(html, &base()).title.as_deref(), Some("OG title"));
    }

    #[test]
    fn test_empty_h1_falls_through() {
        let html = "<html><head><title>Real</title></head><body><h1>  </h1></body></html>";
        assert_eq!(extract_metadata(html, &base()).title.as_deref(), Some("Real"));
    }

    #[test]
    fn test_description_cascade() {
        let html = r#"<html><head>
            <meta property="og:description" content="OG description">
            <meta name="description" content="Meta description"></head></html>"#;
        assert_eq!(
            extract_metadata(html, &base()).description.as_deref(),
            Some("Meta description")
        );

        let html = "<html><body><article><p></p><p>First paragraph.</p></article></body></html>";
        assert_eq!(
            extract_metadata(html, &base()).description.as_deref(),
            Some("First paragraph.")
        );
    }

    #[test]
    fn test_image_is_resolved_against_page_url() {
        let html = r#"<html><body><figure><img src="/img/a.jpg"></figure><img src="/img/b.jpg"></body></html>"#;
        assert_eq!(
            extract_metadata(html, &base()).image_url.as_deref(),
            Some("https://example.com/img/a.jpg")
        );

        let html = r#"<html><head><meta name="twitter:image" content="https://cdn.example.com/t.png"></head>
            <body><img src="inline.png"></body></html>"#;
        assert_eq!(
            extract_metadata(html, &base()).image_url.as_deref(),
            Some("https://cdn.example.com/t.png")
        );
    }

    #[test]
    fn test_data_uri_images_are_skipped() {
        let html = r#"<html><body><img src="data:image/gif;base64,R0lGOD"><img src="real.png"></body></html>"#;
        assert_eq!(
            extract_metadata(html, &base()).image_url.as_deref(),
            Some("https://example.com/politics/real.png")
        );
    }

    #[test]
    fn test_published_date_sources() {
        let html = r#"<html><head><meta property="article:published_time" content="2024-05-01T10:00:00+02:00"></head></html>"#;
        assert_eq!(
            extract_metadata(html, &base()).published_date,
            parse_date("2024-05-01T10:00:00+02:00")
        );

        let html = r#"<html><body><time datetime="2024-06-02T08:30:00Z">2 June</time></body></html>"#;
        assert_eq!(
            extract_metadata(html, &base()).published_date,
            parse_date("2024-06-02T08:30:00Z")
        );

        let html = r#"<html><body><span class="entry-date">03/04/2024 09:00:00</span></body></html>"#;
        assert_eq!(
            extract_metadata(html, &base()).published_date,
            parse_date("2024-04-03T09:00:00")
        );
    }

    #[test]
    fn test_unparseable_date_falls_through() {
        let html = r#"<html><head><meta name="date" content="sometime"></head>
            <body><time datetime="2024-06-02">June</time></body></html>"#;
        assert_eq!(extract_metadata(html, &base()).published_date, parse_date("2024-06-02"));
    }

    #[test]
    fn test_unparseable_attribute_falls_back_to_element_text() {
        let html = r#"<html><body><span class="published" datetime="hace 2 horas">2024-06-02</span></body></html>"#;
        assert_eq!(
            extract_metadata(html, &base()).published_date,
            parse_date("2024-06-02T00:00:00+00:00")
        );
    }

    #[test]
    fn test_empty_page_yields_nothing() {
        assert_eq!(extract_metadata("", &base()), ExtractedMetadata::default());
    }

    #[tokio::test]
    async fn test_extract_merges_page_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/economy/a"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"<html><head><title>From page</title>
                   <meta name="description" content="Page summary">
                   <meta property="og:image" content="/cover.jpg"></head></html>"#,
                "text/html; charset=utf-8",
            ))
            .mount(&server)
            .await;

        let mut article = Article::new(format!("{}/economy/a", server.uri()));
        article.section = "economy".to_string();
        let enriched = extractor().extract(article).await.unwrap();

        assert_eq!(enriched.title, "From page");
        assert_eq!(enriched.description, "Page summary");
        assert_eq!(enriched.image_url, Some(format!("{}/cover.jpg", server.uri())));
        assert_eq!(enriched.section, "economy");
    }

    #[tokio::test]
    async fn test_extract_page_without_title() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<html><body></body></html>", "text/html"))
            .mount(&server)
            .await;

        let enriched = extractor()
            .extract(Article::new(format!("{}/a", server.uri())))
            .await
            .unwrap();
        assert_eq!(enriched.title, UNTITLED);
    }

    #[tokio::test]
    async fn test_extract_rejects_non_html() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("%PDF-1.4", "application/pdf"))
            .mount(&server)
            .await;

        let result = extractor().extract(Article::new(format!("{}/doc.pdf", server.uri()))).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_extract_failed_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = extractor().extract(Article::new(format!("{}/a", server.uri()))).await;
        assert!(result.is_none());
    }
}
