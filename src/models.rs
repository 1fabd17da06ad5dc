//! Data models for discovered articles.
//!
//! - [`Article`]: one row of the persisted table, built in stages: the
//!   sitemap parser creates it, the extractor fills gaps, the orchestrator
//!   stamps site information.
//! - [`ExtractedMetadata`]: what the HTML extractor found on an article page.
//!
//! Stages never mutate an `Article` in place. [`Article::merge`] returns a new
//! value, applying the rule that extracted data only replaces a field that is
//! still empty or holds a placeholder.
//!
//! Serialization is column-for-column what the dashboard reads:
//! `url, title, section, description, source, is_own_site, published_date,
//! last_modified, image_url, ingested_at`, with dates as RFC-3339.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use url::Url;

/// Title used when no source yields one.
pub const UNTITLED: &str = "untitled";
/// Section used before one is derived from the URL.
pub const DEFAULT_SECTION: &str = "general";
/// Section for URLs whose path has no segments.
pub const HOME_SECTION: &str = "home";

/// A news article as discovered in a sitemap and enriched from its page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    /// Absolute article URL, the deduplication key.
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub description: String,
    /// Site name from the site list.
    #[serde(default)]
    pub source: String,
    #[serde(default, with = "serde_flag")]
    pub is_own_site: bool,
    #[serde(default, with = "serde_date")]
    pub published_date: Option<DateTime<FixedOffset>>,
    /// Only standard sitemaps carry this.
    #[serde(default, with = "serde_date")]
    pub last_modified: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default, with = "serde_date")]
    pub ingested_at: Option<DateTime<FixedOffset>>,
}

/// Metadata pulled out of an article's HTML. `None` means no selector in the
/// cascade produced a value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub published_date: Option<DateTime<FixedOffset>>,
}

impl Article {
    /// A bare article that only knows its URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            section: DEFAULT_SECTION.to_string(),
            description: String::new(),
            source: String::new(),
            is_own_site: false,
            published_date: None,
            last_modified: None,
            image_url: None,
            ingested_at: None,
        }
    }

    /// Whether the title still needs filling in.
    pub fn has_placeholder_title(&self) -> bool {
        let title = self.title.trim();
        title.is_empty() || title.eq_ignore_ascii_case(UNTITLED)
    }

    /// Combine this article with metadata extracted from its page.
    ///
    /// A field is taken from `extracted` only when the current value is empty,
    /// missing, or the [`UNTITLED`] placeholder. A title that is still missing
    /// after the merge becomes [`UNTITLED`]. `section`, `source`,
    /// `is_own_site` and `last_modified` are never touched.
    pub fn merge(self, extracted: &ExtractedMetadata) -> Article {
        let title = if self.has_placeholder_title() {
            extracted
                .title
                .clone()
                .unwrap_or_else(|| UNTITLED.to_string())
        } else {
            self.title
        };

        let description = if self.description.trim().is_empty() {
            extracted.description.clone().unwrap_or_default()
        } else {
            self.description
        };

        let image_url = self
            .image_url
            .filter(|u| !u.trim().is_empty())
            .or_else(|| extracted.image_url.clone());

        Article {
            title,
            description,
            image_url,
            published_date: self.published_date.or(extracted.published_date),
            ..self
        }
    }

    /// Attach the owning site's name and flag.
    pub fn with_site(self, source: &str, is_own_site: bool) -> Article {
        Article {
            source: source.to_string(),
            is_own_site,
            ..self
        }
    }

    /// Whether the row satisfies the table invariant: a non-empty absolute URL.
    pub fn is_storable(&self) -> bool {
        !self.url.trim().is_empty()
            && Url::parse(&self.url)
                .map(|u| u.has_host())
                .unwrap_or(false)
    }
}

/// Section name for a URL: its first non-empty path segment, or
/// [`HOME_SECTION`] when the path is empty.
pub fn section_from_url(url: &str) -> String {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => return DEFAULT_SECTION.to_string(),
    };
    path.split('/')
        .find(|segment| !segment.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| HOME_SECTION.to_string())
}

/// Optional timestamps as RFC-3339 cells. Reading re-normalizes whatever is in
/// the cell, so rows written by older tooling with naive ISO dates still load;
/// a cell no pattern understands becomes `None`.
mod serde_date {
    use crate::dates::parse_date;
    use chrono::{DateTime, FixedOffset};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<FixedOffset>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(dt) => serializer.serialize_str(&dt.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<FixedOffset>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(parse_date))
    }
}

/// Booleans written as `true`/`True`/`1`. Anything else reads as `false`.
mod serde_flag {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &bool, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bool(*value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(matches!(
            raw.as_deref().map(str::trim),
            Some("true" | "True" | "TRUE" | "1")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::parse_date;

    fn extracted() -> ExtractedMetadata {
        ExtractedMetadata {
            title: Some("Page Title".to_string()),
            description: Some("Page description".to_string()),
            image_url: Some("https://example.com/page.jpg".to_string()),
            published_date: parse_date("2024-05-01T10:00:00+00:00"),
        }
    }

    #[test]
    fn test_new_article_defaults() {
        let article = Article::new("https://example.com/a");
        assert_eq!(article.title, "");
        assert_eq!(article.section, DEFAULT_SECTION);
        assert_eq!(article.description, "");
        assert!(article.published_date.is_none());
        assert!(article.image_url.is_none());
    }

    #[test]
    fn test_merge_fills_empty_fields() {
        let merged = Article::new("https://example.com/a").merge(&extracted());
        assert_eq!(merged.title, "Page Title");
        assert_eq!(merged.description, "Page description");
        assert_eq!(merged.image_url.as_deref(), Some("https://example.com/page.jpg"));
        assert_eq!(merged.published_date, parse_date("2024-05-01T10:00:00+00:00"));
    }

    #[test]
    fn test_merge_keeps_existing_values() {
        let mut article = Article::new("https://example.com/a");
        article.title = "Sitemap Title".to_string();
        article.description = "Sitemap description".to_string();
        article.image_url = Some("https://example.com/sitemap.jpg".to_string());
        article.published_date = parse_date("2020-01-01");

        let merged = article.clone().merge(&extracted());
        assert_eq!(merged.title, article.title);
        assert_eq!(merged.description, article.description);
        assert_eq!(merged.image_url, article.image_url);
        assert_eq!(merged.published_date, article.published_date);
    }

    #[test]
    fn test_merge_replaces_placeholder_title() {
        let mut article = Article::new("https://example.com/a");
        article.title = UNTITLED.to_string();
        assert_eq!(article.merge(&extracted()).title, "Page Title");
    }

    #[test]
    fn test_merge_with_nothing_extracted_uses_placeholder() {
        let merged = Article::new("https://example.com/a").merge(&ExtractedMetadata::default());
        assert_eq!(merged.title, UNTITLED);
        assert_eq!(merged.description, "");
        assert!(merged.image_url.is_none());
        assert!(merged.published_date.is_none());
    }

    #[test]
    fn test_merge_never_touches_site_fields() {
        let mut article = Article::new("https://example.com/politics/a").with_site("Example", true);
        article.section = "politics".to_string();
        let merged = article.merge(&extracted());
        assert_eq!(merged.section, "politics");
        assert_eq!(merged.source, "Example");
        assert!(merged.is_own_site);
    }

    #[test]
    fn test_section_from_url() {
        assert_eq!(section_from_url("https://example.com/sports/2024/a.html"), "sports");
        assert_eq!(section_from_url("https://example.com//economy/a"), "economy");
        assert_eq!(section_from_url("https://example.com/"), HOME_SECTION);
        assert_eq!(section_from_url("https://example.com"), HOME_SECTION);
        assert_eq!(section_from_url("not a url"), DEFAULT_SECTION);
    }

    #[test]
    fn test_is_storable() {
        assert!(Article::new("https://example.com/a").is_storable());
        assert!(!Article::new("").is_storable());
        assert!(!Article::new("/relative/path").is_storable());
        assert!(!Article::new("mailto:someone@example.com").is_storable());
    }
}
