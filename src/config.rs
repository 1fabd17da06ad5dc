//! Site list and crawl settings.
//!
//! Sites come either from the built-in list or from a YAML file shaped like:
//!
//! ```yaml
//! - name: The Objective
//!   url: https://theobjective.com
//!   sitemap: https://theobjective.com/sitemap_index.xml
//!   is_own_site: true
//! - name: El País
//!   url: https://elpais.com
//!   sitemap: https://elpais.com/sitemaps/{year}/{month}/sitemap.xml
//! ```
//!
//! `{year}` and `{month}` in a sitemap URL are replaced with the current local
//! date when the list is loaded, for publishers that rotate sitemaps monthly.

use crate::error::ConfigError;
use chrono::{Datelike, Local, NaiveDate};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument};
use url::Url;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// One monitored website.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SiteConfig {
    pub name: String,
    /// Homepage URL.
    pub url: String,
    /// Sitemap or sitemap-index URL.
    pub sitemap: String,
    #[serde(default)]
    pub is_own_site: bool,
}

impl SiteConfig {
    pub fn new(name: &str, url: &str, sitemap: &str, is_own_site: bool) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            sitemap: sitemap.to_string(),
            is_own_site,
        }
    }

    /// Reject entries with blank required fields or a sitemap that is not an
    /// absolute URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [("name", &self.name), ("url", &self.url), ("sitemap", &self.sitemap)] {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    site: self.name.clone(),
                    field,
                });
            }
        }
        if Url::parse(&self.sitemap).is_err() {
            return Err(ConfigError::InvalidUrl {
                site: self.name.clone(),
                url: self.sitemap.clone(),
            });
        }
        Ok(())
    }

    fn expand_placeholders(self, today: NaiveDate) -> Self {
        let sitemap = self
            .sitemap
            .replace("{year}", &today.year().to_string())
            .replace("{month}", &format!("{:02}", today.month()));
        Self { sitemap, ..self }
    }
}

/// Knobs for one crawl run.
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    /// New articles extracted per site per run, counted after known URLs are
    /// filtered out.
    pub max_articles_per_site: usize,
    /// Concurrent fetches for index children and for article pages.
    pub max_workers: usize,
    /// Child sitemaps fetched per sitemap index; the rest are dropped.
    pub index_fanout: usize,
    pub sitemap_timeout: Duration,
    pub article_timeout: Duration,
    pub user_agent: String,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            max_articles_per_site: 50,
            max_workers: 5,
            index_fanout: 20,
            sitemap_timeout: Duration::from_secs(15),
            article_timeout: Duration::from_secs(15),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Load and validate the site list.
///
/// # Arguments
///
/// * `path` - YAML file to read, or `None` for the built-in list
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read or parsed, or if any
/// entry is missing a required field.
#[instrument(level = "info", skip_all)]
pub async fn load_sites(path: Option<&Path>) -> Result<Vec<SiteConfig>, ConfigError> {
    let sites = match path {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
            parse_sites(&raw)?
        }
        None => default_sites(),
    };

    let today = Local::now().date_naive();
    let sites = sites
        .into_iter()
        .map(|site| site.expand_placeholders(today))
        .collect::<Vec<_>>();
    for site in &sites {
        site.validate()?;
    }

    info!(count = sites.len(), from_file = path.is_some(), "Loaded site list");
    Ok(sites)
}

fn parse_sites(raw: &str) -> Result<Vec<SiteConfig>, ConfigError> {
    Ok(serde_yaml::from_str(raw)?)
}

/// The Spanish news sites the monitor was first deployed against.
pub fn default_sites() -> Vec<SiteConfig> {
    vec![
        SiteConfig::new("The Objective", "https://theobjective.com", "https://theobjective.com/sitemap_index.xml", true),
        SiteConfig::new("El Mundo", "https://www.elmundo.es", "https://www.elmundo.es/sitemaps/sitemap.xml", false),
        SiteConfig::new("El Confidencial", "https://www.elconfidencial.com", "https://www.elconfidencial.com/sitemap_index.xml", false),
        SiteConfig::new("Infobae", "https://www.infobae.com/espana", "https://www.infobae.com/arc/outboundfeeds/sitemap2/", false),
        SiteConfig::new("Libertad Digital", "https://www.libertaddigital.com", "https://www.libertaddigital.com/sitemap.xml", false),
        SiteConfig::new("Vozpópuli", "https://www.vozpopuli.com", "https://www.vozpopuli.com/sitemaps/sitemap-news2.xml", false),
        SiteConfig::new("Público", "https://www.publico.es", "https://www.publico.es/sitemap-index.xml", false),
        SiteConfig::new("OKDiario", "https://okdiario.com", "https://okdiario.com/sitemap_index.xml", false),
        SiteConfig::new("El País", "https://elpais.com", "https://elpais.com/sitemaps/{year}/{month}/sitemap.xml", false),
        SiteConfig::new("eldiario.es", "https://www.eldiario.es", "https://www.eldiario.es/sitemap_index_25b87.xml", false),
        SiteConfig::new("La Razón", "https://www.larazon.es", "https://www.larazon.es/sitemaps/news.xml", false),
        SiteConfig::new("20 Minutos", "https://www.20minutos.es", "https://www.20minutos.es/sitemap-index.xml", false),
        SiteConfig::new("ABC", "https://www.abc.es", "https://www.abc.es/sitemap.xml", false),
        SiteConfig::new("El Español", "https://www.elespanol.com", "https://www.elespanol.com/sitemap_index.xml", false),
        SiteConfig::new("El Periódico", "https://www.elperiodico.com", "https://www.elperiodico.com/es/google-news.xml", false),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sites_yaml() {
        let yaml = r#"
- name: Example
  url: https://example.com
  sitemap: https://example.com/sitemap.xml
  is_own_site: true
- name: Other
  url: https://other.com
  sitemap: https://other.com/sitemap_index.xml
"#;
        let sites = parse_sites(yaml).unwrap();
        assert_eq!(sites.len(), 2);
        assert!(sites[0].is_own_site);
        assert!(!sites[1].is_own_site);
        assert_eq!(sites[1].sitemap, "https://other.com/sitemap_index.xml");
    }

    #[test]
    fn test_missing_required_field_is_an_error() {
        let yaml = "- name: Example\n  url: https://example.com\n";
        assert!(matches!(parse_sites(yaml), Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_validate_rejects_blank_and_relative() {
        let blank = SiteConfig::new("Example", "https://example.com", "  ", false);
        assert!(matches!(
            blank.validate(),
            Err(ConfigError::MissingField { field: "sitemap", .. })
        ));

        let relative = SiteConfig::new("Example", "https://example.com", "/sitemap.xml", false);
        assert!(matches!(relative.validate(), Err(ConfigError::InvalidUrl { .. })));
    }

    #[test]
    fn test_placeholders_are_expanded() {
        let site = SiteConfig::new("El País", "https://elpais.com", "https://elpais.com/sitemaps/{year}/{month}/sitemap.xml", false);
        let today = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(
            site.expand_placeholders(today).sitemap,
            "https://elpais.com/sitemaps/2024/03/sitemap.xml"
        );
    }

    #[test]
    fn test_default_sites_are_valid_after_expansion() {
        let today = NaiveDate::from_ymd_opt(2024, 11, 1).unwrap();
        let sites = default_sites();
        assert_eq!(sites.len(), 15);
        assert_eq!(sites.iter().filter(|s| s.is_own_site).count(), 1);
        for site in sites {
            site.expand_placeholders(today).validate().unwrap();
        }
    }

    #[tokio::test]
    async fn test_load_sites_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sites.yaml");
        tokio::fs::write(
            &path,
            "- name: Example\n  url: https://example.com\n  sitemap: https://example.com/{year}.xml\n",
        )
        .await
        .unwrap();

        let sites = load_sites(Some(&path)).await.unwrap();
        assert_eq!(sites.len(), 1);
        assert!(!sites[0].sitemap.contains("{year}"));
    }

    #[tokio::test]
    async fn test_load_sites_missing_file() {
        let result = load_sites(Some(Path::new("/definitely/not/here.yaml"))).await;
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
