//! Shared HTTP client for sitemap and article requests.
//!
//! Every request carries a browser User-Agent, follows up to ten redirects,
//! and has its own timeout. A non-2xx status is a failure like any transport
//! error; callers decide what an empty result means for them.

use crate::error::FetchError;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, redirect};
use std::time::Duration;
use tracing::{debug, instrument};

/// A successfully downloaded document.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects.
    pub final_url: String,
    /// Lower-cased `Content-Type` header, empty when absent.
    pub content_type: String,
    pub body: String,
}

impl FetchedPage {
    pub fn is_html(&self) -> bool {
        self.content_type.contains("text/html") || self.content_type.contains("application/xhtml+xml")
    }
}

/// Thin wrapper around a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Build a client that identifies itself with `user_agent`.
    pub fn new(user_agent: &str) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8"),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("es-ES,es;q=0.8,en-US;q=0.5,en;q=0.3"),
        );

        let client = Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .redirect(redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client })
    }

    /// GET `url` and return its body.
    ///
    /// # Errors
    ///
    /// - [`FetchError::InvalidUrl`] if `url` does not parse
    /// - [`FetchError::Timeout`] if the request exceeds `timeout`
    /// - [`FetchError::Status`] for any non-2xx response
    /// - [`FetchError::Http`] for connection and body errors
    #[instrument(level = "debug", skip(self))]
    pub async fn get(&self, url: &str, timeout: Duration) -> Result<FetchedPage, FetchError> {
        let parsed = url::Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;

        let response = self
            .client
            .get(parsed)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        let body = response.text().await.map_err(|e| classify(e, timeout))?;

        debug!(%final_url, %content_type, bytes = body.len(), "Fetched document");
        Ok(FetchedPage {
            final_url,
            content_type,
            body,
        })
    }
}

fn classify(e: reqwest::Error, timeout: Duration) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout(timeout)
    } else {
        FetchError::Http(e)
    }
}
