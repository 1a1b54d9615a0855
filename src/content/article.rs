use regex::Regex;
use reqwest::header::ACCEPT;
use std::sync::LazyLock;
use std::time::Duration;

use super::EnrichError;
use crate::config::Config;
use crate::feed::{read_limited_bytes, FetchError};
use crate::util::validate_url;

const HTML_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Candidate containers for the main article body, most specific first.
static CONTENT_CONTAINERS: LazyLock<[Regex; 4]> = LazyLock::new(|| {
    [
        r"(?is)<article(?:\s[^>]*)?>(.*?)</article\s*>",
        r"(?is)<main(?:\s[^>]*)?>(.*?)</main\s*>",
        r#"(?is)<div\s[^>]*class\s*=\s*["'][^"']*content[^"']*["'][^>]*>(.*?)</div\s*>"#,
        r#"(?is)<div\s[^>]*id\s*=\s*["'][^"']*content[^"']*["'][^>]*>(.*?)</div\s*>"#,
    ]
    .map(|pattern| Regex::new(pattern).expect("static regex"))
});

/// Fetches article pages for full-content republishing.
#[derive(Clone)]
pub struct ArticleFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_bytes: usize,
    allow_private_hosts: bool,
}

impl ArticleFetcher {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            timeout: config.article_timeout(),
            max_bytes: config.max_feed_bytes,
            allow_private_hosts: config.allow_private_hosts,
        }
    }

    /// Fetches `url` and returns the inner HTML of its main content
    /// container, or `None` when the page has no recognisable one.
    pub async fn fetch_main_content(&self, url: &str) -> Result<Option<String>, EnrichError> {
        let url = validate_url(url, self.allow_private_hosts).map_err(FetchError::from)?;

        let bytes = match tokio::time::timeout(self.timeout, self.fetch_page(url)).await {
            Ok(result) => result?,
            Err(_) => return Err(EnrichError::Timeout(self.timeout)),
        };

        let html = String::from_utf8_lossy(&bytes);
        Ok(extract_main_content(&html))
    }

    async fn fetch_page(&self, url: url::Url) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, HTML_ACCEPT)
            .send()
            .await
            .map_err(FetchError::Network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }
        read_limited_bytes(response, self.max_bytes).await
    }
}

/// Inner HTML of the first `<article>`, `<main>`, or content-classed/id'd
/// `<div>`, whichever matches first in that order.
pub fn extract_main_content(html: &str) -> Option<String> {
    CONTENT_CONTAINERS.iter().find_map(|re| {
        re.captures(html)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
    })
}
