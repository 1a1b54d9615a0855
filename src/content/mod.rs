//! Optional republishing of articles to Telegraph.
//!
//! An item's content (its description, or the article page when full-content
//! fetching is enabled) is sanitized into a Telegraph node tree and published
//! as a page. The resulting link is appended to the delivered message. Every
//! failure here degrades to "no link"; it never blocks delivery.

mod article;
mod sanitize;
mod telegraph;

pub use article::{extract_main_content, ArticleFetcher};
pub use sanitize::{
    count_nodes, html_to_nodes, limit_nodes, max_depth, placeholder, Attrs, Element, Node,
    MAX_DEPTH, MAX_NODES, MAX_TEXT_CHARS, PLACEHOLDER_TEXT,
};
pub use telegraph::{
    Page, PageMeta, TelegraphAccount, TelegraphClient, MAX_CONTENT_BYTES, MAX_TITLE_CHARS,
};

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::config::Config;
use crate::delivery::ValidationError;
use crate::feed::FetchError;
use crate::storage::{Database, Item, StorageError};
use crate::util::is_well_formed_url;

/// Descriptions shorter than this trigger a full-content fetch when enabled.
pub const SHORT_DESCRIPTION_CHARS: usize = 500;

const DEFAULT_AUTHOR_NAME: &str = "RSS Bot";

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("Article fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Request failed: {0}")]
    Network(#[source] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Telegraph API error: {0}")]
    Api(String),
    #[error("Page content too large ({size} bytes)")]
    ContentTooLarge { size: usize },
    #[error("Malformed JSON: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl EnrichError {
    pub fn is_retryable(&self) -> bool {
        match self {
            EnrichError::Fetch(e) => e.is_retryable(),
            EnrichError::Timeout(_) | EnrichError::Network(_) => true,
            EnrichError::HttpStatus(status) => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Stored enrichment settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnrichmentConfig {
    pub enabled: bool,
    pub author_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_url: Option<String>,
    pub fetch_full_content: bool,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            author_name: DEFAULT_AUTHOR_NAME.to_string(),
            author_url: None,
            fetch_full_content: false,
        }
    }
}

impl EnrichmentConfig {
    /// Blank author name falls back to the default; a blank author URL is
    /// treated as unset.
    pub fn new(
        enabled: bool,
        author_name: Option<&str>,
        author_url: Option<&str>,
        fetch_full_content: bool,
    ) -> Result<Self, ValidationError> {
        let author_name = author_name
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_AUTHOR_NAME);

        let author_url = match author_url.map(str::trim).filter(|s| !s.is_empty()) {
            Some(url) if is_well_formed_url(url) => Some(url.to_string()),
            Some(_) => return Err(ValidationError::InvalidAuthorUrl),
            None => None,
        };

        Ok(Self {
            enabled,
            author_name: author_name.to_string(),
            author_url,
            fetch_full_content,
        })
    }
}

// ============================================================================
// Publisher
// ============================================================================

/// Publishes items as Telegraph pages.
///
/// The account credential is loaded from (or created and saved to) the store
/// on first use and kept for the publisher's lifetime.
pub struct Publisher {
    telegraph: TelegraphClient,
    articles: ArticleFetcher,
    db: Database,
    account: OnceCell<TelegraphAccount>,
}

impl Publisher {
    pub fn new(client: reqwest::Client, config: &Config, db: Database) -> Self {
        Self {
            telegraph: TelegraphClient::new(client.clone(), config),
            articles: ArticleFetcher::new(client, config),
            db,
            account: OnceCell::new(),
        }
    }

    /// Page URL for `item`, or `None` when enrichment is off or fails.
    pub async fn publish(
        &self,
        item: &Item,
        source_name: &str,
        config: &EnrichmentConfig,
    ) -> Option<String> {
        if !config.enabled {
            return None;
        }
        match self.publish_item(item, source_name, config).await {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!(link = %item.link, error = %e, "Enrichment failed, sending plain message");
                None
            }
        }
    }

    pub async fn publish_item(
        &self,
        item: &Item,
        source_name: &str,
        config: &EnrichmentConfig,
    ) -> Result<String, EnrichError> {
        let content = self.item_content(item, config).await;
        self.publish_page(&item.title, source_name, &content, config)
            .await
    }

    /// Sanitizes `html` and publishes it under `title`.
    pub async fn publish_page(
        &self,
        title: &str,
        author_name: &str,
        html: &str,
        config: &EnrichmentConfig,
    ) -> Result<String, EnrichError> {
        let mut nodes = limit_nodes(html_to_nodes(html), MAX_NODES, MAX_DEPTH);
        if nodes.is_empty() {
            nodes = placeholder();
        }

        let account = self.account(config).await?;
        let meta = PageMeta {
            title,
            author_name,
            author_url: config.author_url.as_deref(),
        };
        let page = self.telegraph.create_page(account, meta, &nodes).await?;
        tracing::debug!(path = %page.path, "Published page");
        Ok(page.url)
    }

    /// The description, or the article body when it is fetched and longer.
    async fn item_content(&self, item: &Item, config: &EnrichmentConfig) -> String {
        let wants_full = config.fetch_full_content
            && !item.link.is_empty()
            && item.description.chars().count() < SHORT_DESCRIPTION_CHARS;
        if !wants_full {
            return item.description.clone();
        }

        match self.articles.fetch_main_content(&item.link).await {
            Ok(Some(html)) if html.chars().count() > item.description.chars().count() => html,
            Ok(_) => item.description.clone(),
            Err(e) => {
                tracing::debug!(link = %item.link, error = %e, "Full-content fetch failed");
                item.description.clone()
            }
        }
    }

    async fn account(&self, config: &EnrichmentConfig) -> Result<&TelegraphAccount, EnrichError> {
        self.account
            .get_or_try_init(|| async {
                if let Some(account) = self.db.load_telegraph_account().await? {
                    return Ok(account);
                }

                let short_name = format!("RSS_Bot_{}", chrono::Utc::now().timestamp_millis());
                let account = self
                    .telegraph
                    .create_account(
                        &short_name,
                        &config.author_name,
                        config.author_url.as_deref(),
                    )
                    .await?;
                self.db.save_telegraph_account(&account).await?;
                tracing::info!(short_name = %account.short_name, "Created Telegraph account");
                Ok(account)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ACCOUNT_BODY: &str =
        r#"{"ok":true,"result":{"short_name":"RSS_Bot_1","author_name":"RSS Bot","access_token":"tok"}}"#;
    const PAGE_BODY: &str =
        r#"{"ok":true,"result":{"path":"Hello-01-01","url":"https://telegra.ph/Hello-01-01"}}"#;

    fn enabled() -> EnrichmentConfig {
        EnrichmentConfig {
            enabled: true,
            ..EnrichmentConfig::default()
        }
    }

    fn item(link: &str, description: &str) -> Item {
        Item::new(
            "Hello".into(),
            link.into(),
            description.into(),
            None,
            Some("a1".into()),
        )
    }

    async fn publisher(server: &MockServer) -> (Publisher, Database) {
        let config = Config {
            telegraph_api_url: server.uri(),
            allow_private_hosts: true,
            article_timeout_secs: 2,
            ..Config::default()
        };
        let db = Database::open(":memory:").await.unwrap();
        (
            Publisher::new(reqwest::Client::new(), &config, db.clone()),
            db,
        )
    }

    async fn mount_telegraph(server: &MockServer, pages: u64) {
        Mock::given(method("POST"))
            .and(path("/createAccount"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ACCOUNT_BODY))
            .expect(1)
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/createPage"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE_BODY))
            .expect(pages)
            .mount(server)
            .await;
    }

    #[test]
    fn test_config_defaults_from_empty_record() {
        let config: EnrichmentConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EnrichmentConfig::default());
        assert_eq!(config.author_name, "RSS Bot");
    }

    #[test]
    fn test_config_new_validates_author_url() {
        assert_eq!(
            EnrichmentConfig::new(true, Some("Me"), Some("ftp://x"), false),
            Err(ValidationError::InvalidAuthorUrl)
        );
        let config = EnrichmentConfig::new(true, Some("  "), Some(""), true).unwrap();
        assert_eq!(config.author_name, "RSS Bot");
        assert_eq!(config.author_url, None);
    }

    #[tokio::test]
    async fn test_account_created_once_and_stored() {
        let server = MockServer::start().await;
        mount_telegraph(&server, 2).await;
        let (publisher, db) = publisher(&server).await;

        let first = publisher
            .publish(&item("https://ex.com/a", "Body"), "Blog", &enabled())
            .await;
        let second = publisher
            .publish(&item("https://ex.com/b", "Body"), "Blog", &enabled())
            .await;

        assert_eq!(first.as_deref(), Some("https://telegra.ph/Hello-01-01"));
        assert_eq!(second.as_deref(), Some("https://telegra.ph/Hello-01-01"));
        assert!(db.load_telegraph_account().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stored_account_reused() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/createAccount"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ACCOUNT_BODY))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/createPage"))
            .and(body_partial_json(serde_json::json!({"access_token": "stored"})))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE_BODY))
            .expect(1)
            .mount(&server)
            .await;

        let (publisher, db) = publisher(&server).await;
        db.save_telegraph_account(&TelegraphAccount::new("RSS_Bot_0".into(), None, "stored".into()))
            .await
            .unwrap();

        let url = publisher
            .publish(&item("https://ex.com/a", "Body"), "Blog", &enabled())
            .await;
        assert!(url.is_some());
    }

    #[tokio::test]
    async fn test_disabled_publishes_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let (publisher, _) = publisher(&server).await;

        let url = publisher
            .publish(&item("https://ex.com/a", "Body"), "Blog", &EnrichmentConfig::default())
            .await;
        assert_eq!(url, None);
    }

    #[tokio::test]
    async fn test_api_failure_degrades_to_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let (publisher, _) = publisher(&server).await;

        let url = publisher
            .publish(&item("https://ex.com/a", "Body"), "Blog", &enabled())
            .await;
        assert_eq!(url, None);
    }

    #[tokio::test]
    async fn test_full_content_replaces_short_description() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/post"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<html><article><p>The complete article text, much longer than the summary.</p></article></html>",
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/createAccount"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ACCOUNT_BODY))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/createPage"))
            .and(body_partial_json(serde_json::json!({
                "author_name": "Blog",
                "content": [{"tag": "p", "children": ["The complete article text, much longer than the summary."]}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE_BODY))
            .expect(1)
            .mount(&server)
            .await;

        let (publisher, _) = publisher(&server).await;
        let config = EnrichmentConfig {
            fetch_full_content: true,
            ..enabled()
        };
        let link = format!("{}/post", server.uri());
        let url = publisher.publish(&item(&link, "Short"), "Blog", &config).await;
        assert!(url.is_some());
    }

    #[tokio::test]
    async fn test_failed_article_fetch_falls_back_to_description() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/createAccount"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ACCOUNT_BODY))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/createPage"))
            .and(body_partial_json(serde_json::json!({
                "content": [{"tag": "p", "children": ["Short"]}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE_BODY))
            .expect(1)
            .mount(&server)
            .await;

        let (publisher, _) = publisher(&server).await;
        let config = EnrichmentConfig {
            fetch_full_content: true,
            ..enabled()
        };
        let link = format!("{}/missing", server.uri());
        let url = publisher.publish(&item(&link, "Short"), "Blog", &config).await;
        assert!(url.is_some());
    }

    #[tokio::test]
    async fn test_empty_content_publishes_placeholder() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/createAccount"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ACCOUNT_BODY))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/createPage"))
            .and(body_partial_json(serde_json::json!({
                "content": [{"tag": "p", "children": [PLACEHOLDER_TEXT]}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE_BODY))
            .expect(1)
            .mount(&server)
            .await;

        let (publisher, _) = publisher(&server).await;
        let url = publisher
            .publish(&item("https://ex.com/a", ""), "Blog", &enabled())
            .await;
        assert!(url.is_some());
    }
}
