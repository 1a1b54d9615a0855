//! Source and configuration management.
//!
//! Everything the command line can change goes through [`Manager`]; the
//! check pipeline only reads what is stored here.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;

use crate::config::{Config, ConfigError};
use crate::content::{EnrichError, EnrichmentConfig, Publisher};
use crate::delivery::{escape_markdown, DeliveryConfig, DeliveryError, TelegramClient, ValidationError};
use crate::feed::{looks_like_feed, FeedFetcher, FetchError};
use crate::storage::{Database, Source, SourceStatus, StorageError};
use crate::util::{truncate_chars, validate_url, UrlValidationError};

/// Longest display name kept for a source; longer names are cut.
pub const MAX_NAME_CHARS: usize = 100;

const TEST_PAGE_HTML: &str = "\
<h3>Telegraph test page</h3>\
<p>This page checks that publishing works.</p>\
<p><em>If you can read this, the Telegraph settings are correct.</em></p>\
<blockquote><p>Articles from your feeds are republished here when enrichment is enabled.</p></blockquote>";

#[derive(Debug, Error)]
pub enum ManageError {
    #[error("Source URL is required")]
    EmptyUrl,
    #[error(transparent)]
    InvalidUrl(#[from] UrlValidationError),
    #[error("Source limit reached (max {0})")]
    LimitReached(usize),
    #[error("Source already exists: {0}")]
    Duplicate(String),
    #[error("Source not found: {0}")]
    NotFound(String),
    #[error("Could not reach feed: {0}")]
    Unreachable(#[source] FetchError),
    #[error("URL is not an RSS or Atom feed")]
    NotAFeed,
    #[error("Telegram is not configured")]
    NotConfigured,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Test message failed: {0}")]
    Delivery(#[from] DeliveryError),
    #[error("Test page failed: {0}")]
    Enrich(#[from] EnrichError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// One row of [`Manager::list_sources`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSummary {
    pub url: String,
    pub name: String,
    pub status: SourceStatus,
    pub error_count: u32,
    pub last_error: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub remembered_items: usize,
}

impl From<&Source> for SourceSummary {
    fn from(source: &Source) -> Self {
        Self {
            url: source.url.clone(),
            name: source.display_name.clone(),
            status: source.status(),
            error_count: source.error_count,
            last_error: source.last_error.clone(),
            last_checked_at: source.last_checked_at,
            remembered_items: source.recent_items.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub sources: usize,
    pub max_sources: usize,
    pub error_sources: usize,
    pub telegram_configured: bool,
    pub telegraph_enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub total_messages_sent: u64,
    pub total_runs: u64,
    pub version: &'static str,
}

pub struct Manager {
    db: Database,
    fetcher: FeedFetcher,
    telegram: TelegramClient,
    publisher: Publisher,
    tz: Tz,
    max_sources: usize,
    allow_private_hosts: bool,
}

impl Manager {
    pub fn new(config: &Config, db: Database) -> Result<Self, ConfigError> {
        let client = config.http_client()?;
        Ok(Self {
            fetcher: FeedFetcher::new(client.clone(), config),
            telegram: TelegramClient::new(client.clone(), config),
            publisher: Publisher::new(client, config, db.clone()),
            db,
            tz: config.tz()?,
            max_sources: config.max_sources,
            allow_private_hosts: config.allow_private_hosts,
        })
    }

    // ========================================================================
    // Sources
    // ========================================================================

    /// Validates, probes and stores a new source.
    ///
    /// The URL must be an http(s) URL to a public host that serves something
    /// feed-shaped. A blank name defaults to the URL.
    pub async fn add_source(&self, url: &str, name: &str) -> Result<Source, ManageError> {
        let url = url.trim().to_string();
        if url.is_empty() {
            return Err(ManageError::EmptyUrl);
        }
        validate_url(&url, self.allow_private_hosts)?;

        let mut sources = self.db.load_sources().await?;
        if sources.len() >= self.max_sources {
            return Err(ManageError::LimitReached(self.max_sources));
        }
        if sources.iter().any(|s| s.url == url) {
            return Err(ManageError::Duplicate(url));
        }

        let body = self
            .fetcher
            .fetch_text(&url)
            .await
            .map_err(ManageError::Unreachable)?;
        if !looks_like_feed(&body) {
            return Err(ManageError::NotAFeed);
        }

        let name = truncate_chars(name.trim(), MAX_NAME_CHARS);
        let name = if name.is_empty() { url.clone() } else { name.into_owned() };

        let source = Source::new(url, name);
        sources.push(source.clone());
        self.db.save_sources(&sources).await?;

        tracing::info!(url = %source.url, name = %source.display_name, "Added source");
        Ok(source)
    }

    pub async fn remove_source(&self, url: &str) -> Result<Source, ManageError> {
        let url = url.trim();
        let mut sources = self.db.load_sources().await?;
        let index = sources
            .iter()
            .position(|s| s.url == url)
            .ok_or_else(|| ManageError::NotFound(url.to_string()))?;

        let removed = sources.remove(index);
        self.db.save_sources(&sources).await?;

        tracing::info!(url = %removed.url, "Removed source");
        Ok(removed)
    }

    pub async fn list_sources(&self) -> Result<Vec<SourceSummary>, ManageError> {
        let sources = self.db.load_sources().await?;
        Ok(sources.iter().map(SourceSummary::from).collect())
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    pub async fn save_delivery_config(
        &self,
        bot_token: &str,
        chat_id: &str,
    ) -> Result<DeliveryConfig, ManageError> {
        let config = DeliveryConfig::new(bot_token, chat_id)?;
        self.db.save_delivery_config(&config).await?;
        tracing::info!(token = %config.masked_token(), chat_id = %config.chat_id(), "Saved Telegram configuration");
        Ok(config)
    }

    pub async fn save_enrichment_config(&self, config: &EnrichmentConfig) -> Result<(), ManageError> {
        self.db.save_enrichment_config(config).await?;
        tracing::info!(enabled = config.enabled, "Saved Telegraph configuration");
        Ok(())
    }

    pub async fn enrichment_config(&self) -> Result<EnrichmentConfig, ManageError> {
        Ok(self.db.load_enrichment_config().await?.unwrap_or_default())
    }

    // ========================================================================
    // Tests and Status
    // ========================================================================

    /// Sends a fixed test message to the configured chat.
    pub async fn send_test_message(&self) -> Result<(), ManageError> {
        let config = self
            .db
            .load_delivery_config()
            .await?
            .ok_or(ManageError::NotConfigured)?;

        let now = Utc::now().with_timezone(&self.tz);
        let text = format!(
            "🧪 *{}*\n\n⏰ {}\n✅ {}",
            escape_markdown("feedpush test message"),
            escape_markdown(&now.format("%Y-%m-%d %H:%M:%S %Z").to_string()),
            escape_markdown("If you received this, delivery is configured correctly."),
        );
        self.telegram.send_message(&config, &text).await?;
        tracing::info!(chat_id = %config.chat_id(), "Sent test message");
        Ok(())
    }

    /// Publishes a fixed sample page and returns its URL.
    pub async fn publish_test_page(&self) -> Result<String, ManageError> {
        let config = self.enrichment_config().await?;
        let title = format!(
            "Telegraph test - {}",
            Utc::now().with_timezone(&self.tz).format("%Y-%m-%d")
        );
        let url = self
            .publisher
            .publish_page(&title, &config.author_name, TEST_PAGE_HTML, &config)
            .await?;
        tracing::info!(url = %url, "Published test page");
        Ok(url)
    }

    pub async fn status(&self) -> Result<StatusReport, ManageError> {
        let sources = self.db.load_sources().await?;
        let stats = self.db.load_stats().await?;
        let telegram_configured = self.db.load_delivery_config().await?.is_some();
        let telegraph_enabled = self
            .db
            .load_enrichment_config()
            .await?
            .is_some_and(|c| c.enabled);

        Ok(StatusReport {
            sources: sources.len(),
            max_sources: self.max_sources,
            error_sources: sources
                .iter()
                .filter(|s| s.status() == SourceStatus::Error)
                .count(),
            telegram_configured,
            telegraph_enabled,
            last_run_at: stats.last_run_at,
            total_messages_sent: stats.total_messages_sent,
            total_runs: stats.total_runs,
            version: env!("CARGO_PKG_VERSION"),
        })
    }
}
