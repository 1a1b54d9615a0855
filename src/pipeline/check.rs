use chrono::Utc;
use chrono_tz::Tz;
use futures::future::join_all;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use thiserror::Error;

use crate::config::{Config, ConfigError};
use crate::content::{EnrichmentConfig, Publisher};
use crate::delivery::{format_message, DeliveryConfig, TelegramClient};
use crate::feed::{find_new, next_recent_items, parse_feed, FeedFetcher, FetchError, ParseError};
use crate::storage::{Database, Item, Source, StorageError};

/// Why a source produced no items this run.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("Source check panicked: {0}")]
    Panicked(String),
}

/// Why a run did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoDeliveryConfig,
    NoSources,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NoDeliveryConfig => write!(f, "no Telegram configuration"),
            SkipReason::NoSources => write!(f, "no sources configured"),
        }
    }
}

/// Aggregate numbers for one completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Sources checked.
    pub processed: usize,
    /// New items found across all sources.
    pub new_items: usize,
    /// Messages actually delivered.
    pub delivered: usize,
    /// Sources whose check failed.
    pub errors: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Skipped(SkipReason),
    Completed(RunReport),
}

/// Result of checking one batch of sources, before persistence.
#[derive(Debug, Default)]
pub struct CheckSummary {
    pub updated_sources: Vec<Source>,
    pub report: RunReport,
}

struct SourceOutcome {
    source: Source,
    new_items: usize,
    delivered: usize,
    failed: bool,
}

/// One check run: fetch, parse, de-duplicate, enrich, format and deliver for
/// every source, then persist the updated sources and run statistics.
pub struct Pipeline {
    db: Database,
    fetcher: FeedFetcher,
    telegram: TelegramClient,
    publisher: Publisher,
    tz: Tz,
    max_concurrent: usize,
    max_parsed_items: usize,
    recent_items_cap: usize,
    inter_message_delay: Duration,
}

impl Pipeline {
    pub fn new(config: &Config, db: Database) -> Result<Self, ConfigError> {
        let client = config.http_client()?;
        Ok(Self {
            fetcher: FeedFetcher::new(client.clone(), config),
            telegram: TelegramClient::new(client.clone(), config),
            publisher: Publisher::new(client, config, db.clone()),
            db,
            tz: config.tz()?,
            max_concurrent: config.max_concurrent_checks.max(1),
            max_parsed_items: config.max_parsed_items,
            recent_items_cap: config.recent_items_cap,
            inter_message_delay: config.inter_message_delay(),
        })
    }

    /// Loads sources and configuration, checks every source, and writes the
    /// results back in one step at the end.
    ///
    /// Without a delivery configuration or sources the run is skipped and
    /// nothing is written.
    pub async fn run(&self) -> Result<RunOutcome, StorageError> {
        let Some(delivery) = self.db.load_delivery_config().await? else {
            tracing::info!("Skipping check: no Telegram configuration");
            return Ok(RunOutcome::Skipped(SkipReason::NoDeliveryConfig));
        };
        let sources = self.db.load_sources().await?;
        if sources.is_empty() {
            tracing::info!("Skipping check: no sources configured");
            return Ok(RunOutcome::Skipped(SkipReason::NoSources));
        }
        let enrichment = self
            .db
            .load_enrichment_config()
            .await?
            .unwrap_or_default();

        let evicted = self.db.evict_expired().await?;
        if evicted > 0 {
            tracing::debug!(evicted = evicted, "Evicted expired records");
        }

        tracing::info!(sources = sources.len(), "Starting check run");
        let summary = self.check_sources(sources, &delivery, &enrichment).await;

        self.db.merge_checked_sources(summary.updated_sources).await?;
        self.db.record_run(summary.report.delivered as u64).await?;

        let report = summary.report;
        tracing::info!(
            processed = report.processed,
            new_items = report.new_items,
            delivered = report.delivered,
            errors = report.errors,
            "Check run complete"
        );
        Ok(RunOutcome::Completed(report))
    }

    /// Checks `sources` in batches of at most `max_concurrent_checks`.
    ///
    /// Each batch settles fully before the next starts. A failing (or
    /// panicking) source only updates its own error state.
    pub async fn check_sources(
        &self,
        sources: Vec<Source>,
        delivery: &DeliveryConfig,
        enrichment: &EnrichmentConfig,
    ) -> CheckSummary {
        let mut summary = CheckSummary::default();

        for batch in sources.chunks(self.max_concurrent) {
            let tasks = batch.iter().map(|source| async move {
                let task = self.check_source(source.clone(), delivery, enrichment);
                match AssertUnwindSafe(task).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(panic) => {
                        let message = panic_message(panic.as_ref());
                        tracing::error!(url = %source.url, error = %message, "Source check panicked");
                        failed(source.clone(), CheckError::Panicked(message))
                    }
                }
            });

            for outcome in join_all(tasks).await {
                summary.report.processed += 1;
                summary.report.new_items += outcome.new_items;
                summary.report.delivered += outcome.delivered;
                if outcome.failed {
                    summary.report.errors += 1;
                }
                summary.updated_sources.push(outcome.source);
            }
        }

        summary
    }

    async fn check_source(
        &self,
        mut source: Source,
        delivery: &DeliveryConfig,
        enrichment: &EnrichmentConfig,
    ) -> SourceOutcome {
        let items = match self.fetch_items(&source.url).await {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(url = %source.url, error = %e, "Source check failed");
                return failed(source, e);
            }
        };

        let window: Vec<Item> = items.into_iter().take(self.recent_items_cap).collect();
        let new_items = find_new(&window, &source.recent_items);

        let mut delivered = 0;
        let mut withheld = Vec::new();
        for (index, item) in new_items.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.inter_message_delay).await;
            }

            let enrichment_url = self
                .publisher
                .publish(item, &source.display_name, enrichment)
                .await;
            let text = format_message(item, &source.display_name, enrichment_url.as_deref(), self.tz);

            match self.telegram.send_message(delivery, &text).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        url = %source.url,
                        guid = %item.guid,
                        error = %e,
                        "Delivery failed"
                    );
                    // Transient failures are offered again next run
                    if e.is_retryable() {
                        withheld.push(item.clone());
                    }
                }
            }
        }

        source.recent_items = next_recent_items(
            &window,
            &source.recent_items,
            &withheld,
            self.recent_items_cap,
        );
        source.last_checked_at = Some(Utc::now());
        source.error_count = 0;
        source.last_error = None;

        if !new_items.is_empty() {
            tracing::info!(
                url = %source.url,
                new_items = new_items.len(),
                delivered = delivered,
                "Source checked"
            );
        }

        SourceOutcome {
            source,
            new_items: new_items.len(),
            delivered,
            failed: false,
        }
    }

    async fn fetch_items(&self, url: &str) -> Result<Vec<Item>, CheckError> {
        let text = self.fetcher.fetch_text(url).await?;
        let parsed = parse_feed(&text, self.max_parsed_items)?;
        if parsed.skipped > 0 {
            tracing::debug!(url = %url, skipped = parsed.skipped, "Skipped unusable entries");
        }
        Ok(parsed.items)
    }
}

fn failed(mut source: Source, error: CheckError) -> SourceOutcome {
    source.last_checked_at = Some(Utc::now());
    source.error_count = source.error_count.saturating_add(1);
    source.last_error = Some(error.to_string());
    SourceOutcome {
        source,
        new_items: 0,
        delivered: 0,
        failed: true,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN: &str = "123456:ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghi";

    fn rss(entries: &[(&str, &str)]) -> String {
        let items: String = entries
            .iter()
            .map(|(guid, title)| {
                format!(
                    "<item><title>{title}</title><link>https://ex.com/{guid}</link><guid>{guid}</guid></item>"
                )
            })
            .collect();
        format!("<rss><channel><title>Blog</title>{items}</channel></rss>")
    }

    async fn pipeline(server: &MockServer) -> Pipeline {
        let config = Config {
            telegram_api_url: server.uri(),
            telegraph_api_url: server.uri(),
            allow_private_hosts: true,
            inter_message_delay_ms: 0,
            delivery_base_delay_ms: 0,
            ..Config::default()
        };
        let db = Database::open(":memory:").await.unwrap();
        Pipeline::new(&config, db).unwrap()
    }

    async fn mount_feed(server: &MockServer, route: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    async fn mount_telegram(server: &MockServer, status: u16) {
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/sendMessage")))
            .respond_with(ResponseTemplate::new(status).set_body_string(r#"{"ok":true}"#))
            .mount(server)
            .await;
    }

    fn delivery() -> DeliveryConfig {
        DeliveryConfig::new(TOKEN, "-100200").unwrap()
    }

    #[tokio::test]
    async fn test_run_skips_without_delivery_config() {
        let server = MockServer::start().await;
        let pipeline = pipeline(&server).await;
        pipeline.db.save_sources(&[Source::new("https://ex.com/feed", "Blog")]).await.unwrap();

        let outcome = pipeline.run().await.unwrap();
        assert_eq!(outcome, RunOutcome::Skipped(SkipReason::NoDeliveryConfig));
        assert_eq!(pipeline.db.load_stats().await.unwrap().total_runs, 0);
    }

    #[tokio::test]
    async fn test_run_skips_without_sources() {
        let server = MockServer::start().await;
        let pipeline = pipeline(&server).await;
        pipeline.db.save_delivery_config(&delivery()).await.unwrap();

        let outcome = pipeline.run().await.unwrap();
        assert_eq!(outcome, RunOutcome::Skipped(SkipReason::NoSources));
    }

    #[tokio::test]
    async fn test_source_updated_after_delivery() {
        let server = MockServer::start().await;
        mount_feed(&server, "/feed", rss(&[("a1", "Hello")])).await;
        mount_telegram(&server, 200).await;
        let pipeline = pipeline(&server).await;

        let source = Source::new(format!("{}/feed", server.uri()), "Blog");
        let summary = pipeline
            .check_sources(vec![source], &delivery(), &EnrichmentConfig::default())
            .await;

        assert_eq!(
            summary.report,
            RunReport {
                processed: 1,
                new_items: 1,
                delivered: 1,
                errors: 0
            }
        );
        let updated = &summary.updated_sources[0];
        assert_eq!(updated.recent_items.len(), 1);
        assert_eq!(updated.recent_items[0].guid, "a1");
        assert_eq!(updated.error_count, 0);
        assert!(updated.last_checked_at.is_some());
    }

    #[tokio::test]
    async fn test_fetch_failure_counts_against_source() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let pipeline = pipeline(&server).await;

        let mut source = Source::new(format!("{}/broken", server.uri()), "Broken");
        source.error_count = 2;
        let summary = pipeline
            .check_sources(vec![source], &delivery(), &EnrichmentConfig::default())
            .await;

        let updated = &summary.updated_sources[0];
        assert_eq!(updated.error_count, 3);
        assert_eq!(updated.last_error.as_deref(), Some("HTTP error: status 500"));
        assert_eq!(summary.report.errors, 1);
    }

    #[tokio::test]
    async fn test_not_a_feed_counts_as_error() {
        let server = MockServer::start().await;
        mount_feed(&server, "/page", "<html><body>Hi</body></html>".to_string()).await;
        let pipeline = pipeline(&server).await;

        let source = Source::new(format!("{}/page", server.uri()), "Page");
        let summary = pipeline
            .check_sources(vec![source], &delivery(), &EnrichmentConfig::default())
            .await;
        assert_eq!(summary.updated_sources[0].error_count, 1);
    }

    #[tokio::test]
    async fn test_transient_delivery_failure_is_retried_next_run() {
        let server = MockServer::start().await;
        mount_feed(&server, "/feed", rss(&[("a1", "Hello")])).await;
        mount_telegram(&server, 502).await;
        let pipeline = pipeline(&server).await;

        let source = Source::new(format!("{}/feed", server.uri()), "Blog");
        let summary = pipeline
            .check_sources(vec![source], &delivery(), &EnrichmentConfig::default())
            .await;

        assert_eq!(summary.report.new_items, 1);
        assert_eq!(summary.report.delivered, 0);
        assert!(summary.updated_sources[0].recent_items.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_delivery_is_not_retried() {
        let server = MockServer::start().await;
        mount_feed(&server, "/feed", rss(&[("a1", "Hello")])).await;
        mount_telegram(&server, 400).await;
        let pipeline = pipeline(&server).await;

        let source = Source::new(format!("{}/feed", server.uri()), "Blog");
        let summary = pipeline
            .check_sources(vec![source], &delivery(), &EnrichmentConfig::default())
            .await;

        assert_eq!(summary.report.delivered, 0);
        assert_eq!(summary.updated_sources[0].recent_items.len(), 1);
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
    }
}
