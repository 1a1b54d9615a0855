use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};

use super::schema::Database;
use super::types::{Source, Stats, StorageError};
use crate::content::{EnrichmentConfig, TelegraphAccount};
use crate::delivery::DeliveryConfig;

pub const SOURCES_KEY: &str = "rss_sources";
pub const DELIVERY_CONFIG_KEY: &str = "telegram_config";
pub const ENRICHMENT_CONFIG_KEY: &str = "telegraph_config";
pub const STATS_KEY: &str = "stats";
pub const TELEGRAPH_ACCOUNT_KEY: &str = "telegraph_account";

impl Database {
    // ========================================================================
    // Typed JSON Records
    // ========================================================================

    /// Read and decode a JSON record.
    ///
    /// A record that fails to decode is logged and reported as absent.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let Some(raw) = self.get(key).await? else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Ignoring corrupt record");
                Ok(None)
            }
        }
    }

    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), StorageError> {
        let raw = serde_json::to_string(value)?;
        self.put(key, &raw, None).await
    }

    // ========================================================================
    // Sources
    // ========================================================================

    pub async fn load_sources(&self) -> Result<Vec<Source>, StorageError> {
        Ok(self.get_json(SOURCES_KEY).await?.unwrap_or_default())
    }

    pub async fn save_sources(&self, sources: &[Source]) -> Result<(), StorageError> {
        self.put_json(SOURCES_KEY, sources).await
    }

    /// Write back sources updated by a check run.
    ///
    /// The stored collection is re-read first: sources removed while the run
    /// was in flight stay removed, sources added meanwhile are kept, and every
    /// other entry is replaced by its updated counterpart (matched by URL).
    pub async fn merge_checked_sources(&self, updated: Vec<Source>) -> Result<(), StorageError> {
        let current = self.load_sources().await?;
        let mut updated = updated;

        let merged: Vec<Source> = current
            .into_iter()
            .map(|stored| {
                match updated.iter().position(|u| u.url == stored.url) {
                    Some(idx) => updated.swap_remove(idx),
                    None => stored,
                }
            })
            .collect();

        self.save_sources(&merged).await
    }

    // ========================================================================
    // Stats
    // ========================================================================

    pub async fn load_stats(&self) -> Result<Stats, StorageError> {
        Ok(self.get_json(STATS_KEY).await?.unwrap_or_default())
    }

    /// Read-modify-write of the run counters.
    pub async fn record_run(&self, messages_sent: u64) -> Result<Stats, StorageError> {
        let mut stats = self.load_stats().await?;
        stats.last_run_at = Some(Utc::now());
        stats.total_runs += 1;
        stats.total_messages_sent += messages_sent;
        self.put_json(STATS_KEY, &stats).await?;
        Ok(stats)
    }

    // ========================================================================
    // Delivery / Enrichment Configuration
    // ========================================================================

    pub async fn load_delivery_config(&self) -> Result<Option<DeliveryConfig>, StorageError> {
        self.get_json(DELIVERY_CONFIG_KEY).await
    }

    pub async fn save_delivery_config(&self, config: &DeliveryConfig) -> Result<(), StorageError> {
        self.put_json(DELIVERY_CONFIG_KEY, config).await
    }

    pub async fn load_enrichment_config(&self) -> Result<Option<EnrichmentConfig>, StorageError> {
        self.get_json(ENRICHMENT_CONFIG_KEY).await
    }

    pub async fn save_enrichment_config(
        &self,
        config: &EnrichmentConfig,
    ) -> Result<(), StorageError> {
        self.put_json(ENRICHMENT_CONFIG_KEY, config).await
    }

    pub async fn load_telegraph_account(&self) -> Result<Option<TelegraphAccount>, StorageError> {
        self.get_json(TELEGRAPH_ACCOUNT_KEY).await
    }

    pub async fn save_telegraph_account(
        &self,
        account: &TelegraphAccount,
    ) -> Result<(), StorageError> {
        self.put_json(TELEGRAPH_ACCOUNT_KEY, account).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_sources_default_to_empty() {
        let db = test_db().await;
        assert!(db.load_sources().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sources_round_trip() {
        let db = test_db().await;
        let sources = vec![
            Source::new("https://a.example/feed", "A"),
            Source::new("https://b.example/feed", "B"),
        ];
        db.save_sources(&sources).await.unwrap();
        assert_eq!(db.load_sources().await.unwrap(), sources);
    }

    #[tokio::test]
    async fn test_corrupt_sources_read_as_empty() {
        let db = test_db().await;
        db.put(SOURCES_KEY, "{not json", None).await.unwrap();
        assert!(db.load_sources().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_stats_read_as_default() {
        let db = test_db().await;
        db.put(STATS_KEY, "[1,2,3]", None).await.unwrap();
        assert_eq!(db.load_stats().await.unwrap(), Stats::default());
    }

    #[tokio::test]
    async fn test_record_run_accumulates() {
        let db = test_db().await;
        db.record_run(3).await.unwrap();
        let stats = db.record_run(2).await.unwrap();

        assert_eq!(stats.total_runs, 2);
        assert_eq!(stats.total_messages_sent, 5);
        assert!(stats.last_run_at.is_some());
        assert_eq!(db.load_stats().await.unwrap(), stats);
    }

    #[tokio::test]
    async fn test_merge_keeps_added_and_drops_removed_sources() {
        let db = test_db().await;
        let a = Source::new("https://a.example/feed", "A");
        let b = Source::new("https://b.example/feed", "B");
        db.save_sources(&[a.clone(), b.clone()]).await.unwrap();

        // Run snapshot taken here; afterwards B is removed and C is added
        let mut checked_a = a.clone();
        checked_a.error_count = 1;
        let checked_b = b.clone();

        let c = Source::new("https://c.example/feed", "C");
        db.save_sources(&[a.clone(), c.clone()]).await.unwrap();

        db.merge_checked_sources(vec![checked_a.clone(), checked_b])
            .await
            .unwrap();

        assert_eq!(db.load_sources().await.unwrap(), vec![checked_a, c]);
    }
}
