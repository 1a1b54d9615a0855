use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum StorageError {
    /// Another process holds a lock on the database file
    #[error("Database is locked by another process")]
    Locked,

    #[error("Database migration failed: {0}")]
    Migration(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to encode record: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Maps SQLITE_BUSY / SQLITE_LOCKED style failures to [`StorageError::Locked`].
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let message = err.to_string().to_lowercase();
        if message.contains("database is locked")
            || message.contains("database table is locked")
            || message.contains("sqlite_busy")
            || message.contains("sqlite_locked")
        {
            return StorageError::Locked;
        }
        StorageError::Database(err)
    }
}

// ============================================================================
// Item
// ============================================================================

/// One feed entry, normalized.
///
/// `guid` is the canonical identity; `content_hash` covers `title + link` and
/// catches feeds whose ids are unstable or missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub title: String,
    pub link: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    pub guid: String,
    pub content_hash: String,
}

impl Item {
    /// Builds an item, deriving `guid` (explicit id, else link, else hash)
    /// and `content_hash`.
    pub fn new(
        title: String,
        link: String,
        description: String,
        published_at: Option<DateTime<Utc>>,
        explicit_guid: Option<String>,
    ) -> Self {
        let content_hash = content_hash(&title, &link);
        let guid = explicit_guid
            .map(|g| g.trim().to_owned())
            .filter(|g| !g.is_empty())
            .or_else(|| Some(link.clone()).filter(|l| !l.is_empty()))
            .unwrap_or_else(|| content_hash.clone());

        Self {
            title,
            link,
            description,
            published_at,
            guid,
            content_hash,
        }
    }
}

/// Hex prefix of SHA-256 over `title|link`.
pub fn content_hash(title: &str, link: &str) -> String {
    let digest = Sha256::digest(format!("{title}|{link}").as_bytes());
    digest
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect()
}

// ============================================================================
// Source
// ============================================================================

/// One configured feed subscription plus its de-duplication memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub url: String,
    #[serde(rename = "name")]
    pub display_name: String,
    pub added_at: DateTime<Utc>,
    #[serde(default, rename = "lastCheck")]
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Most-recent-first, capped; the only record of what was already sent.
    #[serde(default, rename = "lastItems")]
    pub recent_items: Vec<Item>,
    #[serde(default)]
    pub error_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Source {
    pub fn new(url: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            display_name: display_name.into(),
            added_at: Utc::now(),
            last_checked_at: None,
            recent_items: Vec::new(),
            error_count: 0,
            last_error: None,
        }
    }

    pub fn status(&self) -> SourceStatus {
        if self.error_count == 0 {
            SourceStatus::Active
        } else {
            SourceStatus::Error
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Active,
    Error,
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceStatus::Active => f.write_str("active"),
            SourceStatus::Error => f.write_str("error"),
        }
    }
}

// ============================================================================
// Stats
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Stats {
    #[serde(rename = "lastRun")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(rename = "totalMessages")]
    pub total_messages_sent: u64,
    pub total_runs: u64,
}
