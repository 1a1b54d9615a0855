//! Configuration file parser for ~/.config/feedpush/config.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as warnings, since they are
//! usually typos. Every component receives the values it needs from this
//! struct at construction time; nothing reads the environment later on.
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::util::RetryPolicy;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Unknown timezone: {0}")]
    Timezone(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

// ============================================================================
// Configuration Struct
// ============================================================================

/// Top-level service configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite file backing the key/value store. `:memory:` is accepted.
    pub database_path: String,

    /// Minutes between scheduled checks in `watch` mode.
    pub check_interval_minutes: u64,

    /// Sources checked concurrently within one batch.
    pub max_concurrent_checks: usize,

    /// Upper bound on configured sources.
    pub max_sources: usize,

    pub fetch_timeout_secs: u64,

    /// Feed fetch attempts per check. 1 means a failed fetch simply counts
    /// as a source error for this cycle.
    pub fetch_attempts: u32,

    pub max_feed_bytes: usize,

    /// Entries taken from one feed document.
    pub max_parsed_items: usize,

    /// Size of the per-source de-duplication memory.
    pub recent_items_cap: usize,

    pub delivery_timeout_secs: u64,
    pub delivery_attempts: u32,
    pub delivery_base_delay_ms: u64,

    /// Pause between two messages sent for the same source.
    pub inter_message_delay_ms: u64,

    pub article_timeout_secs: u64,

    /// IANA zone used to render publish dates in messages.
    pub timezone: String,

    pub telegram_api_url: String,
    pub telegraph_api_url: String,
    pub user_agent: String,

    /// Permit loopback/private hosts for feeds and article pages.
    pub allow_private_hosts: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "feedpush.db".to_string(),
            check_interval_minutes: 5,
            max_concurrent_checks: 5,
            max_sources: 50,
            fetch_timeout_secs: 30,
            fetch_attempts: 1,
            max_feed_bytes: 5 * 1024 * 1024,
            max_parsed_items: 20,
            recent_items_cap: 10,
            delivery_timeout_secs: 15,
            delivery_attempts: 3,
            delivery_base_delay_ms: 1000,
            inter_message_delay_ms: 1000,
            article_timeout_secs: 15,
            timezone: "Asia/Shanghai".to_string(),
            telegram_api_url: "https://api.telegram.org".to_string(),
            telegraph_api_url: "https://api.telegra.ph".to_string(),
            user_agent: format!("feedpush/{}", env!("CARGO_PKG_VERSION")),
            allow_private_hosts: false,
        }
    }
}

const KNOWN_KEYS: &[&str] = &[
    "database_path",
    "check_interval_minutes",
    "max_concurrent_checks",
    "max_sources",
    "fetch_timeout_secs",
    "fetch_attempts",
    "max_feed_bytes",
    "max_parsed_items",
    "recent_items_cap",
    "delivery_timeout_secs",
    "delivery_attempts",
    "delivery_base_delay_ms",
    "inter_message_delay_ms",
    "article_timeout_secs",
    "timezone",
    "telegram_api_url",
    "telegraph_api_url",
    "user_agent",
    "allow_private_hosts",
];

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown timezone → `Err(ConfigError::Timezone)`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File deleted between metadata and read
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        config.tz()?;
        tracing::info!(
            database = %config.database_path,
            interval_minutes = config.check_interval_minutes,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Timezone for rendering publish dates.
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::Timezone(self.timezone.clone()))
    }

    /// Shared HTTP client carrying the service's `User-Agent`.
    ///
    /// Per-call deadlines are applied by each component, so the client itself
    /// only bounds connection setup.
    pub fn http_client(&self) -> Result<reqwest::Client, ConfigError> {
        let client = reqwest::Client::builder()
            .user_agent(self.user_agent.as_str())
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(client)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }

    pub fn article_timeout(&self) -> Duration {
        Duration::from_secs(self.article_timeout_secs)
    }

    pub fn inter_message_delay(&self) -> Duration {
        Duration::from_millis(self.inter_message_delay_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_minutes.max(1) * 60)
    }

    pub fn fetch_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.fetch_attempts,
            Duration::from_millis(self.delivery_base_delay_ms),
        )
    }

    pub fn delivery_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.delivery_attempts,
            Duration::from_millis(self.delivery_base_delay_ms),
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
