use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

use super::format::cap_message;
use crate::config::Config;
use crate::util::{RetryHint, RetryPolicy, Retryable};

static BOT_TOKEN_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+:[A-Za-z0-9_-]{35}$").expect("static regex"));

static CHAT_ID_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?\d+$").expect("static regex"));

/// `retry_after` assumed when a 429 response does not carry one.
const DEFAULT_RETRY_AFTER_SECS: u64 = 1;

// ============================================================================
// Delivery Configuration
// ============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Bot token must look like <digits>:<35 characters>")]
    InvalidBotToken,
    #[error("Chat id must be a (possibly negative) integer")]
    InvalidChatId,
    #[error("Author URL must be an http(s) URL")]
    InvalidAuthorUrl,
}

/// Destination chat plus the bot credential used to reach it.
///
/// The token is only exposed to build the request path; `Debug` and logs
/// show [`DeliveryConfig::masked_token`].
#[derive(Deserialize)]
#[serde(try_from = "StoredDeliveryConfig")]
pub struct DeliveryConfig {
    bot_token: SecretString,
    chat_id: String,
}

impl DeliveryConfig {
    /// Validates and trims both values.
    pub fn new(bot_token: &str, chat_id: &str) -> Result<Self, ValidationError> {
        let bot_token = bot_token.trim();
        let chat_id = chat_id.trim();

        if !BOT_TOKEN_SHAPE.is_match(bot_token) {
            return Err(ValidationError::InvalidBotToken);
        }
        if !CHAT_ID_SHAPE.is_match(chat_id) {
            return Err(ValidationError::InvalidChatId);
        }

        Ok(Self {
            bot_token: SecretString::from(bot_token.to_owned()),
            chat_id: chat_id.to_owned(),
        })
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    /// `1234567:***wxyz` form of the token, safe for logs and status output.
    pub fn masked_token(&self) -> String {
        mask_token(self.bot_token.expose_secret())
    }

    fn send_message_path(&self) -> String {
        format!("bot{}/sendMessage", self.bot_token.expose_secret())
    }
}

impl std::fmt::Debug for DeliveryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryConfig")
            .field("bot_token", &self.masked_token())
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredDeliveryConfig {
    bot_token: String,
    chat_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StoredDeliveryConfigRef<'a> {
    bot_token: &'a str,
    chat_id: &'a str,
}

impl TryFrom<StoredDeliveryConfig> for DeliveryConfig {
    type Error = ValidationError;

    fn try_from(stored: StoredDeliveryConfig) -> Result<Self, Self::Error> {
        DeliveryConfig::new(&stored.bot_token, &stored.chat_id)
    }
}

impl Serialize for DeliveryConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        StoredDeliveryConfigRef {
            bot_token: self.bot_token.expose_secret(),
            chat_id: &self.chat_id,
        }
        .serialize(serializer)
    }
}

/// Keeps the bot id and the last four characters of the secret part.
pub fn mask_token(token: &str) -> String {
    match token.split_once(':') {
        Some((id, secret)) => {
            let chars: Vec<char> = secret.chars().collect();
            let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
            format!("{id}:***{tail}")
        }
        None => "***".to_string(),
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Delivery failures. None of the messages carry the bot token.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Telegram request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Rate limited by Telegram, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("Telegram rejected the message (HTTP {status}): {description}")]
    ClientError { status: u16, description: String },

    #[error("Telegram server error (HTTP {status}): {description}")]
    ServerError { status: u16, description: String },

    /// Transport failure; the request URL is stripped before wrapping.
    #[error("Request to Telegram failed: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Failed to encode Telegram request: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DeliveryError {
    pub fn is_retryable(&self) -> bool {
        self.retry_hint() != RetryHint::Never
    }
}

impl Retryable for DeliveryError {
    fn retry_hint(&self) -> RetryHint {
        match self {
            DeliveryError::RateLimited { retry_after } => {
                RetryHint::After(Duration::from_secs(*retry_after))
            }
            DeliveryError::Timeout(_)
            | DeliveryError::ServerError { .. }
            | DeliveryError::Network(_) => RetryHint::Backoff,
            DeliveryError::ClientError { .. } | DeliveryError::Serialization(_) => {
                RetryHint::Never
            }
        }
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

// ============================================================================
// Client
// ============================================================================

/// Sends messages through the Telegram Bot API with retry and backoff.
#[derive(Clone)]
pub struct TelegramClient {
    client: reqwest::Client,
    api_base: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl TelegramClient {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            api_base: config.telegram_api_url.trim_end_matches('/').to_string(),
            timeout: config.delivery_timeout(),
            retry: config.delivery_retry(),
        }
    }

    /// Delivers `text` as a MarkdownV2 message.
    ///
    /// 429 waits the server's `retry_after`; 5xx, timeouts and transport
    /// errors back off linearly; other 4xx fail at once. Every response
    /// counts toward the attempt budget, and the last error is returned once
    /// it is spent.
    pub async fn send_message(
        &self,
        config: &DeliveryConfig,
        text: &str,
    ) -> Result<(), DeliveryError> {
        let text = cap_message(text);
        self.retry
            .run("telegram_send", |attempt| {
                let text = &text;
                async move {
                    tracing::debug!(
                        chat_id = %config.chat_id(),
                        attempt = attempt,
                        chars = text.chars().count(),
                        "Sending Telegram message"
                    );
                    match tokio::time::timeout(self.timeout, self.send_once(config, text)).await {
                        Ok(result) => result,
                        Err(_) => Err(DeliveryError::Timeout(self.timeout)),
                    }
                }
            })
            .await
    }

    async fn send_once(&self, config: &DeliveryConfig, text: &str) -> Result<(), DeliveryError> {
        let body = serde_json::to_vec(&SendMessageRequest {
            chat_id: config.chat_id(),
            text,
            parse_mode: "MarkdownV2",
            disable_web_page_preview: true,
        })?;

        let url = format!("{}/{}", self.api_base, config.send_message_path());
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| DeliveryError::Network(e.without_url()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        // Error bodies are small JSON documents; an unreadable one is not fatal
        let api: ApiResponse = match response.bytes().await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => ApiResponse::default(),
        };
        let description = api
            .description
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());

        let code = status.as_u16();
        if code == 429 {
            let retry_after = api
                .parameters
                .and_then(|p| p.retry_after)
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            tracing::warn!(retry_after = retry_after, "Telegram rate limit hit");
            return Err(DeliveryError::RateLimited { retry_after });
        }
        if status.is_server_error() {
            return Err(DeliveryError::ServerError {
                status: code,
                description,
            });
        }
        Err(DeliveryError::ClientError {
            status: code,
            description,
        })
    }
}
