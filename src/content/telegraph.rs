use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Deserialize, Serialize, Serializer};
use std::time::Duration;

use super::sanitize::Node;
use super::EnrichError;
use crate::config::Config;

/// Longest page title Telegraph accepts.
pub const MAX_TITLE_CHARS: usize = 256;

/// Serialized content larger than this is not submitted.
pub const MAX_CONTENT_BYTES: usize = 64 * 1024;

// ============================================================================
// Account
// ============================================================================

/// A Telegraph account credential.
#[derive(Deserialize)]
#[serde(from = "StoredAccount")]
pub struct TelegraphAccount {
    pub short_name: String,
    pub author_name: Option<String>,
    access_token: SecretString,
}

impl TelegraphAccount {
    pub fn new(short_name: String, author_name: Option<String>, access_token: String) -> Self {
        Self {
            short_name,
            author_name,
            access_token: SecretString::from(access_token),
        }
    }

    fn access_token(&self) -> &str {
        self.access_token.expose_secret()
    }
}

impl std::fmt::Debug for TelegraphAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegraphAccount")
            .field("short_name", &self.short_name)
            .field("author_name", &self.author_name)
            .field("access_token", &"***")
            .finish()
    }
}

/// Wire and storage shape; also what `createAccount` returns.
#[derive(Deserialize)]
struct StoredAccount {
    short_name: String,
    #[serde(default)]
    author_name: Option<String>,
    access_token: String,
}

#[derive(Serialize)]
struct StoredAccountRef<'a> {
    short_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    author_name: Option<&'a str>,
    access_token: &'a str,
}

impl From<StoredAccount> for TelegraphAccount {
    fn from(stored: StoredAccount) -> Self {
        TelegraphAccount::new(stored.short_name, stored.author_name, stored.access_token)
    }
}

impl Serialize for TelegraphAccount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        StoredAccountRef {
            short_name: &self.short_name,
            author_name: self.author_name.as_deref(),
            access_token: self.access_token(),
        }
        .serialize(serializer)
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Serialize)]
struct CreateAccountRequest<'a> {
    short_name: &'a str,
    author_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    author_url: Option<&'a str>,
}

#[derive(Serialize)]
struct CreatePageRequest<'a> {
    access_token: &'a str,
    title: &'a str,
    author_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    author_url: Option<&'a str>,
    content: &'a [Node],
    return_content: bool,
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct Page {
    pub path: String,
    pub url: String,
}

/// Metadata for one page submission.
#[derive(Debug, Clone, Copy)]
pub struct PageMeta<'a> {
    pub title: &'a str,
    pub author_name: &'a str,
    pub author_url: Option<&'a str>,
}

// ============================================================================
// Client
// ============================================================================

/// Minimal Telegraph API client: `createAccount` and `createPage`.
#[derive(Clone)]
pub struct TelegraphClient {
    client: reqwest::Client,
    api_base: String,
    timeout: Duration,
}

impl TelegraphClient {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            api_base: config.telegraph_api_url.trim_end_matches('/').to_string(),
            timeout: config.article_timeout(),
        }
    }

    pub async fn create_account(
        &self,
        short_name: &str,
        author_name: &str,
        author_url: Option<&str>,
    ) -> Result<TelegraphAccount, EnrichError> {
        let request = CreateAccountRequest {
            short_name,
            author_name,
            author_url,
        };
        let stored: StoredAccount = self.call("createAccount", &request).await?;
        Ok(stored.into())
    }

    /// Publishes `content` and returns the page.
    ///
    /// The title is cut to [`MAX_TITLE_CHARS`]; content serializing to more
    /// than [`MAX_CONTENT_BYTES`] is rejected before any request is made.
    pub async fn create_page(
        &self,
        account: &TelegraphAccount,
        meta: PageMeta<'_>,
        content: &[Node],
    ) -> Result<Page, EnrichError> {
        let size = serde_json::to_vec(content)?.len();
        if size > MAX_CONTENT_BYTES {
            return Err(EnrichError::ContentTooLarge { size });
        }

        let title = crate::util::truncate_chars(meta.title, MAX_TITLE_CHARS);
        let request = CreatePageRequest {
            access_token: account.access_token(),
            title: &title,
            author_name: meta.author_name,
            author_url: meta.author_url,
            content,
            return_content: false,
        };
        self.call("createPage", &request).await
    }

    async fn call<B: Serialize, T: DeserializeOwned>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<T, EnrichError> {
        let body = serde_json::to_vec(body)?;
        let url = format!("{}/{}", self.api_base, method);

        let send = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send();
        let response = match tokio::time::timeout(self.timeout, send).await {
            Ok(result) => result.map_err(|e| EnrichError::Network(e.without_url()))?,
            Err(_) => return Err(EnrichError::Timeout(self.timeout)),
        };

        let status = response.status();
        if !status.is_success() {
            return Err(EnrichError::HttpStatus(status.as_u16()));
        }

        let bytes = match tokio::time::timeout(self.timeout, response.bytes()).await {
            Ok(result) => result.map_err(|e| EnrichError::Network(e.without_url()))?,
            Err(_) => return Err(EnrichError::Timeout(self.timeout)),
        };
        let parsed: ApiResponse<T> = serde_json::from_slice(&bytes)?;

        match (parsed.ok, parsed.result) {
            (true, Some(result)) => Ok(result),
            (_, _) => Err(EnrichError::Api(
                parsed
                    .error
                    .unwrap_or_else(|| format!("{method} returned no result")),
            )),
        }
    }
}
