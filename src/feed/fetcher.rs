use futures::StreamExt;
use reqwest::header::ACCEPT;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;
use crate::util::{validate_url, RetryHint, RetryPolicy, Retryable, UrlValidationError};

/// `Accept` header sent with feed requests; feed types first, anything as a fallback.
const FEED_ACCEPT: &str =
    "application/rss+xml, application/atom+xml, application/xml;q=0.9, text/xml;q=0.9, */*;q=0.8";

/// Errors that can occur while retrieving a feed document.
#[derive(Debug, Error)]
pub enum FetchError {
    /// URL failed validation (scheme, private host, length)
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[source] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request plus body read exceeded the wall-clock budget
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Response body exceeded the configured size limit
    #[error("Response too large (limit {limit} bytes)")]
    ResponseTooLarge { limit: usize },
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        self.retry_hint() != RetryHint::Never
    }
}

impl Retryable for FetchError {
    fn retry_hint(&self) -> RetryHint {
        match self {
            FetchError::Timeout(_)
            | FetchError::Network(_)
            | FetchError::IncompleteResponse { .. } => RetryHint::Backoff,
            FetchError::HttpStatus(status) if *status == 429 || *status >= 500 => {
                RetryHint::Backoff
            }
            _ => RetryHint::Never,
        }
    }
}

/// Retrieves raw feed documents over HTTP with time and size bounds.
#[derive(Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_bytes: usize,
    retry: RetryPolicy,
    allow_private_hosts: bool,
}

impl FeedFetcher {
    pub fn new(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            timeout: config.fetch_timeout(),
            max_bytes: config.max_feed_bytes,
            retry: config.fetch_retry(),
            allow_private_hosts: config.allow_private_hosts,
        }
    }

    /// Fetch `url` and return the body bytes.
    ///
    /// Every attempt is bounded by the fetch timeout (covering the body read)
    /// and the byte cap. With the default single-attempt policy a failure is
    /// returned as-is and the caller records it against the source.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let url = validate_url(url, self.allow_private_hosts)?;

        self.retry
            .run("feed_fetch", |_| {
                let url = url.clone();
                async move {
                    match tokio::time::timeout(self.timeout, self.fetch_once(url)).await {
                        Ok(result) => result,
                        Err(_) => Err(FetchError::Timeout(self.timeout)),
                    }
                }
            })
            .await
    }

    /// Fetch `url` and decode the body as UTF-8, replacing invalid sequences.
    pub async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let bytes = self.fetch(url).await?;
        Ok(match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        })
    }

    async fn fetch_once(&self, url: url::Url) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, FEED_ACCEPT)
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

/// Reads a response body, failing as soon as it grows past `limit`.
pub(crate) async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: an honest Content-Length tells us up front
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge { limit });
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge { limit });
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <item><guid>1</guid><title>Test</title></item>
</channel></rss>"#;

    fn test_fetcher(config: Config) -> FeedFetcher {
        FeedFetcher::new(reqwest::Client::new(), &config)
    }

    fn local_config() -> Config {
        Config {
            allow_private_hosts: true,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_fetch_success_sends_feed_accept_header() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .and(header("accept", FEED_ACCEPT))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .expect(1)
            .mount(&mock_server)
            .await;

        let fetcher = test_fetcher(local_config());
        let text = fetcher
            .fetch_text(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap();
        assert!(text.contains("<rss"));
    }

    #[tokio::test]
    async fn test_fetch_404_is_terminal() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let err = test_fetcher(local_config())
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus(404)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_500_not_retried_by_default() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&mock_server)
            .await;

        let err = test_fetcher(local_config())
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus(500)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_503_retried_when_configured() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&mock_server)
            .await;

        let config = Config {
            fetch_attempts: 2,
            delivery_base_delay_ms: 10,
            ..local_config()
        };
        let bytes = test_fetcher(config)
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(bytes, VALID_RSS.as_bytes());
    }

    #[tokio::test]
    async fn test_fetch_rejects_oversized_body() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(2048)))
            .mount(&mock_server)
            .await;

        let config = Config {
            max_feed_bytes: 1024,
            ..local_config()
        };
        let err = test_fetcher(config)
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::ResponseTooLarge { limit: 1024 }));
    }

    #[tokio::test]
    async fn test_fetch_times_out() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&mock_server)
            .await;

        let config = Config {
            fetch_timeout_secs: 1,
            ..local_config()
        };
        let err = test_fetcher(config)
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_fetch_rejects_private_host_by_default() {
        let err = test_fetcher(Config::default())
            .fetch("http://127.0.0.1:9/feed")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
    }
}
