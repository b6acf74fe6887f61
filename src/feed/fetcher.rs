use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

use super::parser::{parse_feed, FetchedFeed};

const MAX_RETRIES: u32 = 3;
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Errors that can occur while fetching a feed.
///
/// These cover the full lifecycle of a fetch: network issues, HTTP errors,
/// oversized or truncated bodies and parse failures.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the 30-second timeout
    #[error("Request timed out")]
    Timeout,
    /// Body could not be parsed as RSS, Atom or JSON Feed
    #[error("Parse error: {0}")]
    Parse(String),
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Source of feed documents. One call is one fetch of one URL.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedFeed, FetchError>;
}

/// Feed source backed by `reqwest` and `feed-rs`.
///
/// - Each request has a 30-second timeout
/// - HTTP 429 and 5xx trigger exponential backoff with up to 3 retries
/// - Truncated bodies are retried the same way
/// - Response bodies are limited to 10MB
#[derive(Debug, Clone)]
pub struct HttpFeedSource {
    client: reqwest::Client,
    backoff_base: Duration,
}

impl HttpFeedSource {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("feedpump/", env!("CARGO_PKG_VERSION")))
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }

    /// Base of the retry delay; attempt `n` waits `base * 2^n`.
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    fn backoff(&self, retry_count: u32) -> Duration {
        self.backoff_base * 2u32.pow(retry_count)
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut retry_count = 0;

        loop {
            let response = tokio::time::timeout(REQUEST_TIMEOUT, self.client.get(url).send())
                .await
                .map_err(|_| FetchError::Timeout)?
                .map_err(FetchError::Network)?;

            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if retry_count >= MAX_RETRIES {
                    return Err(FetchError::RateLimited(MAX_RETRIES));
                }

                let delay = self.backoff(retry_count);
                tracing::warn!(
                    feed = %url,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if response.status().is_server_error() {
                if retry_count >= MAX_RETRIES {
                    return Err(FetchError::HttpStatus(response.status().as_u16()));
                }

                let delay = self.backoff(retry_count);
                tracing::warn!(
                    feed = %url,
                    status = %response.status(),
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Server error, retrying after delay"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            // 4xx errors fail immediately
            if !response.status().is_success() {
                return Err(FetchError::HttpStatus(response.status().as_u16()));
            }

            match read_limited_bytes(response, MAX_FEED_SIZE).await {
                Ok(bytes) => return Ok(bytes),
                Err(FetchError::IncompleteResponse { expected, received }) => {
                    if retry_count >= MAX_RETRIES {
                        return Err(FetchError::IncompleteResponse { expected, received });
                    }

                    let delay = self.backoff(retry_count);
                    tracing::debug!(
                        feed = %url,
                        expected = expected,
                        received = received,
                        attempt = retry_count + 1,
                        "Retrying incomplete download"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, url: &str) -> Result<FetchedFeed, FetchError> {
        let bytes = self.fetch_bytes(url).await?;
        let feed =
            parse_feed(&bytes, url, Utc::now()).map_err(|e| FetchError::Parse(e.to_string()))?;
        tracing::debug!(
            feed = %url,
            items = feed.items.len(),
            refresh = %feed.refresh,
            "Fetched feed"
        );
        Ok(feed)
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
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
