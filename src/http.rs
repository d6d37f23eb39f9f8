//! Run-scoped HTTP client
//!
//! One [`HttpClient`] is built at the start of a run and cloned into every task. It
//! carries the shared connection pool, the user agent and the global connection limit:
//! feed pages and media files draw from the same semaphore, so the number of open
//! requests never exceeds `max_concurrent_downloads`.

use crate::config::{Config, RetryConfig};
use crate::error::{DownloadError, Error, Result};
use crate::retry::with_retry;
use crate::store::PendingWrite;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Maximum number of redirects followed per request
const MAX_REDIRECTS: usize = 10;

/// A feed document as received
#[derive(Clone, Debug)]
pub struct FetchedPage {
    /// URL after redirects, used to resolve relative links
    pub url: String,
    /// Response body
    pub body: Vec<u8>,
}

/// HTTP client shared by every request of a run
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    connection_limit: Arc<Semaphore>,
    retry: RetryConfig,
    feed_timeout: Duration,
    idle_timeout: Duration,
}

impl HttpClient {
    /// Build the client from the run configuration
    ///
    /// # Errors
    /// Returns error if the TLS backend cannot be initialized
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.connect_timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            connection_limit: Arc::new(Semaphore::new(config.max_concurrent_downloads)),
            retry: config.retry.clone(),
            feed_timeout: config.feed_timeout,
            idle_timeout: config.idle_timeout,
        })
    }

    /// Retry policy applied to every request
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Fetch a whole feed document, retrying transient failures
    pub async fn fetch_page(&self, url: &str) -> Result<FetchedPage> {
        with_retry(&self.retry, || async move {
            let _permit = self.acquire().await?;
            tracing::debug!(url, "Fetching feed page");

            let response = self
                .client
                .get(url)
                .timeout(self.feed_timeout)
                .send()
                .await?;
            let response = check_status(response, url)?;
            let final_url = response.url().to_string();
            let body = response.bytes().await?;

            Ok(FetchedPage {
                url: final_url,
                body: body.to_vec(),
            })
        })
        .await
    }

    /// Start a single download attempt
    ///
    /// The returned stream holds a connection permit until it is dropped. No retry
    /// happens here: a retry has to restart the write as well, which is the caller's job.
    /// Waiting longer than the idle timeout for the headers or for any later chunk fails
    /// with [`DownloadError::Stalled`].
    pub async fn open(&self, url: &str) -> Result<ResponseStream> {
        let permit = self.acquire().await?;
        let response = tokio::time::timeout(self.idle_timeout, self.client.get(url).send())
            .await
            .map_err(|_| stalled(url, self.idle_timeout))??;
        let response = check_status(response, url)?;
        Ok(ResponseStream {
            response,
            url: url.to_string(),
            idle_timeout: self.idle_timeout,
            _permit: permit,
        })
    }

    async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.connection_limit)
            .acquire_owned()
            .await
            .map_err(|_| Error::Other("connection limit closed".to_string()))
    }
}

/// Response body being streamed to disk
pub struct ResponseStream {
    response: reqwest::Response,
    url: String,
    idle_timeout: Duration,
    _permit: OwnedSemaphorePermit,
}

impl ResponseStream {
    /// Length announced by the server, if any
    pub fn content_length(&self) -> Option<u64> {
        self.response.content_length()
    }

    /// Copy the remaining body into `sink`, returning the number of bytes written
    pub async fn copy_to(mut self, sink: &mut PendingWrite) -> Result<u64> {
        let mut written = 0u64;
        loop {
            let chunk = tokio::time::timeout(self.idle_timeout, self.response.chunk())
                .await
                .map_err(|_| stalled(&self.url, self.idle_timeout))??;
            let Some(chunk) = chunk else {
                return Ok(written);
            };
            sink.write(&chunk).await?;
            written += chunk.len() as u64;
        }
    }
}

fn stalled(url: &str, idle: Duration) -> Error {
    DownloadError::Stalled {
        url: url.to_string(),
        idle,
    }
    .into()
}

fn check_status(response: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Http {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }
    Ok(response)
}
