//! HTTP access with typed errors and exponential backoff.
//!
//! Every request outcome is mapped onto [`ArchiveError`]: 404/403/410 are a
//! missing file, 5xx/429 and transport failures are transient and retried,
//! anything else is a non-retryable status error.

use std::future::Future;
use std::time::Duration;

use archive_common::{ArchiveError, ArchiveResult, MatchedRange};
use bytes::Bytes;
use metrics::counter;
use reqwest::{header, Client, Response, StatusCode};
use tracing::{debug, instrument, warn};

/// Retry settings for non-probe requests.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt (doubles each retry)
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent.
    pub async fn run<T, F, Fut>(&self, url: &str, mut op: F) -> ArchiveResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ArchiveResult<T>>,
    {
        let mut attempt = 1;
        let mut delay = self.initial_delay;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        url = %url,
                        error = %e,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Request failed, retrying"
                    );
                    counter!("archiver_http_retries_total").increment(1);

                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, self.max_delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Timeouts for the shared client.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub request_timeout: Duration,
    pub probe_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(120),
            probe_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Shared HTTP client used by every pipeline stage.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    settings: HttpSettings,
    retry: RetryPolicy,
}

impl HttpClient {
    pub fn new(settings: HttpSettings, retry: RetryPolicy) -> ArchiveResult<Self> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .connect_timeout(settings.connect_timeout)
            .pool_max_idle_per_host(8)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| ArchiveError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            settings,
            retry,
        })
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Single HEAD request; no retries.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn probe(&self, url: &str) -> ArchiveResult<()> {
        let response = self
            .client
            .head(url)
            .timeout(self.settings.probe_timeout)
            .send()
            .await
            .map_err(|e| transport_error(url, e))?;

        check_status(url, response.status())
    }

    /// GET a text document, e.g. a side-car index.
    pub async fn get_text(&self, url: &str) -> ArchiveResult<String> {
        self.retry
            .run(url, move || async move {
                let response = self.send_get(url, None).await?;
                response.text().await.map_err(|e| transport_error(url, e))
            })
            .await
    }

    /// GET a JSON document.
    pub async fn get_json(&self, url: &str, query: &[(&str, String)]) -> ArchiveResult<serde_json::Value> {
        self.retry
            .run(url, move || async move {
                let response = self
                    .client
                    .get(url)
                    .query(query)
                    .send()
                    .await
                    .map_err(|e| transport_error(url, e))?;
                check_status(url, response.status())?;
                response
                    .json::<serde_json::Value>()
                    .await
                    .map_err(|e| ArchiveError::Decode(format!("invalid JSON from {}: {}", url, e)))
            })
            .await
    }

    /// GET one byte range; the server must answer 206 Partial Content.
    ///
    /// A 200 is accepted only for an open range starting at byte 0, where the
    /// full body is exactly what was asked for.
    pub async fn get_range(&self, url: &str, range: &MatchedRange) -> ArchiveResult<Bytes> {
        self.retry
            .run(url, move || async move {
                let response = self.send_get(url, Some(range.range_header())).await?;
                let status = response.status();

                let whole_file_ok = status == StatusCode::OK
                    && range.byte_start == 0
                    && range.byte_end.is_none();
                if status != StatusCode::PARTIAL_CONTENT && !whole_file_ok {
                    return Err(ArchiveError::HttpStatus {
                        url: url.to_string(),
                        status: status.as_u16(),
                    });
                }

                let body = response.bytes().await.map_err(|e| transport_error(url, e))?;
                if let Some(expected) = range.expected_len() {
                    if body.len() as u64 != expected {
                        return Err(ArchiveError::TransientNetwork {
                            url: url.to_string(),
                            message: format!(
                                "short range body for {}: expected {} bytes, got {}",
                                range.range_header(),
                                expected,
                                body.len()
                            ),
                        });
                    }
                }
                debug!(url = %url, range = %range.range_header(), bytes = body.len(), "Fetched range");
                Ok(body)
            })
            .await
    }

    /// Single GET of the whole file, returning the response for streaming.
    ///
    /// Not retried here: the caller wraps the whole transfer, body included,
    /// in [`HttpClient::retry_policy`].
    pub async fn get_stream(&self, url: &str) -> ArchiveResult<Response> {
        self.send_get(url, None).await
    }

    async fn send_get(&self, url: &str, range: Option<String>) -> ArchiveResult<Response> {
        let mut request = self.client.get(url);
        if let Some(range) = range {
            request = request.header(header::RANGE, range);
        }
        let response = request.send().await.map_err(|e| transport_error(url, e))?;
        check_status(url, response.status())?;
        Ok(response)
    }
}

/// Map a response status onto the error taxonomy.
pub fn check_status(url: &str, status: StatusCode) -> ArchiveResult<()> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::NOT_FOUND | StatusCode::FORBIDDEN | StatusCode::GONE => {
            Err(ArchiveError::MissingFile(url.to_string()))
        }
        StatusCode::TOO_MANY_REQUESTS => Err(ArchiveError::TransientNetwork {
            url: url.to_string(),
            message: format!("HTTP {}", status),
        }),
        s if s.is_server_error() => Err(ArchiveError::TransientNetwork {
            url: url.to_string(),
            message: format!("HTTP {}", status),
        }),
        s => Err(ArchiveError::HttpStatus {
            url: url.to_string(),
            status: s.as_u16(),
        }),
    }
}

pub fn transport_error(url: &str, e: reqwest::Error) -> ArchiveError {
    ArchiveError::TransientNetwork {
        url: url.to_string(),
        message: e.to_string(),
    }
}
