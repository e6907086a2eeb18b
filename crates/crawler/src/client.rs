use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::{Client as ReqwestClient, Response};
use std::error::Error as StdError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::{CrawlerConfig, FetchError, Result};

const RETRY_AFTER_CAP: Duration = Duration::from_secs(30);

/// Result of a completed fetch. The final URL reflects the full
/// redirect chain and is the identity the page is stored under.
#[derive(Debug)]
pub struct FetchOutcome {
    pub http_status: u16,
    pub headers: reqwest::header::HeaderMap,
    pub body: Bytes,
    pub final_url: Url,
    pub response_time_ms: u64,
    /// Body exceeded the configured cap and was cut short.
    pub truncated: bool,
}

impl FetchOutcome {
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

/// Pool of HTTP clients, one per configured user agent, rotated with
/// an atomic round-robin counter.
pub struct ClientPool {
    clients: Vec<ReqwestClient>,
    next_client: AtomicUsize,
    config: Arc<CrawlerConfig>,
}

impl ClientPool {
    pub fn new(config: Arc<CrawlerConfig>) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        for (key, value) in &config.headers {
            headers.insert(
                reqwest::header::HeaderName::from_bytes(key.as_bytes())
                    .map_err(|e| FetchError::Transport(e.to_string()))?,
                reqwest::header::HeaderValue::from_str(value)
                    .map_err(|e| FetchError::Transport(e.to_string()))?,
            );
        }

        let clients = config
            .user_agents
            .iter()
            .map(|ua| {
                ReqwestClient::builder()
                    .user_agent(ua)
                    .timeout(config.request_timeout)
                    .default_headers(headers.clone())
                    .redirect(reqwest::redirect::Policy::limited(
                        config.max_redirects as usize,
                    ))
                    .build()
                    .map_err(|e| FetchError::Transport(e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        if clients.is_empty() {
            return Err(FetchError::Transport("no user agents configured".into()));
        }

        Ok(Self {
            clients,
            next_client: AtomicUsize::new(0),
            config,
        })
    }

    fn next(&self) -> &ReqwestClient {
        let index = self.next_client.fetch_add(1, Ordering::Relaxed);
        &self.clients[index % self.clients.len()]
    }

    /// Plain single-attempt GET used for robots.txt, with a short
    /// timeout and no retry schedule.
    pub async fn get_raw(&self, url: &Url) -> Result<(u16, Bytes)> {
        let response = self
            .next()
            .get(url.as_str())
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(classify)?;
        Ok((status, body))
    }

    /// Full retry schedule: up to `retry_attempts` retries on timeout,
    /// DNS failure or 5xx with base*3^n backoff; 408/429 retried once
    /// honoring Retry-After; other 4xx returned immediately.
    pub async fn fetch_with_retries(
        &self,
        url: &Url,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome> {
        let mut attempt: u32 = 0;
        let mut retry_after_used = false;

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                r = self.fetch_once(url) => r,
            };

            let (error, retry_after) = match result {
                Ok(outcome) => return Ok(outcome),
                Err(attempt_err) => (attempt_err.error, attempt_err.retry_after),
            };

            let delay = if matches!(error, FetchError::HttpStatus(408 | 429)) && !retry_after_used
            {
                retry_after_used = true;
                retry_after
                    .unwrap_or(self.config.retry_base_delay)
                    .min(RETRY_AFTER_CAP)
            } else if error.is_retryable() && attempt < self.config.retry_attempts {
                let delay = self.config.retry_base_delay * 3u32.pow(attempt);
                attempt += 1;
                delay
            } else {
                return Err(error);
            };

            debug!(url = %url, error = %error, delay_ms = delay.as_millis() as u64, "retrying fetch");
            tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn fetch_once(&self, url: &Url) -> std::result::Result<FetchOutcome, AttemptError> {
        let start = Instant::now();
        let response = self
            .next()
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| AttemptError::from(classify(e)))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(&response);
            return Err(AttemptError {
                error: FetchError::HttpStatus(status.as_u16()),
                retry_after,
            });
        }

        let final_url = response.url().clone();
        let headers = response.headers().clone();
        let (body, truncated) = self.read_body(response).await.map_err(AttemptError::from)?;
        let elapsed = start.elapsed();

        if truncated {
            warn!(url = %final_url, limit = self.config.max_content_size, "body truncated at size cap");
        }

        Ok(FetchOutcome {
            http_status: status.as_u16(),
            headers,
            body,
            final_url,
            response_time_ms: elapsed.as_millis() as u64,
            truncated,
        })
    }

    async fn read_body(&self, response: Response) -> Result<(Bytes, bool)> {
        let max_size = self.config.max_content_size;
        let mut bytes = BytesMut::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(classify)?;
            if bytes.len() + chunk.len() > max_size {
                let remaining = max_size - bytes.len();
                bytes.extend_from_slice(&chunk[..remaining]);
                return Ok((bytes.freeze(), true));
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok((bytes.freeze(), false))
    }
}

struct AttemptError {
    error: FetchError,
    retry_after: Option<Duration>,
}

impl From<FetchError> for AttemptError {
    fn from(error: FetchError) -> Self {
        Self {
            error,
            retry_after: None,
        }
    }
}

fn parse_retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Map a reqwest error onto the failure taxonomy counted by the
/// scheduler. DNS and TLS failures hide in the connect-error source
/// chain, so the chain is inspected textually.
fn classify(error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        return FetchError::Timeout;
    }
    if error.is_redirect() {
        return FetchError::TooManyRedirects;
    }
    if error.is_connect() {
        let chain = source_chain(&error).to_lowercase();
        if chain.contains("certificate")
            || chain.contains("tls")
            || chain.contains("ssl")
            || chain.contains("handshake")
        {
            return FetchError::Tls(chain);
        }
        if chain.contains("dns") || chain.contains("resolve") || chain.contains("lookup") {
            return FetchError::Dns(chain);
        }
        return FetchError::Transport(chain);
    }
    if let Some(status) = error.status() {
        return FetchError::HttpStatus(status.as_u16());
    }
    FetchError::Transport(error.to_string())
}

fn source_chain(error: &reqwest::Error) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = error.source();
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ")
}
