//! HTTP Client Implementation using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, StreamingResponse},
};
use futures_util::TryStreamExt;
use reqwest::{header, Client};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Browser-like agent; several podcast CDNs refuse unknown clients.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Reqwest-based HTTP client implementation
///
/// Provides HTTP operations with:
/// - Connection pooling via reqwest
/// - Retry with exponential backoff for buffered requests
/// - Chunked body streaming for media downloads
pub struct ReqwestHttpClient {
    client: Client,
    max_attempts: u32,
    base_delay: Duration,
}

impl ReqwestHttpClient {
    /// Create a new HTTP client with default configuration
    pub fn new() -> Result<Self> {
        Self::with_user_agent(DEFAULT_USER_AGENT)
    }

    /// Create a new HTTP client sending the given `User-Agent` by default
    pub fn with_user_agent(user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .user_agent(user_agent)
            .build()
            .map_err(|e| {
                BridgeError::OperationFailed(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self::with_client(client))
    }

    /// Wrap an already configured reqwest client
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }

    /// Number of attempts for buffered requests (streams are never retried)
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    fn convert_method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Head => reqwest::Method::HEAD,
        }
    }

    fn build_request(&self, request: &HttpRequest) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(Self::convert_method(request.method), &request.url);

        for (key, value) in &request.headers {
            req = req.header(key, value);
        }

        req
    }

    fn map_error(error: reqwest::Error, timeout: Option<Duration>) -> BridgeError {
        if error.is_timeout() {
            BridgeError::Timeout(timeout.unwrap_or_default())
        } else if let Some(status) = error.status() {
            BridgeError::UpstreamStatus {
                status: status.as_u16(),
            }
        } else {
            BridgeError::Network(error.to_string())
        }
    }

    fn collect_headers(headers: &header::HeaderMap) -> HashMap<String, String> {
        headers
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect()
    }

    fn backoff(&self, attempt: u32) -> Duration {
        (self.base_delay * 2u32.pow(attempt.saturating_sub(1))).min(Duration::from_secs(5))
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut attempt = 0;
        let mut last_error = None;

        while attempt < self.max_attempts {
            debug!(
                attempt = attempt + 1,
                max_attempts = self.max_attempts,
                url = %request.url,
                "Executing HTTP request"
            );

            let mut builder = self.build_request(&request);
            if let Some(timeout) = request.timeout {
                builder = builder.timeout(timeout);
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();

                    if status >= 500 || status == 429 {
                        warn!(status, attempt = attempt + 1, "Retryable upstream status");
                        last_error = Some(BridgeError::UpstreamStatus { status });
                    } else {
                        let headers = Self::collect_headers(response.headers());
                        let body = response
                            .bytes()
                            .await
                            .map_err(|e| Self::map_error(e, request.timeout))?;

                        return Ok(HttpResponse {
                            status,
                            headers,
                            body,
                        });
                    }
                }
                Err(e) => {
                    warn!(error = %e, attempt = attempt + 1, "HTTP request failed");
                    last_error = Some(Self::map_error(e, request.timeout));
                }
            }

            attempt += 1;

            if attempt < self.max_attempts {
                let delay = self.backoff(attempt);
                debug!(delay_ms = delay.as_millis() as u64, "Retrying after delay");
                sleep(delay).await;
            }
        }

        Err(last_error.unwrap_or_else(|| {
            BridgeError::OperationFailed("All retry attempts exhausted".to_string())
        }))
    }

    /// The timeout bounds only the wait for response headers; the body may
    /// take as long as it needs.
    async fn stream(&self, request: HttpRequest) -> Result<StreamingResponse> {
        let timeout = request.timeout;
        let send = self.build_request(&request).send();
        let response = match timeout {
            Some(limit) => tokio::time::timeout(limit, send)
                .await
                .map_err(|_| BridgeError::Timeout(limit))?,
            None => send.await,
        }
        .map_err(|e| Self::map_error(e, timeout))?;

        let status = response.status().as_u16();
        let headers = Self::collect_headers(response.headers());
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_length = response.content_length();

        debug!(
            url = %request.url,
            status,
            content_length = ?content_length,
            "Opened streaming response"
        );

        let body = response
            .bytes_stream()
            .map_err(move |e| Self::map_error(e, timeout));

        Ok(StreamingResponse {
            status,
            headers,
            content_type,
            content_length,
            body: Box::pin(body),
        })
    }
}
