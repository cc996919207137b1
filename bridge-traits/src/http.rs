//! HTTP Client Abstraction
//!
//! Models the network locator fetch: a URL goes in, either a fully buffered
//! payload or a chunked byte stream comes out, together with the upstream
//! status code and the declared content type and length.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::error::{BridgeError, Result};

/// HTTP method types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
}

/// HTTP request builder
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    /// Whole-request limit for [`HttpClient::execute`]; for
    /// [`HttpClient::stream`] it only bounds the wait for the response head.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Override the `User-Agent` sent upstream.
    ///
    /// Some podcast hosts reject requests without a browser-like agent.
    pub fn user_agent(self, agent: impl Into<String>) -> Self {
        self.header("User-Agent", agent)
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }
}

/// Buffered HTTP response
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    /// Get response body as UTF-8 string
    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.body.to_vec())
            .map_err(|e| BridgeError::OperationFailed(format!("Invalid UTF-8: {}", e)))
    }

    /// Check if response status is successful (2xx)
    pub fn is_success(&self) -> bool {
        is_success_status(self.status)
    }

    /// Declared `Content-Type`, if any.
    pub fn content_type(&self) -> Option<&str> {
        header_value(&self.headers, "content-type")
    }
}

/// Streaming HTTP response.
///
/// Headers are available as soon as the upstream answers; the body arrives in
/// chunks as the caller polls `body`.
pub struct StreamingResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    /// Declared `Content-Type`, if the upstream sent one.
    pub content_type: Option<String>,
    /// Declared `Content-Length`, if the upstream sent one.
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, Result<Bytes>>,
}

impl StreamingResponse {
    pub fn is_success(&self) -> bool {
        is_success_status(self.status)
    }

    /// Turn a non-2xx status into [`BridgeError::UpstreamStatus`].
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(BridgeError::UpstreamStatus {
                status: self.status,
            })
        }
    }
}

impl fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

fn is_success_status(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Case-insensitive header lookup.
pub fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Async HTTP client trait
///
/// Implementations must honour `HttpRequest::timeout` and report failures as
/// [`BridgeError::Network`], [`BridgeError::Timeout`] or
/// [`BridgeError::UpstreamStatus`]. A partially received body is never
/// reported as success by [`HttpClient::execute`].
///
/// # Example
///
/// ```ignore
/// use bridge_traits::http::{HttpClient, HttpRequest};
///
/// async fn fetch_feed(client: &dyn HttpClient) -> Result<String> {
///     let response = client.execute(HttpRequest::get("https://example.com/feed.xml")).await?;
///     response.text()
/// }
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Execute a request and buffer the whole body.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// Execute a request and hand back the body as a chunk stream.
    async fn stream(&self, request: HttpRequest) -> Result<StreamingResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn test_http_request_builder() {
        let request = HttpRequest::get("https://example.com/a.mp3")
            .user_agent("Mozilla/5.0")
            .timeout(Duration::from_secs(30));

        assert_eq!(request.method, HttpMethod::Get);
        assert_eq!(request.url, "https://example.com/a.mp3");
        assert_eq!(
            request.headers.get("User-Agent"),
            Some(&"Mozilla/5.0".to_string())
        );
        assert_eq!(request.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_header_lookup_ignores_case() {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "audio/mpeg".to_string());

        let response = HttpResponse {
            status: 200,
            headers,
            body: Bytes::from_static(b"abc"),
        };

        assert!(response.is_success());
        assert_eq!(response.content_type(), Some("audio/mpeg"));
    }

    #[test]
    fn test_error_for_status() {
        let response = StreamingResponse {
            status: 404,
            headers: HashMap::new(),
            content_type: None,
            content_length: None,
            body: Box::pin(stream::empty()),
        };

        match response.error_for_status() {
            Err(BridgeError::UpstreamStatus { status }) => assert_eq!(status, 404),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }
}
