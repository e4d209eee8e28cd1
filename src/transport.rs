//! The network seam.
//!
//! The pipeline never talks to `reqwest` directly; it hands a fully prepared
//! [`HttpRequest`] to a [`Transport`] and gets back either the raw response (any
//! status) or a [`Failure`] when no response was received.

use crate::error::{ClassifiedError, Failure};
use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use std::time::Duration;
use url::Url;

/// A request after the outgoing transforms have been applied.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// The HTTP method.
    pub method: Method,
    /// Path relative to the base URL.
    pub path: String,
    /// Query parameters.
    pub query_params: Vec<(String, String)>,
    /// Final header set, including authorization and correlation id.
    pub headers: HeaderMap,
    /// JSON body.
    pub body: Option<serde_json::Value>,
}

impl HttpRequest {
    /// Returns a header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

/// A raw response of any status.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// The HTTP status code.
    pub status: StatusCode,
    /// The response headers.
    pub headers: HeaderMap,
    /// The response body as text.
    pub body: String,
}

/// Performs the actual network call.
///
/// Implementations return `Ok` for every response that arrived, whatever its
/// status, and `Err` only when no response could be obtained.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` and waits for the response.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, Failure>;
}

/// [`Transport`] backed by a pooled `reqwest` client.
///
/// The client keeps a cookie store so that an HTTP-only refresh cookie set at
/// login travels with the refresh call.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http_client: reqwest::Client,
    base_url: Url,
    default_headers: HeaderMap,
    timeout: Option<Duration>,
}

impl ReqwestTransport {
    /// Creates a transport rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(
        base_url: Url,
        default_headers: HeaderMap,
        timeout: Option<Duration>,
    ) -> Result<Self, ClassifiedError> {
        let http_client = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| {
                ClassifiedError::configuration(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            http_client,
            base_url,
            default_headers,
            timeout,
        })
    }

    /// Joins `path` onto the base URL, keeping any base path prefix.
    fn url_for(&self, request: &HttpRequest) -> Url {
        let mut url = self.base_url.clone();
        let prefix = self.base_url.path().trim_end_matches('/');
        let path = request.path.trim_start_matches('/');
        url.set_path(&format!("{}/{}", prefix, path));

        for (key, value) in &request.query_params {
            url.query_pairs_mut().append_pair(key, value);
        }
        url
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, Failure> {
        let url = self.url_for(&request);

        tracing::debug!(
            method = %request.method,
            url = %url,
            "Executing HTTP request"
        );

        let mut builder = self.http_client.request(request.method.clone(), url);

        for (name, value) in &self.default_headers {
            builder = builder.header(name, value);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(transport_failure)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(transport_failure)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn transport_failure(error: reqwest::Error) -> Failure {
    if error.is_timeout() {
        Failure::Timeout
    } else {
        Failure::Network(error.to_string())
    }
}

/// Parses a header pair, reporting invalid input as a configuration error.
pub(crate) fn parse_header(
    name: impl AsRef<str>,
    value: impl AsRef<str>,
) -> Result<(HeaderName, HeaderValue), ClassifiedError> {
    let name = HeaderName::try_from(name.as_ref())
        .map_err(|e| ClassifiedError::configuration(format!("Invalid header name: {}", e)))?;
    let value = HeaderValue::try_from(value.as_ref())
        .map_err(|e| ClassifiedError::configuration(format!("Invalid header value: {}", e)))?;
    Ok((name, value))
}
