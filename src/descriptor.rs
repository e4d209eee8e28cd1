//! Description of one outgoing call.

use crate::deadline::Deadline;
use crate::error::{ClassifiedError, Result};
use crate::transport::parse_header;
use http::{HeaderMap, Method};
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Per-request switches surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestFlags {
    /// Do not attach the credential and never enter the refresh path.
    pub skip_auth: bool,
    /// Do not forward residual errors to the notification sink.
    pub skip_error_handling: bool,
    /// Do not emit request/response/error log records.
    pub skip_logging: bool,
    /// Whether the retry policy may re-issue this request.
    pub retry: bool,
}

impl Default for RequestFlags {
    fn default() -> Self {
        Self {
            skip_auth: false,
            skip_error_handling: false,
            skip_logging: false,
            retry: true,
        }
    }
}

/// Everything needed to issue (and re-issue) a single call.
///
/// A descriptor is owned by the pipeline invocation that received it. Retries
/// and post-refresh replays carry the same descriptor forward with updated
/// counters.
///
/// # Examples
///
/// ```
/// use callward::RequestDescriptor;
/// use http::Method;
/// use std::time::Duration;
///
/// let descriptor = RequestDescriptor::new(Method::POST, "/decks")
///     .with_json(&serde_json::json!({ "name": "Spanish verbs" }))?
///     .with_timeout(Duration::from_secs(5))
///     .skip_logging();
///
/// assert!(descriptor.flags.skip_logging);
/// assert_eq!(descriptor.attempt(), 0);
/// # Ok::<(), callward::ClassifiedError>(())
/// ```
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    /// The HTTP method.
    pub method: Method,

    /// The request path, relative to the base URL.
    pub path: String,

    /// Request-specific headers.
    pub headers: HeaderMap,

    /// Query parameters, in insertion order.
    pub query_params: Vec<(String, String)>,

    /// JSON body, if any.
    pub body: Option<serde_json::Value>,

    /// Per-request switches.
    pub flags: RequestFlags,

    /// Overall deadline for the call, covering every attempt. Falls back to the
    /// client's default when `None`.
    pub timeout: Option<Duration>,

    /// Caller-owned cancellation signal.
    pub cancellation: Option<CancellationToken>,

    pub(crate) attempt: u32,
    pub(crate) auth_retried: bool,
    pub(crate) deadline: Deadline,
    pub(crate) sent_credential: Option<String>,
}

impl RequestDescriptor {
    /// Creates a descriptor for `method` on `path`.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            query_params: Vec::new(),
            body: None,
            flags: RequestFlags::default(),
            timeout: None,
            cancellation: None,
            attempt: 0,
            auth_retried: false,
            deadline: Deadline::none(),
            sent_credential: None,
        }
    }

    /// Adds a header to the request.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let (name, value) = parse_header(name, value)?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Adds a query parameter to the request.
    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.push((key.into(), value.into()));
        self
    }

    /// Serializes `body` as the JSON request body.
    ///
    /// # Errors
    ///
    /// Returns an error if `body` cannot be represented as JSON.
    pub fn with_json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        let value = serde_json::to_value(body).map_err(|e| {
            ClassifiedError::configuration(format!("Failed to serialize request: {}", e))
        })?;
        self.body = Some(value);
        Ok(self)
    }

    /// Sets the overall deadline for the call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attaches a cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Suppresses credential injection and the refresh path.
    pub fn skip_auth(mut self) -> Self {
        self.flags.skip_auth = true;
        self
    }

    /// Suppresses the user-facing notification for residual errors.
    pub fn skip_error_handling(mut self) -> Self {
        self.flags.skip_error_handling = true;
        self
    }

    /// Suppresses request/response/error logging.
    pub fn skip_logging(mut self) -> Self {
        self.flags.skip_logging = true;
        self
    }

    /// Opts out of the retry policy.
    pub fn without_retry(mut self) -> Self {
        self.flags.retry = false;
        self
    }

    /// Number of retries issued so far by the retry policy (zero-based).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether this request has already been replayed after a credential refresh.
    pub fn auth_retried(&self) -> bool {
        self.auth_retried
    }
}

impl Default for RequestDescriptor {
    fn default() -> Self {
        Self::new(Method::GET, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_header_is_configuration_error() {
        let result = RequestDescriptor::new(Method::GET, "/users").with_header("bad header", "x");
        let error = result.unwrap_err();
        assert_eq!(error.code, crate::ErrorCode::ConfigurationError);
    }

    #[test]
    fn test_flags_default_to_retry_enabled() {
        let descriptor = RequestDescriptor::new(Method::GET, "/users");
        assert!(descriptor.flags.retry);
        assert!(!descriptor.flags.skip_auth);
        assert!(!descriptor.auth_retried());

        let descriptor = descriptor.skip_auth().without_retry().skip_error_handling();
        assert!(descriptor.flags.skip_auth);
        assert!(!descriptor.flags.retry);
        assert!(descriptor.flags.skip_error_handling);
    }

    #[test]
    fn test_query_params_keep_order() {
        let descriptor = RequestDescriptor::new(Method::GET, "/decks")
            .with_query_param("page", "2")
            .with_query_param("limit", "20");
        assert_eq!(
            descriptor.query_params,
            vec![
                ("page".to_string(), "2".to_string()),
                ("limit".to_string(), "20".to_string())
            ]
        );
    }
}
