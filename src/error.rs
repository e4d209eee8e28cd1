//! Error types for the request pipeline.
//!
//! Two layers live here. [`Failure`] is the raw outcome of a failed attempt as the
//! pipeline observes it: a transport error, a non-2xx response, an envelope that
//! reported `success: false`, and so on. [`ClassifiedError`] is the normalized,
//! stable-shaped value that callers receive once recovery (credential refresh,
//! retries) has been exhausted.

use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Raw failure of a single attempt, before classification.
#[derive(thiserror::Error, Debug)]
pub enum Failure {
    /// No response reached the client (connection refused, DNS failure, reset).
    #[error("Network error: {0}")]
    Network(String),

    /// The request deadline elapsed at a suspension point.
    #[error("Request timed out")]
    Timeout,

    /// The caller's cancellation token fired at a suspension point.
    #[error("Request was cancelled")]
    Cancelled,

    /// The server answered with a non-2xx status.
    #[error("HTTP error {status} on {path}: {body}")]
    Http {
        /// The HTTP status code
        status: StatusCode,
        /// The response headers
        headers: HeaderMap,
        /// The raw response body
        body: String,
        /// The request path that produced the response
        path: String,
    },

    /// A 2xx response whose envelope carried `success: false`.
    #[error("Envelope reported failure (status {status}) on {path}")]
    Envelope {
        /// The HTTP status code
        status: StatusCode,
        /// The raw response body
        body: String,
        /// The request path that produced the response
        path: String,
    },

    /// The response body could not be decoded.
    #[error("Failed to decode response (status {status}): {serde_error}")]
    Decode {
        /// The HTTP status code
        status: StatusCode,
        /// The raw response body
        body: String,
        /// The serde error message
        serde_error: String,
    },

    /// A local error raised before or after dispatch.
    #[error("{0}")]
    Local(String),

    /// An error that has already been classified.
    #[error(transparent)]
    Classified(#[from] ClassifiedError),
}

impl Failure {
    /// Returns the HTTP status of the response that caused this failure, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Failure::Http { status, .. }
            | Failure::Envelope { status, .. }
            | Failure::Decode { status, .. } => Some(*status),
            Failure::Classified(error) => error
                .http_status
                .and_then(|status| StatusCode::from_u16(status).ok()),
            _ => None,
        }
    }

    /// Returns `true` for a 401 response.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Failure::Http { status, .. } if *status == StatusCode::UNAUTHORIZED)
    }
}

/// Stable error code carried by every [`ClassifiedError`].
///
/// Codes sent by the server that are not part of the built-in taxonomy are kept
/// verbatim in [`ErrorCode::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorCode {
    /// No response reached the client.
    NetworkError,
    /// The request deadline was exceeded.
    Timeout,
    /// The caller cancelled the request.
    Cancelled,
    /// The credential was rejected after the single auth retry.
    Unauthorized,
    /// The server reported per-field validation errors.
    ValidationError,
    /// 5xx after retries were exhausted.
    ServerError,
    /// Invalid client or request configuration.
    ConfigurationError,
    /// Unrecognized failure shape.
    UnknownError,
    /// A server-supplied code outside the built-in taxonomy.
    Other(String),
}

impl ErrorCode {
    /// Returns the wire form of the code, e.g. `NETWORK_ERROR`.
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::ServerError => "SERVER_ERROR",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
            ErrorCode::Other(code) => code,
        }
    }
}

impl From<String> for ErrorCode {
    fn from(code: String) -> Self {
        match code.as_str() {
            "NETWORK_ERROR" => ErrorCode::NetworkError,
            "TIMEOUT" => ErrorCode::Timeout,
            "CANCELLED" => ErrorCode::Cancelled,
            "UNAUTHORIZED" => ErrorCode::Unauthorized,
            "VALIDATION_ERROR" => ErrorCode::ValidationError,
            "SERVER_ERROR" => ErrorCode::ServerError,
            "CONFIGURATION_ERROR" => ErrorCode::ConfigurationError,
            "UNKNOWN_ERROR" => ErrorCode::UnknownError,
            _ => ErrorCode::Other(code),
        }
    }
}

impl From<&str> for ErrorCode {
    fn from(code: &str) -> Self {
        ErrorCode::from(code.to_string())
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> Self {
        code.as_str().to_string()
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The normalized failure returned to callers.
///
/// Produced by [`classify`](crate::classify::classify) from any [`Failure`]. The value
/// is immutable once built and serializes to the same camelCase shape the backend
/// uses for its error envelope.
///
/// # Examples
///
/// ```
/// use callward::{ClassifiedError, ErrorCode};
///
/// let error = ClassifiedError::new(ErrorCode::ValidationError, "Invalid deck")
///     .with_http_status(422)
///     .with_field_error("name", "must not be empty");
///
/// assert!(error.has_field_errors());
/// assert_eq!(error.field_error_detail().as_deref(), Some("name: must not be empty"));
/// ```
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}: {message}")]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedError {
    /// Human-readable message suitable for display.
    pub message: String,

    /// Stable error code.
    pub code: ErrorCode,

    /// The HTTP status, `Some(0)` when no response was received.
    pub http_status: Option<u16>,

    /// Per-field messages keyed by field name.
    #[serde(default)]
    pub field_errors: BTreeMap<String, Vec<String>>,

    /// When the error occurred (RFC 3339), as reported by the server or stamped locally.
    pub timestamp: String,

    /// The request path the error relates to.
    pub path: Option<String>,
}

impl ClassifiedError {
    /// Creates an error stamped with the current time.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
            http_status: None,
            field_errors: BTreeMap::new(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            path: None,
        }
    }

    /// Shorthand for a [`ErrorCode::ConfigurationError`].
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message)
    }

    /// Sets the HTTP status.
    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    /// Sets the request path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Appends a message for `field`.
    pub fn with_field_error(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        self.field_errors
            .entry(field.into())
            .or_default()
            .push(message.into());
        self
    }

    /// Returns `true` if the server reported per-field errors.
    pub fn has_field_errors(&self) -> bool {
        !self.field_errors.is_empty()
    }

    /// Renders the field errors as `field: msg, msg; field: msg`, or `None` if there are none.
    pub fn field_error_detail(&self) -> Option<String> {
        if self.field_errors.is_empty() {
            return None;
        }
        let detail = self
            .field_errors
            .iter()
            .map(|(field, messages)| format!("{}: {}", field, messages.join(", ")))
            .collect::<Vec<_>>()
            .join("; ");
        Some(detail)
    }
}

/// A specialized `Result` type for pipeline calls.
pub type Result<T> = std::result::Result<T, ClassifiedError>;
