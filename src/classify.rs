//! Normalization of raw failures into [`ClassifiedError`].

use crate::error::{ClassifiedError, ErrorCode, Failure};
use http::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Message used when the server did not supply one.
pub const DEFAULT_MESSAGE: &str = "An unexpected error occurred";

const NETWORK_MESSAGE: &str = "Unable to reach the server. Check your network connection.";

/// Error envelope as sent by the backend. Every field is optional.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    code: Option<String>,
    errors: Option<Value>,
    timestamp: Option<String>,
    path: Option<String>,
}

/// Converts any raw failure into a [`ClassifiedError`].
///
/// Rules, in priority order:
///
/// 1. an already classified error passes through unchanged;
/// 2. a failure with no response becomes `NETWORK_ERROR` with status 0
///    (or `TIMEOUT`/`CANCELLED` when the deadline or caller cut it short);
/// 3. a response has its `message`, `code`, `errors`, `timestamp` and `path`
///    extracted from the body;
/// 4. anything else is wrapped as `UNKNOWN_ERROR`.
///
/// # Examples
///
/// ```
/// use callward::{classify::classify, ErrorCode, Failure};
///
/// let first = classify(&Failure::Network("connection refused".into()));
/// assert_eq!(first.code, ErrorCode::NetworkError);
/// assert_eq!(first.http_status, Some(0));
///
/// let again = classify(&Failure::Classified(first.clone()));
/// assert_eq!(again, first);
/// ```
pub fn classify(failure: &Failure) -> ClassifiedError {
    match failure {
        Failure::Classified(error) => error.clone(),
        Failure::Network(_) => {
            ClassifiedError::new(ErrorCode::NetworkError, NETWORK_MESSAGE).with_http_status(0)
        }
        Failure::Timeout => ClassifiedError::new(ErrorCode::Timeout, "The request timed out"),
        Failure::Cancelled => {
            ClassifiedError::new(ErrorCode::Cancelled, "The request was cancelled")
        }
        Failure::Http {
            status, body, path, ..
        }
        | Failure::Envelope { status, body, path } => from_response(*status, body, path),
        Failure::Decode {
            status,
            serde_error,
            ..
        } => ClassifiedError::new(
            ErrorCode::UnknownError,
            format!("Failed to decode response: {}", serde_error),
        )
        .with_http_status(status.as_u16()),
        Failure::Local(message) => ClassifiedError::new(ErrorCode::UnknownError, message.clone()),
    }
}

fn from_response(status: StatusCode, body: &str, request_path: &str) -> ClassifiedError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let field_errors = parsed
        .errors
        .as_ref()
        .map(normalize_field_errors)
        .unwrap_or_default();

    let code = match parsed.code {
        Some(code) => ErrorCode::from(code),
        None if !field_errors.is_empty() => ErrorCode::ValidationError,
        None if status == StatusCode::UNAUTHORIZED => ErrorCode::Unauthorized,
        None if status.is_server_error() => ErrorCode::ServerError,
        None => ErrorCode::UnknownError,
    };

    let message = parsed
        .message
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_MESSAGE.to_string());

    let mut error = ClassifiedError::new(code, message)
        .with_http_status(status.as_u16())
        .with_path(parsed.path.unwrap_or_else(|| request_path.to_string()));
    error.field_errors = field_errors;
    if let Some(timestamp) = parsed.timestamp {
        error.timestamp = timestamp;
    }
    error
}

/// Normalizes the `errors` member of an error body into a field → messages map.
///
/// Accepts either `{ "field": "message" }` (values may also be arrays of
/// messages) or `[{ "field": ..., "message": ... }]`. Entries of any other shape
/// are ignored.
pub fn normalize_field_errors(errors: &Value) -> BTreeMap<String, Vec<String>> {
    let mut normalized: BTreeMap<String, Vec<String>> = BTreeMap::new();

    match errors {
        Value::Object(map) => {
            for (field, value) in map {
                let messages = normalized.entry(field.clone()).or_default();
                match value {
                    Value::String(message) => messages.push(message.clone()),
                    Value::Array(items) => messages.extend(
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string),
                    ),
                    Value::Null => {}
                    other => messages.push(other.to_string()),
                }
            }
            normalized.retain(|_, messages| !messages.is_empty());
        }
        Value::Array(items) => {
            for item in items {
                let field = item.get("field").and_then(Value::as_str);
                let message = item.get("message").and_then(Value::as_str);
                if let (Some(field), Some(message)) = (field, message) {
                    normalized
                        .entry(field.to_string())
                        .or_default()
                        .push(message.to_string());
                }
            }
        }
        _ => {}
    }

    normalized
}
