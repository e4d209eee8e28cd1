//! Unwrapping of the `{ success, data, message }` response envelope.

use crate::error::Failure;
use crate::transport::HttpResponse;
use serde_json::Value;

/// Payload extracted from a successful envelope.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Unwrapped {
    pub data: Value,
    pub message: Option<String>,
}

/// Unwraps a 2xx response body.
///
/// An empty body yields `null`. A body carrying `success: false` becomes a
/// [`Failure::Envelope`]. JSON that is not envelope-shaped is passed through
/// whole as the payload.
pub(crate) fn unwrap(response: &HttpResponse, path: &str) -> Result<Unwrapped, Failure> {
    if response.body.trim().is_empty() {
        return Ok(Unwrapped {
            data: Value::Null,
            message: None,
        });
    }

    let value: Value = serde_json::from_str(&response.body).map_err(|e| Failure::Decode {
        status: response.status,
        body: response.body.clone(),
        serde_error: e.to_string(),
    })?;

    match value.get("success").and_then(Value::as_bool) {
        Some(true) => {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string);
            let data = value.get("data").cloned().unwrap_or(Value::Null);
            Ok(Unwrapped { data, message })
        }
        Some(false) => Err(Failure::Envelope {
            status: response.status,
            body: response.body.clone(),
            path: path.to_string(),
        }),
        None => Ok(Unwrapped {
            data: value,
            message: None,
        }),
    }
}
