//! Response wrapper that preserves both the unwrapped payload and call metadata.

use http::{HeaderMap, StatusCode};
use std::time::Duration;

/// A successful call.
///
/// `data` is the payload taken out of the `{ success, data, message }` envelope;
/// the remaining fields describe the final attempt and the call as a whole.
///
/// # Examples
///
/// ```no_run
/// use callward::Client;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Deck {
///     id: u64,
///     name: String,
/// }
///
/// # async fn example() -> Result<(), callward::ClassifiedError> {
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .build()?;
///
/// let response = client.get::<Deck>("/decks/12").await?;
///
/// println!("Deck: {}", response.data.name);
/// println!("Took {:?} over {} attempt(s)", response.latency, response.attempts);
/// println!("Correlation id: {}", response.correlation_id);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Response<T> {
    /// The unwrapped payload.
    pub data: T,

    /// The envelope's `message`, if present.
    pub message: Option<String>,

    /// The HTTP status code of the final attempt.
    pub status: StatusCode,

    /// The response headers of the final attempt.
    pub headers: HeaderMap,

    /// Total latency, including retries, refresh waits and backoff.
    pub latency: Duration,

    /// Number of times the request was dispatched.
    ///
    /// `1` when the first attempt succeeded; retries and post-refresh
    /// replays each add one.
    pub attempts: usize,

    /// Correlation id sent with the final attempt.
    pub correlation_id: String,
}

impl<T> Response<T> {
    /// Maps the payload to a different type while preserving the metadata.
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            data: f(self.data),
            message: self.message,
            status: self.status,
            headers: self.headers,
            latency: self.latency,
            attempts: self.attempts,
            correlation_id: self.correlation_id,
        }
    }

    /// Fallible variant of [`Response::map`].
    pub fn try_map<U, E, F>(self, f: F) -> Result<Response<U>, E>
    where
        F: FnOnce(T) -> Result<U, E>,
    {
        Ok(Response {
            data: f(self.data)?,
            message: self.message,
            status: self.status,
            headers: self.headers,
            latency: self.latency,
            attempts: self.attempts,
            correlation_id: self.correlation_id,
        })
    }

    /// Returns `true` if the request was dispatched more than once.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Returns a reference to a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

impl<T> std::ops::Deref for Response<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}
