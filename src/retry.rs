//! Bounded retry policy for transient failures.
//!
//! A fixed set of retryable statuses, a retry budget, and a linear backoff of
//! `base_delay * (attempt + 1)`.

use crate::descriptor::RequestDescriptor;
use crate::error::Failure;
use http::StatusCode;
use std::time::Duration;

/// Statuses retried by default: 408, 429, 500, 502, 503, 504.
pub const DEFAULT_RETRYABLE_STATUSES: [StatusCode; 6] = [
    StatusCode::REQUEST_TIMEOUT,
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// Decides whether a failed request is re-issued and how long to wait first.
///
/// # Examples
///
/// ```
/// use callward::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::builder()
///     .base_delay(Duration::from_millis(100))
///     .max_retries(3)
///     .build();
///
/// // 100ms, 200ms, 300ms, then give up
/// assert_eq!(policy.delay_for_attempt(0), Some(Duration::from_millis(100)));
/// assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(300)));
/// assert_eq!(policy.delay_for_attempt(3), None);
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay unit; the n-th retry (zero-based) waits `base_delay * (n + 1)`.
    pub base_delay: Duration,

    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,

    /// Response statuses that may be retried.
    pub retryable_statuses: Vec<StatusCode>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_retries: 3,
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// Creates a new builder for configuring the policy.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Returns the delay before retrying when `attempt` retries have already
    /// been made, or `None` once the budget is spent.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        Some(self.base_delay.saturating_mul(attempt.saturating_add(1)))
    }

    /// Returns `true` if `status` is in the retryable set.
    pub fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// Returns the backoff delay if `descriptor` should be re-issued after `failure`.
    ///
    /// Requests that opted out of retries, failures without a retryable status and
    /// descriptors whose retry budget is spent all yield `None`.
    pub fn should_retry(&self, descriptor: &RequestDescriptor, failure: &Failure) -> Option<Duration> {
        if !descriptor.flags.retry {
            return None;
        }
        let status = failure.status()?;
        if !self.is_retryable_status(status) {
            return None;
        }
        self.delay_for_attempt(descriptor.attempt())
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Default)]
pub struct RetryPolicyBuilder {
    base_delay: Option<Duration>,
    max_retries: Option<u32>,
    retryable_statuses: Option<Vec<StatusCode>>,
}

impl RetryPolicyBuilder {
    /// Sets the backoff unit.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = Some(delay);
        self
    }

    /// Sets the maximum number of retries.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Replaces the retryable status set.
    pub fn retryable_statuses(mut self, statuses: impl IntoIterator<Item = StatusCode>) -> Self {
        self.retryable_statuses = Some(statuses.into_iter().collect());
        self
    }

    /// Builds the `RetryPolicy`.
    pub fn build(self) -> RetryPolicy {
        let default = RetryPolicy::default();
        RetryPolicy {
            base_delay: self.base_delay.unwrap_or(default.base_delay),
            max_retries: self.max_retries.unwrap_or(default.max_retries),
            retryable_statuses: self
                .retryable_statuses
                .unwrap_or(default.retryable_statuses),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, Method};

    fn failure(status: StatusCode) -> Failure {
        Failure::Http {
            status,
            headers: HeaderMap::new(),
            body: String::new(),
            path: "/reports".to_string(),
        }
    }

    fn descriptor_at(attempt: u32) -> RequestDescriptor {
        let mut descriptor = RequestDescriptor::new(Method::GET, "/reports");
        descriptor.attempt = attempt;
        descriptor
    }

    #[test]
    fn test_linear_delays_strictly_increase() {
        let policy = RetryPolicy::builder()
            .base_delay(Duration::from_millis(10))
            .build();
        let unavailable = failure(StatusCode::SERVICE_UNAVAILABLE);

        let delays: Vec<_> = (0..3)
            .map(|attempt| policy.should_retry(&descriptor_at(attempt), &unavailable))
            .collect();

        assert_eq!(
            delays,
            vec![
                Some(Duration::from_millis(10)),
                Some(Duration::from_millis(20)),
                Some(Duration::from_millis(30)),
            ]
        );
    }

    #[test]
    fn test_exhausted_budget_never_retries() {
        let policy = RetryPolicy::default();
        for status in DEFAULT_RETRYABLE_STATUSES {
            assert_eq!(policy.should_retry(&descriptor_at(3), &failure(status)), None);
            assert_eq!(policy.should_retry(&descriptor_at(10), &failure(status)), None);
        }
    }

    #[test]
    fn test_non_retryable_status_and_network_errors() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.should_retry(&descriptor_at(0), &failure(StatusCode::BAD_REQUEST)),
            None
        );
        assert_eq!(
            policy.should_retry(&descriptor_at(0), &Failure::Network("reset".into())),
            None
        );
    }

    #[test]
    fn test_opted_out_descriptor_is_not_retried() {
        let policy = RetryPolicy::default();
        let descriptor = RequestDescriptor::new(Method::GET, "/reports").without_retry();
        assert_eq!(
            policy.should_retry(&descriptor, &failure(StatusCode::BAD_GATEWAY)),
            None
        );
    }

    #[test]
    fn test_custom_status_set_and_disabled_policy() {
        let policy = RetryPolicy::builder()
            .retryable_statuses([StatusCode::CONFLICT])
            .build();
        assert!(policy.is_retryable_status(StatusCode::CONFLICT));
        assert!(!policy.is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));

        assert_eq!(RetryPolicy::disabled().delay_for_attempt(0), None);
    }
}
