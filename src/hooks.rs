//! Collaborators the pipeline reports to.
//!
//! The request layer does not render anything or navigate anywhere itself. It
//! emits log records, asks a notification sink to surface residual errors, and
//! tells a session handler when the user has to sign in again. The defaults
//! below route all three through `tracing`.

use crate::descriptor::RequestDescriptor;
use crate::error::ClassifiedError;
use http::StatusCode;
use std::time::Duration;

/// Receives request lifecycle records. Skipped for descriptors with `skip_logging`.
pub trait RequestLogger: Send + Sync {
    /// Called once per attempt, after the outgoing transforms.
    fn log_request(&self, descriptor: &RequestDescriptor, correlation_id: &str);

    /// Called for every response that arrived, whatever its status.
    fn log_response(&self, descriptor: &RequestDescriptor, status: StatusCode, latency: Duration);

    /// Called once with the residual error of a failed call.
    fn log_error(&self, descriptor: &RequestDescriptor, error: &ClassifiedError);
}

/// Surfaces residual errors to the user.
pub trait ErrorNotifier: Send + Sync {
    /// `detail` carries the rendered per-field messages, when there are any.
    fn notify_error(&self, message: &str, detail: Option<&str>);
}

/// Told when the session can no longer be recovered and the user must re-authenticate.
pub trait SessionHandler: Send + Sync {
    /// Called after the credential has been cleared.
    fn on_session_expired(&self);
}

impl<F> SessionHandler for F
where
    F: Fn() + Send + Sync,
{
    fn on_session_expired(&self) {
        self()
    }
}

/// Default [`RequestLogger`] emitting `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl RequestLogger for TracingLogger {
    fn log_request(&self, descriptor: &RequestDescriptor, correlation_id: &str) {
        tracing::debug!(
            method = %descriptor.method,
            path = %descriptor.path,
            correlation_id = correlation_id,
            attempt = descriptor.attempt(),
            auth_retried = descriptor.auth_retried(),
            "Dispatching request"
        );
    }

    fn log_response(&self, descriptor: &RequestDescriptor, status: StatusCode, latency: Duration) {
        tracing::info!(
            method = %descriptor.method,
            path = %descriptor.path,
            status = status.as_u16(),
            latency_ms = latency.as_millis(),
            "Received HTTP response"
        );
    }

    fn log_error(&self, descriptor: &RequestDescriptor, error: &ClassifiedError) {
        tracing::error!(
            method = %descriptor.method,
            path = %descriptor.path,
            code = %error.code,
            http_status = ?error.http_status,
            message = %error.message,
            "Request failed"
        );
    }
}

/// Default [`ErrorNotifier`] emitting a `tracing` warning.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl ErrorNotifier for TracingNotifier {
    fn notify_error(&self, message: &str, detail: Option<&str>) {
        tracing::warn!(message = message, detail = ?detail, "User-facing error");
    }
}

/// Default [`SessionHandler`] emitting a `tracing` warning.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSessionHandler;

impl SessionHandler for TracingSessionHandler {
    fn on_session_expired(&self) {
        tracing::warn!("Session expired; re-authentication required");
    }
}
