//! Per-request deadline and cancellation.
//!
//! Every suspension point in the pipeline (transport dispatch, retry backoff,
//! waiting for an in-flight credential refresh) runs under the request's
//! [`Deadline`], so a slow call is cut short wherever it happens to be waiting.

use crate::error::Failure;
use std::future::{pending, Future};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// The point in time after which a request must give up, plus an optional
/// caller-owned cancellation token.
#[derive(Debug, Clone, Default)]
pub struct Deadline {
    at: Option<Instant>,
    cancellation: Option<CancellationToken>,
}

impl Deadline {
    /// A deadline that never expires and cannot be cancelled.
    pub fn none() -> Self {
        Self::default()
    }

    /// Starts the clock now: expires after `timeout` if one is given.
    pub fn starting_now(timeout: Option<Duration>, cancellation: Option<CancellationToken>) -> Self {
        Self {
            at: timeout.map(|timeout| Instant::now() + timeout),
            cancellation,
        }
    }

    /// Runs `future` until it completes, the deadline passes or the token is cancelled.
    ///
    /// Completion wins a tie with expiry.
    pub async fn run<F>(&self, future: F) -> Result<F::Output, Failure>
    where
        F: Future,
    {
        let expired = async {
            match self.at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => pending::<()>().await,
            }
        };
        let cancelled = async {
            match &self.cancellation {
                Some(token) => token.cancelled().await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            output = future => Ok(output),
            _ = cancelled => Err(Failure::Cancelled),
            _ = expired => Err(Failure::Timeout),
        }
    }

    /// Sleeps for `delay` unless the deadline or cancellation interrupts first.
    pub async fn sleep(&self, delay: Duration) -> Result<(), Failure> {
        self.run(tokio::time::sleep(delay)).await
    }
}
