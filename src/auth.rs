//! Credential lifecycle and single-flight refresh.
//!
//! When a request fails with 401 the coordinator decides whether it can be
//! recovered by refreshing the access credential. At most one refresh call is
//! in flight at any time. Requests that hit 401 while a refresh is outstanding
//! are parked in a FIFO queue and released, in order, once it settles; the
//! request that started the refresh is released after them.
//!
//! State transitions happen under a single mutex that also guards writes to the
//! credential slot. No lock is held across an `.await`.

use crate::classify::classify;
use crate::credential::{Credential, CredentialStore};
use crate::deadline::Deadline;
use crate::descriptor::RequestDescriptor;
use crate::envelope;
use crate::error::{ClassifiedError, Failure};
use crate::hooks::SessionHandler;
use crate::transport::{HttpRequest, Transport};
use http::{HeaderMap, HeaderValue, Method};
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

/// Default path of the refresh endpoint.
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

/// Default bound on a single refresh call.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

/// Header carrying the per-attempt correlation id.
pub const CORRELATION_HEADER: &str = "x-request-id";

/// Outcome shared by everyone waiting on one refresh.
type RefreshOutcome = Result<(), ClassifiedError>;

/// What the pipeline should do with a failed request.
#[derive(Debug)]
pub enum Intercept {
    /// Replay this descriptor from the outgoing transforms, with the new credential.
    Retry(RequestDescriptor),
    /// Not an auth failure the coordinator handles; continue with retry/classification.
    PassThrough,
    /// The refresh failed. The session has been terminated and the request must
    /// fail with this error.
    Rejected(ClassifiedError),
}

/// Body of a successful refresh, inside the success envelope.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: Option<u64>,
}

struct AuthState {
    refresh: RefreshState,
    /// Token the last failed refresh could not renew, with its error.
    rejected: Option<(String, ClassifiedError)>,
}

enum RefreshState {
    Idle,
    Refreshing {
        waiters: VecDeque<Waiter>,
        trigger: Option<oneshot::Sender<RefreshOutcome>>,
    },
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<RefreshOutcome>,
}

enum Registration {
    Trigger(oneshot::Receiver<RefreshOutcome>),
    Waiter(u64, oneshot::Receiver<RefreshOutcome>),
}

/// Owns the credential slot and the refresh state machine.
///
/// Construct once and share; clones refer to the same state.
#[derive(Clone)]
pub struct AuthCoordinator {
    inner: Arc<AuthInner>,
}

struct AuthInner {
    state: Mutex<AuthState>,
    store: Arc<dyn CredentialStore>,
    transport: Arc<dyn Transport>,
    session: Arc<dyn SessionHandler>,
    refresh_path: String,
    refresh_timeout: Duration,
    next_waiter_id: AtomicU64,
    refreshes: AtomicU64,
}

impl AuthCoordinator {
    /// Creates a coordinator that refreshes through `transport`.
    pub fn new(
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn Transport>,
        session: Arc<dyn SessionHandler>,
        refresh_path: impl Into<String>,
        refresh_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(AuthInner {
                state: Mutex::new(AuthState {
                    refresh: RefreshState::Idle,
                    rejected: None,
                }),
                store,
                transport,
                session,
                refresh_path: refresh_path.into(),
                refresh_timeout,
                next_waiter_id: AtomicU64::new(0),
                refreshes: AtomicU64::new(0),
            }),
        }
    }

    /// The current credential, if any.
    pub fn credential(&self) -> Option<Credential> {
        let _state = self.inner.lock_state();
        self.inner.store.load()
    }

    /// Installs a credential obtained at login.
    pub fn set_credential(&self, credential: Credential) {
        let mut state = self.inner.lock_state();
        state.rejected = None;
        self.inner.store.store(credential);
    }

    /// Clears the credential, e.g. on logout.
    pub fn clear_credential(&self) {
        let _state = self.inner.lock_state();
        self.inner.store.clear();
    }

    /// Clears the credential and tells the session handler the user must sign in again.
    pub fn expire_session(&self) {
        self.clear_credential();
        self.inner.session.on_session_expired();
    }

    /// Returns `true` while a refresh call is outstanding.
    pub fn is_refreshing(&self) -> bool {
        matches!(self.inner.lock_state().refresh, RefreshState::Refreshing { .. })
    }

    /// Number of requests parked behind the outstanding refresh, excluding the one
    /// that started it.
    pub fn pending_waiters(&self) -> usize {
        match &self.inner.lock_state().refresh {
            RefreshState::Idle => 0,
            RefreshState::Refreshing { waiters, .. } => waiters.len(),
        }
    }

    /// Total number of refresh calls started by this coordinator.
    pub fn refresh_count(&self) -> u64 {
        self.inner.refreshes.load(Ordering::SeqCst)
    }

    /// The configured refresh endpoint path.
    pub fn refresh_path(&self) -> &str {
        &self.inner.refresh_path
    }

    /// Returns `true` if `failure` on `descriptor` is one the coordinator recovers.
    ///
    /// Only a 401 on a request that carries auth, has not been replayed after a
    /// refresh yet, and is not itself the refresh call.
    pub fn should_intercept(&self, descriptor: &RequestDescriptor, failure: &Failure) -> bool {
        failure.is_unauthorized()
            && !descriptor.flags.skip_auth
            && !descriptor.auth_retried
            && descriptor.path != self.inner.refresh_path
    }

    /// Decides what happens to a request that failed with `failure`.
    ///
    /// Suspends until the outstanding refresh settles when one is needed. The wait
    /// honours the descriptor's deadline; on expiry the request leaves the queue
    /// and the returned `Err` carries the timeout or cancellation.
    pub async fn intercept_failure(
        &self,
        descriptor: &RequestDescriptor,
        failure: &Failure,
    ) -> Result<Intercept, Failure> {
        if !self.should_intercept(descriptor, failure) {
            return Ok(Intercept::PassThrough);
        }

        let mut replay = descriptor.clone();
        replay.auth_retried = true;

        let registration = {
            let mut state = self.inner.lock_state();
            let idle = matches!(state.refresh, RefreshState::Idle);
            let current = self.inner.store.load();
            let rotated = match &current {
                Some(current) => {
                    descriptor.sent_credential.as_deref() != Some(current.access_token())
                }
                None => false,
            };

            if idle && rotated {
                // Another request already refreshed after this one was sent.
                tracing::debug!(
                    path = %descriptor.path,
                    "Credential rotated since dispatch; replaying without refresh"
                );
                return Ok(Intercept::Retry(replay));
            }

            if idle && current.is_none() {
                if let Some((token, error)) = &state.rejected {
                    if descriptor.sent_credential.as_deref() == Some(token.as_str()) {
                        // The session already ended on this credential.
                        tracing::debug!(
                            path = %descriptor.path,
                            "Credential already failed to refresh; rejecting without refresh"
                        );
                        return Ok(Intercept::Rejected(error.clone()));
                    }
                }
            }

            match &mut state.refresh {
                RefreshState::Idle => {
                    let (tx, rx) = oneshot::channel();
                    state.refresh = RefreshState::Refreshing {
                        waiters: VecDeque::new(),
                        trigger: Some(tx),
                    };
                    state.rejected = None;
                    self.inner.refreshes.fetch_add(1, Ordering::SeqCst);
                    let renewing = current.map(|credential| credential.access_token().to_string());
                    tokio::spawn(Arc::clone(&self.inner).refresh(renewing));
                    Registration::Trigger(rx)
                }
                RefreshState::Refreshing { waiters, .. } => {
                    let (tx, rx) = oneshot::channel();
                    let id = self.inner.next_waiter_id.fetch_add(1, Ordering::Relaxed);
                    waiters.push_back(Waiter { id, tx });
                    tracing::debug!(
                        path = %descriptor.path,
                        queued = waiters.len(),
                        "Refresh in progress; request queued"
                    );
                    Registration::Waiter(id, rx)
                }
            }
        };

        let received = match registration {
            Registration::Trigger(rx) => {
                tracing::info!(path = %descriptor.path, "Access credential rejected; refreshing");
                descriptor.deadline.run(rx).await?
            }
            Registration::Waiter(id, rx) => {
                let _guard = WaiterGuard {
                    inner: &self.inner,
                    id,
                };
                descriptor.deadline.run(rx).await?
            }
        };

        match received {
            Ok(Ok(())) => Ok(Intercept::Retry(replay)),
            Ok(Err(error)) => Ok(Intercept::Rejected(error)),
            Err(_) => Err(Failure::Local(
                "Credential refresh ended without an outcome".to_string(),
            )),
        }
    }
}

impl AuthInner {
    fn lock_state(&self) -> MutexGuard<'_, AuthState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs one refresh episode to completion and releases everyone waiting on it.
    ///
    /// `renewing` is the token that was current when the refresh started.
    async fn refresh(self: Arc<Self>, renewing: Option<String>) {
        let outcome = self.request_credential().await;

        let failed = {
            let mut state = self.lock_state();
            let previous = std::mem::replace(&mut state.refresh, RefreshState::Idle);

            let shared = match outcome {
                Ok(credential) => {
                    self.store.store(credential);
                    Ok(())
                }
                Err(error) => {
                    self.store.clear();
                    state.rejected = renewing.map(|token| (token, error.clone()));
                    Err(error)
                }
            };

            if let RefreshState::Refreshing { waiters, trigger } = previous {
                tracing::info!(
                    succeeded = shared.is_ok(),
                    waiters = waiters.len(),
                    "Credential refresh settled"
                );
                for waiter in waiters {
                    let _ = waiter.tx.send(shared.clone());
                }
                if let Some(trigger) = trigger {
                    let _ = trigger.send(shared.clone());
                }
            }
            shared.is_err()
        };

        if failed {
            self.session.on_session_expired();
        }
    }

    /// Calls the refresh endpoint once. Never retried.
    async fn request_credential(&self) -> Result<Credential, ClassifiedError> {
        let mut headers = HeaderMap::new();
        let correlation_id = uuid::Uuid::new_v4().to_string();
        if let Ok(value) = HeaderValue::from_str(&correlation_id) {
            headers.insert(CORRELATION_HEADER, value);
        }
        let request = HttpRequest {
            method: Method::POST,
            path: self.refresh_path.clone(),
            query_params: Vec::new(),
            headers,
            body: None,
        };

        let deadline = Deadline::starting_now(Some(self.refresh_timeout), None);
        let result = async {
            let response = deadline.run(self.transport.send(request)).await??;
            if !response.status.is_success() {
                return Err(Failure::Http {
                    status: response.status,
                    headers: response.headers,
                    body: response.body,
                    path: self.refresh_path.clone(),
                });
            }
            let unwrapped = envelope::unwrap(&response, &self.refresh_path)?;
            let body: RefreshResponse =
                serde_json::from_value(unwrapped.data).map_err(|e| Failure::Decode {
                    status: response.status,
                    body: response.body.clone(),
                    serde_error: e.to_string(),
                })?;
            Ok(body)
        }
        .await;

        match result {
            Ok(body) => {
                let mut credential = Credential::new(body.access_token);
                if let Some(seconds) = body.expires_in {
                    credential = credential.expires_in(Duration::from_secs(seconds));
                }
                Ok(credential)
            }
            Err(failure) => {
                tracing::warn!(
                    error = %failure,
                    correlation_id = %correlation_id,
                    "Credential refresh failed"
                );
                Err(classify(&failure))
            }
        }
    }
}

/// Removes a waiter from the queue if it stops waiting before the refresh settles.
struct WaiterGuard<'a> {
    inner: &'a AuthInner,
    id: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.inner.lock_state();
        if let RefreshState::Refreshing { waiters, .. } = &mut state.refresh {
            waiters.retain(|waiter| waiter.id != self.id);
        }
    }
}
