//! The request pipeline.
//!
//! [`Client`] is the single entry point every outgoing call goes through. Each
//! attempt runs the same stages: outgoing transforms (credential, correlation id,
//! log record), dispatch, envelope unwrapping, and on failure the recovery chain
//! (credential refresh first, then the retry policy) before anything is
//! classified and reported. Use [`ClientBuilder`] to configure and create clients.

use crate::{
    auth::{
        AuthCoordinator, Intercept, CORRELATION_HEADER, DEFAULT_REFRESH_PATH,
        DEFAULT_REFRESH_TIMEOUT,
    },
    classify::classify,
    credential::{Credential, CredentialStore, MemoryCredentialStore},
    deadline::Deadline,
    descriptor::RequestDescriptor,
    envelope,
    error::{ClassifiedError, Failure},
    hooks::{
        ErrorNotifier, RequestLogger, SessionHandler, TracingLogger, TracingNotifier,
        TracingSessionHandler,
    },
    retry::RetryPolicy,
    transport::{parse_header, HttpRequest, HttpResponse, ReqwestTransport, Transport},
    Response, Result,
};
use http::{header::AUTHORIZATION, HeaderMap, HeaderValue, Method};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// An authenticated HTTP client.
///
/// Clones share the same transport, credential slot and refresh state, so one
/// client should be built at startup and handed to everything that issues
/// requests.
///
/// # Examples
///
/// ```no_run
/// use callward::{Client, Credential, RetryPolicy};
/// use serde::{Deserialize, Serialize};
/// use std::time::Duration;
///
/// #[derive(Serialize)]
/// struct NewFolder {
///     name: String,
/// }
///
/// #[derive(Deserialize)]
/// struct Folder {
///     id: u64,
///     name: String,
/// }
///
/// # async fn example() -> Result<(), callward::ClassifiedError> {
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .timeout(Duration::from_secs(30))
///     .retry_policy(RetryPolicy::builder().base_delay(Duration::from_millis(500)).build())
///     .credential(Credential::new("access-token"))
///     .build()?;
///
/// let folder: callward::Response<Folder> = client
///     .post("/folders", &NewFolder { name: "Languages".to_string() })
///     .await?;
/// println!("Created folder {}", folder.data.id);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    coordinator: AuthCoordinator,
    retry_policy: RetryPolicy,
    logger: Arc<dyn RequestLogger>,
    notifier: Arc<dyn ErrorNotifier>,
    timeout: Option<Duration>,
}

impl Client {
    /// Creates a new `ClientBuilder` for configuring a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The coordinator owning the credential and refresh state.
    pub fn coordinator(&self) -> &AuthCoordinator {
        &self.inner.coordinator
    }

    /// Installs the credential obtained at login.
    pub fn login(&self, credential: Credential) {
        self.inner.coordinator.set_credential(credential);
    }

    /// Clears the credential. Does not notify the session handler.
    pub fn logout(&self) {
        self.inner.coordinator.clear_credential();
    }

    /// The current credential, if any.
    pub fn credential(&self) -> Option<Credential> {
        self.inner.coordinator.credential()
    }

    /// Sends a request and returns the unwrapped JSON payload.
    ///
    /// Every failure resolves to a [`ClassifiedError`]; nothing in here panics or
    /// escapes as an unclassified error.
    pub async fn send(&self, mut descriptor: RequestDescriptor) -> Result<Response<Value>> {
        self.execute(&mut descriptor).await
    }

    /// Sends a request and decodes the unwrapped payload into `Res`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use callward::{Client, RequestDescriptor};
    /// use http::Method;
    /// use serde::Deserialize;
    ///
    /// #[derive(Deserialize)]
    /// struct Profile { email: String }
    ///
    /// # async fn example() -> Result<(), callward::ClassifiedError> {
    /// let client = Client::builder()
    ///     .base_url("https://api.example.com")?
    ///     .build()?;
    ///
    /// let descriptor = RequestDescriptor::new(Method::GET, "/users/me")
    ///     .with_query_param("include", "settings")
    ///     .skip_error_handling();
    ///
    /// let profile = client.call::<Profile>(descriptor).await?;
    /// println!("Signed in as {}", profile.data.email);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn call<Res>(&self, mut descriptor: RequestDescriptor) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        let response = self.execute(&mut descriptor).await?;
        let status = response.status;

        response
            .try_map(|data| {
                Res::deserialize(&data).map_err(|e| Failure::Decode {
                    status,
                    body: data.to_string(),
                    serde_error: e.to_string(),
                })
            })
            .map_err(|failure| self.fail(&descriptor, failure))
    }

    async fn execute(&self, descriptor: &mut RequestDescriptor) -> Result<Response<Value>> {
        let start_time = Instant::now();
        descriptor.deadline = Deadline::starting_now(
            descriptor.timeout.or(self.inner.timeout),
            descriptor.cancellation.clone(),
        );
        let mut dispatches = 0;

        loop {
            let (request, correlation_id) = match self.outgoing(descriptor) {
                Ok(prepared) => prepared,
                Err(failure) => return Err(self.fail(descriptor, failure)),
            };
            dispatches += 1;

            let failure = match self.dispatch(descriptor, request).await {
                Ok(response) => match envelope::unwrap(&response, &descriptor.path) {
                    Ok(unwrapped) => {
                        return Ok(Response {
                            data: unwrapped.data,
                            message: unwrapped.message,
                            status: response.status,
                            headers: response.headers,
                            latency: start_time.elapsed(),
                            attempts: dispatches,
                            correlation_id,
                        });
                    }
                    Err(failure) => failure,
                },
                Err(failure) => failure,
            };

            tracing::warn!(
                error = %failure,
                attempt = descriptor.attempt(),
                method = %descriptor.method,
                path = %descriptor.path,
                correlation_id = %correlation_id,
                "Request failed"
            );

            match self.inner.coordinator.intercept_failure(descriptor, &failure).await {
                Ok(Intercept::Retry(replay)) => {
                    *descriptor = replay;
                    continue;
                }
                Ok(Intercept::Rejected(error)) => {
                    // The coordinator already ended the session; stay silent.
                    if !descriptor.flags.skip_logging {
                        self.inner.logger.log_error(descriptor, &error);
                    }
                    return Err(error);
                }
                Ok(Intercept::PassThrough) => {}
                Err(interrupted) => return Err(self.fail(descriptor, interrupted)),
            }

            if let Some(delay) = self.inner.retry_policy.should_retry(descriptor, &failure) {
                tracing::info!(
                    delay_ms = delay.as_millis(),
                    attempt = descriptor.attempt(),
                    path = %descriptor.path,
                    "Retrying request after delay"
                );
                if let Err(interrupted) = descriptor.deadline.sleep(delay).await {
                    return Err(self.fail(descriptor, interrupted));
                }
                descriptor.attempt += 1;
                continue;
            }

            return Err(self.fail(descriptor, failure));
        }
    }

    /// Outgoing transforms: credential, correlation id, request log.
    fn outgoing(
        &self,
        descriptor: &mut RequestDescriptor,
    ) -> std::result::Result<(HttpRequest, String), Failure> {
        let mut headers = descriptor.headers.clone();

        descriptor.sent_credential = None;
        if !descriptor.flags.skip_auth {
            if let Some(credential) = self.inner.coordinator.credential() {
                let value = HeaderValue::from_str(&credential.authorization()).map_err(|_| {
                    Failure::Local("Stored credential is not a valid header value".to_string())
                })?;
                headers.insert(AUTHORIZATION, value);
                descriptor.sent_credential = Some(credential.access_token().to_string());
            }
        }

        let correlation_id = uuid::Uuid::new_v4().to_string();
        let value = HeaderValue::from_str(&correlation_id)
            .map_err(|e| Failure::Local(format!("Invalid correlation id: {}", e)))?;
        headers.insert(CORRELATION_HEADER, value);

        if !descriptor.flags.skip_logging {
            self.inner.logger.log_request(descriptor, &correlation_id);
        }

        let request = HttpRequest {
            method: descriptor.method.clone(),
            path: descriptor.path.clone(),
            query_params: descriptor.query_params.clone(),
            headers,
            body: descriptor.body.clone(),
        };
        Ok((request, correlation_id))
    }

    /// Sends one attempt under the request deadline. Non-2xx becomes a failure.
    async fn dispatch(
        &self,
        descriptor: &RequestDescriptor,
        request: HttpRequest,
    ) -> std::result::Result<HttpResponse, Failure> {
        let started = Instant::now();
        let response = descriptor
            .deadline
            .run(self.inner.transport.send(request))
            .await??;

        if !descriptor.flags.skip_logging {
            self.inner
                .logger
                .log_response(descriptor, response.status, started.elapsed());
        }

        if !response.status.is_success() {
            if response.status.is_client_error() {
                tracing::debug!(
                    status = response.status.as_u16(),
                    response = %response.body,
                    "Client error (4xx)"
                );
            } else if response.status.is_server_error() {
                tracing::warn!(
                    status = response.status.as_u16(),
                    response = %response.body,
                    "Server error (5xx)"
                );
            }
            return Err(Failure::Http {
                status: response.status,
                headers: response.headers,
                body: response.body,
                path: descriptor.path.clone(),
            });
        }

        Ok(response)
    }

    /// Classifies a residual failure and reports it.
    fn fail(&self, descriptor: &RequestDescriptor, failure: Failure) -> ClassifiedError {
        let error = classify(&failure);

        if !descriptor.flags.skip_logging {
            self.inner.logger.log_error(descriptor, &error);
        }

        // The status decides, whatever code the server put in the body.
        if error.http_status == Some(401) && !descriptor.flags.skip_auth {
            self.inner.coordinator.expire_session();
            return error;
        }

        if !descriptor.flags.skip_error_handling {
            self.inner
                .notifier
                .notify_error(&error.message, error.field_error_detail().as_deref());
        }

        error
    }

    /// Makes a GET request to the specified path.
    pub async fn get<Res>(&self, path: impl Into<String>) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        self.call(RequestDescriptor::new(Method::GET, path)).await
    }

    /// Makes a POST request to the specified path with a JSON body.
    pub async fn post<Req, Res>(&self, path: impl Into<String>, body: &Req) -> Result<Response<Res>>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let descriptor = RequestDescriptor::new(Method::POST, path).with_json(body)?;
        self.call(descriptor).await
    }

    /// Makes a PUT request to the specified path with a JSON body.
    pub async fn put<Req, Res>(&self, path: impl Into<String>, body: &Req) -> Result<Response<Res>>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let descriptor = RequestDescriptor::new(Method::PUT, path).with_json(body)?;
        self.call(descriptor).await
    }

    /// Makes a PATCH request to the specified path with a JSON body.
    pub async fn patch<Req, Res>(
        &self,
        path: impl Into<String>,
        body: &Req,
    ) -> Result<Response<Res>>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let descriptor = RequestDescriptor::new(Method::PATCH, path).with_json(body)?;
        self.call(descriptor).await
    }

    /// Makes a DELETE request to the specified path.
    pub async fn delete<Res>(&self, path: impl Into<String>) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        self.call(RequestDescriptor::new(Method::DELETE, path)).await
    }
}

/// Builder for configuring and creating a [`Client`].
///
/// A base URL is required unless a custom [`Transport`] is supplied.
///
/// # Examples
///
/// ```no_run
/// use callward::{ClientBuilder, RetryPolicy};
/// use std::time::Duration;
///
/// # fn example() -> Result<(), callward::ClassifiedError> {
/// let client = ClientBuilder::new()
///     .base_url("https://api.example.com")?
///     .timeout(Duration::from_secs(30))
///     .retry_policy(RetryPolicy::builder().max_retries(5).build())
///     .refresh_path("/auth/refresh")
///     .session_handler(|| eprintln!("please sign in again"))
///     .default_header("User-Agent", "flashcards-web/1.0")?
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    base_url: Option<Url>,
    default_headers: HeaderMap,
    timeout: Option<Duration>,
    retry_policy: RetryPolicy,
    credential_store: Option<Arc<dyn CredentialStore>>,
    credential: Option<Credential>,
    refresh_path: String,
    refresh_timeout: Duration,
    transport: Option<Arc<dyn Transport>>,
    logger: Arc<dyn RequestLogger>,
    notifier: Arc<dyn ErrorNotifier>,
    session_handler: Arc<dyn SessionHandler>,
}

impl ClientBuilder {
    /// Creates a new `ClientBuilder` with default settings.
    pub fn new() -> Self {
        Self {
            base_url: None,
            default_headers: HeaderMap::new(),
            timeout: None,
            retry_policy: RetryPolicy::default(),
            credential_store: None,
            credential: None,
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
            transport: None,
            logger: Arc::new(TracingLogger),
            notifier: Arc::new(TracingNotifier),
            session_handler: Arc::new(TracingSessionHandler),
        }
    }

    /// Sets the base URL for all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        let url = Url::parse(url.as_ref())
            .map_err(|e| ClassifiedError::configuration(format!("Invalid URL: {}", e)))?;
        self.base_url = Some(url);
        Ok(self)
    }

    /// Adds a default header that will be included in all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let (name, value) = parse_header(name, value)?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Sets the default overall deadline for requests that do not carry their own.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the retry policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Replaces the in-memory credential slot.
    pub fn credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credential_store = Some(store);
        self
    }

    /// Installs an initial credential, as if the user had just logged in.
    pub fn credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Sets the refresh endpoint path. Defaults to `/auth/refresh`.
    pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    /// Bounds a single refresh call. Defaults to 10 seconds.
    pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Uses a custom transport instead of the built-in `reqwest` one.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the request logger.
    pub fn logger(mut self, logger: Arc<dyn RequestLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Sets the user-facing notification sink.
    pub fn notifier(mut self, notifier: Arc<dyn ErrorNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Sets the callback fired when the session can no longer be recovered.
    pub fn session_handler(mut self, handler: impl SessionHandler + 'static) -> Self {
        self.session_handler = Arc::new(handler);
        self
    }

    /// Builds the configured `Client`.
    ///
    /// # Errors
    ///
    /// Returns an error if neither a base URL nor a custom transport was
    /// provided, or if the HTTP client cannot be built.
    pub fn build(self) -> Result<Client> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => {
                let base_url = self.base_url.ok_or_else(|| {
                    ClassifiedError::configuration("Base URL is required")
                })?;
                Arc::new(ReqwestTransport::new(
                    base_url,
                    self.default_headers,
                    self.timeout,
                )?) as Arc<dyn Transport>
            }
        };

        let store = self
            .credential_store
            .unwrap_or_else(|| Arc::new(MemoryCredentialStore::new()));
        if let Some(credential) = self.credential {
            store.store(credential);
        }

        let coordinator = AuthCoordinator::new(
            store,
            Arc::clone(&transport),
            self.session_handler,
            self.refresh_path,
            self.refresh_timeout,
        );

        Ok(Client {
            inner: Arc::new(ClientInner {
                transport,
                coordinator,
                retry_policy: self.retry_policy,
                logger: self.logger,
                notifier: self.notifier,
                timeout: self.timeout,
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
