//! # Callward - an authenticated HTTP request pipeline
//!
//! Callward is the layer every outgoing API call passes through. It attaches the
//! bearer credential and a correlation id, unwraps the backend's
//! `{ success, data, message }` envelope, transparently refreshes an expired
//! credential (exactly once, however many requests noticed at the same time),
//! retries transient failures under a bounded linear backoff, and turns whatever
//! is left into one stable [`ClassifiedError`] shape.
//!
//! ## Quick Start
//!
//! ```no_run
//! use callward::{Client, Credential, RetryPolicy};
//! use serde::Deserialize;
//! use std::time::Duration;
//!
//! #[derive(Deserialize)]
//! struct Deck {
//!     id: u64,
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), callward::ClassifiedError> {
//!     let client = Client::builder()
//!         .base_url("https://api.example.com")?
//!         .timeout(Duration::from_secs(30))
//!         .retry_policy(RetryPolicy::builder()
//!             .base_delay(Duration::from_millis(250))
//!             .max_retries(3)
//!             .build())
//!         .session_handler(|| println!("Session expired, redirecting to login"))
//!         .build()?;
//!
//!     client.login(Credential::new("access-token"));
//!
//!     let deck = client.get::<Deck>("/decks/42").await?;
//!     println!("{} ({} attempt(s))", deck.data.name, deck.attempts);
//!     Ok(())
//! }
//! ```
//!
//! ## Credential refresh
//!
//! A 401 on an authenticated request makes the [`AuthCoordinator`] call
//! `POST /auth/refresh` (the refresh credential travels as a cookie). Requests
//! that fail with 401 while that call is outstanding are queued and replayed in
//! arrival order once it succeeds. If it fails, every queued request resolves to
//! the same error, the credential is cleared, and the session handler fires once.
//! A request is replayed after a refresh at most once.
//!
//! ## Error Handling
//!
//! ```no_run
//! use callward::{Client, ErrorCode};
//!
//! # async fn example() -> Result<(), callward::ClassifiedError> {
//! # let client = Client::builder().base_url("https://api.example.com")?.build()?;
//! match client.get::<serde_json::Value>("/folders").await {
//!     Ok(response) => println!("Folders: {}", response.data),
//!     Err(error) if error.code == ErrorCode::ValidationError => {
//!         for (field, messages) in &error.field_errors {
//!             eprintln!("{}: {}", field, messages.join(", "));
//!         }
//!     }
//!     Err(error) => eprintln!("{} ({:?})", error.message, error.http_status),
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod classify;
mod client;
pub mod credential;
pub mod deadline;
mod descriptor;
mod envelope;
mod error;
pub mod hooks;
mod response;
pub mod retry;
pub mod transport;

pub use auth::{AuthCoordinator, Intercept};
pub use client::{Client, ClientBuilder};
pub use credential::{Credential, CredentialStore, MemoryCredentialStore};
pub use descriptor::{RequestDescriptor, RequestFlags};
pub use error::{ClassifiedError, ErrorCode, Failure, Result};
pub use hooks::{ErrorNotifier, RequestLogger, SessionHandler};
pub use response::Response;
pub use retry::RetryPolicy;
pub use transport::{HttpRequest, HttpResponse, Transport};
