//! Integration tests using wiremock to simulate the backend.

use callward::hooks::ErrorNotifier;
use callward::{Client, Credential, ErrorCode, RequestDescriptor, RetryPolicy};
use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Deck {
    id: u32,
    name: String,
}

fn deck() -> Deck {
    Deck {
        id: 1,
        name: "Spanish verbs".to_string(),
    }
}

fn envelope(data: serde_json::Value) -> serde_json::Value {
    json!({ "success": true, "data": data, "message": "ok" })
}

#[derive(Default)]
struct RecordingNotifier {
    calls: Mutex<Vec<(String, Option<String>)>>,
}

impl RecordingNotifier {
    fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl ErrorNotifier for RecordingNotifier {
    fn notify_error(&self, message: &str, detail: Option<&str>) {
        self.calls
            .lock()
            .unwrap()
            .push((message.to_string(), detail.map(str::to_string)));
    }
}

struct Harness {
    client: Client,
    notifier: Arc<RecordingNotifier>,
    expirations: Arc<AtomicUsize>,
}

fn harness(server: &MockServer, policy: RetryPolicy) -> Harness {
    let notifier = Arc::new(RecordingNotifier::default());
    let expirations = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&expirations);

    let client = Client::builder()
        .base_url(server.uri())
        .unwrap()
        .retry_policy(policy)
        .credential(Credential::new("T1"))
        .notifier(notifier.clone())
        .session_handler(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();

    Harness {
        client,
        notifier,
        expirations,
    }
}

fn fast_retries() -> RetryPolicy {
    RetryPolicy::builder()
        .base_delay(Duration::from_millis(10))
        .build()
}

#[tokio::test]
async fn test_successful_get_unwraps_envelope() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/decks/1"))
        .and(header("authorization", "Bearer T1"))
        .and(header_exists("x-request-id"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(envelope(json!(deck())))
                .insert_header("x-custom-header", "custom-value"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server, fast_retries());
    let response = h.client.get::<Deck>("/decks/1").await.unwrap();

    assert_eq!(response.data, deck());
    assert_eq!(response.message.as_deref(), Some("ok"));
    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.attempts, 1);
    assert!(!response.was_retried());
    assert!(!response.correlation_id.is_empty());
    assert_eq!(response.header("x-custom-header"), Some("custom-value"));
}

#[tokio::test]
async fn test_post_sends_json_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/decks"))
        .and(wiremock::matchers::body_json(json!(deck())))
        .respond_with(ResponseTemplate::new(201).set_body_json(envelope(json!(deck()))))
        .expect(1)
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server, fast_retries());
    let response = h
        .client
        .post::<Deck, Deck>("/decks", &deck())
        .await
        .unwrap();

    assert_eq!(response.data, deck());
    assert_eq!(response.status.as_u16(), 201);
}

#[tokio::test]
async fn test_correlation_id_is_fresh_per_attempt() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/reports"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let h = harness(
        &mock_server,
        RetryPolicy::builder()
            .base_delay(Duration::from_millis(5))
            .max_retries(2)
            .build(),
    );
    let _ = h.client.get::<serde_json::Value>("/reports").await;

    let requests = mock_server.received_requests().await.unwrap();
    let ids: Vec<_> = requests
        .iter()
        .map(|request| request.headers.get("x-request-id").unwrap().clone())
        .collect();

    assert_eq!(ids.len(), 3);
    assert_ne!(ids[0], ids[1]);
    assert_ne!(ids[1], ids[2]);
}

#[tokio::test]
async fn test_skip_auth_omits_credential() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/public/stats"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({"decks": 3}))))
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server, fast_retries());
    let descriptor = RequestDescriptor::new(Method::GET, "/public/stats").skip_auth();
    let response = h.client.send(descriptor).await.unwrap();

    assert_eq!(response.data["decks"], 3);
    let requests = mock_server.received_requests().await.unwrap();
    assert!(requests[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn test_envelope_failure_is_classified_and_notified() {
    let mock_server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/folders/3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "message": "Folder is locked",
            "code": "FOLDER_LOCKED"
        })))
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server, fast_retries());
    let error = h
        .client
        .delete::<serde_json::Value>("/folders/3")
        .await
        .unwrap_err();

    assert_eq!(error.code, ErrorCode::Other("FOLDER_LOCKED".to_string()));
    assert_eq!(error.message, "Folder is locked");
    assert_eq!(error.path.as_deref(), Some("/folders/3"));
    assert_eq!(
        h.notifier.calls(),
        vec![("Folder is locked".to_string(), None)]
    );
}

#[tokio::test]
async fn test_validation_error_carries_field_messages() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/decks"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "message": "Validation failed",
            "errors": [
                {"field": "name", "message": "is required"},
                {"field": "name", "message": "is too short"}
            ],
            "timestamp": "2024-05-01T12:00:00Z",
            "path": "/decks"
        })))
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server, fast_retries());
    let error = h
        .client
        .post::<Deck, Deck>("/decks", &deck())
        .await
        .unwrap_err();

    assert_eq!(error.code, ErrorCode::ValidationError);
    assert_eq!(error.http_status, Some(422));
    assert_eq!(error.timestamp, "2024-05-01T12:00:00Z");
    assert_eq!(error.field_errors["name"], vec!["is required", "is too short"]);
    assert_eq!(
        h.notifier.calls(),
        vec![(
            "Validation failed".to_string(),
            Some("name: is required, is too short".to_string())
        )]
    );
}

#[tokio::test]
async fn test_skip_error_handling_suppresses_notification() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/decks/9"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Not found"})))
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server, fast_retries());
    let descriptor = RequestDescriptor::new(Method::GET, "/decks/9").skip_error_handling();
    let error = h.client.send(descriptor).await.unwrap_err();

    assert_eq!(error.message, "Not found");
    assert!(h.notifier.calls().is_empty());
}

#[tokio::test]
async fn test_retry_on_503_then_success() {
    let mock_server = MockServer::start().await;
    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    // First three requests fail with 503, fourth succeeds
    Mock::given(method("GET"))
        .and(path("/reports"))
        .respond_with(move |_req: &wiremock::Request| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            if count < 3 {
                ResponseTemplate::new(503).set_body_string("Service unavailable")
            } else {
                ResponseTemplate::new(200).set_body_json(envelope(json!({"rows": 12})))
            }
        })
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server, fast_retries());
    let response = h
        .client
        .get::<serde_json::Value>("/reports")
        .await
        .unwrap();

    assert_eq!(response.data["rows"], 12);
    assert_eq!(response.attempts, 4);
    assert!(response.was_retried());
    assert_eq!(attempt_count.load(Ordering::SeqCst), 4);
    assert!(h.notifier.calls().is_empty());
}

#[tokio::test]
async fn test_retries_exhausted_returns_server_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/reports"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Server error"))
        .expect(3)
        .mount(&mock_server)
        .await;

    let h = harness(
        &mock_server,
        RetryPolicy::builder()
            .base_delay(Duration::from_millis(10))
            .max_retries(2)
            .build(),
    );
    let error = h
        .client
        .get::<serde_json::Value>("/reports")
        .await
        .unwrap_err();

    assert_eq!(error.code, ErrorCode::ServerError);
    assert_eq!(error.http_status, Some(500));
    assert_eq!(h.notifier.calls().len(), 1);
}

#[tokio::test]
async fn test_opted_out_request_is_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/reports"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server, fast_retries());
    let descriptor = RequestDescriptor::new(Method::GET, "/reports").without_retry();
    let error = h.client.send(descriptor).await.unwrap_err();

    assert_eq!(error.code, ErrorCode::ServerError);
}

#[tokio::test]
async fn test_concurrent_401s_share_one_refresh() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(envelope(json!({"access_token": "T2", "expires_in": 900})))
                .set_delay(Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/decks/1"))
        .and(header("authorization", "Bearer T1"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "Token expired"})))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/decks/1"))
        .and(header("authorization", "Bearer T2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!(deck()))))
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server, fast_retries());

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let client = h.client.clone();
            tokio::spawn(async move { client.get::<Deck>("/decks/1").await })
        })
        .collect();

    for handle in handles {
        let response = handle.await.unwrap().unwrap();
        assert_eq!(response.data, deck());
        assert_eq!(response.attempts, 2);
    }

    assert_eq!(h.client.coordinator().refresh_count(), 1);
    assert_eq!(h.client.credential().unwrap().access_token(), "T2");
    assert_eq!(h.expirations.load(Ordering::SeqCst), 0);
    assert!(h.notifier.calls().is_empty());
}

#[tokio::test]
async fn test_failed_refresh_terminates_session_once() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"message": "Refresh token expired", "code": "REFRESH_EXPIRED"}))
                .set_delay(Duration::from_millis(50)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/folders"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server, fast_retries());

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let client = h.client.clone();
            tokio::spawn(async move { client.get::<serde_json::Value>("/folders").await })
        })
        .collect();

    let mut errors = Vec::new();
    for handle in handles {
        errors.push(handle.await.unwrap().unwrap_err());
    }

    assert_eq!(errors[0].code, ErrorCode::Other("REFRESH_EXPIRED".to_string()));
    assert!(errors.iter().all(|error| *error == errors[0]));
    assert!(h.client.credential().is_none());
    assert_eq!(h.expirations.load(Ordering::SeqCst), 1);
    assert!(h.notifier.calls().is_empty());
}

#[tokio::test]
async fn test_second_401_after_refresh_is_not_refreshed_again() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(envelope(json!({"access_token": "T2"}))),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/users/me"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server, fast_retries());
    let error = h
        .client
        .get::<serde_json::Value>("/users/me")
        .await
        .unwrap_err();

    assert_eq!(error.code, ErrorCode::Unauthorized);
    assert_eq!(error.http_status, Some(401));
    assert_eq!(h.client.coordinator().refresh_count(), 1);
    assert!(h.client.credential().is_none());
    assert_eq!(h.expirations.load(Ordering::SeqCst), 1);
    assert!(h.notifier.calls().is_empty());
}

#[tokio::test]
async fn test_residual_401_with_server_code_ends_session_silently() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(envelope(json!({"access_token": "T2"}))),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/users/me"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "message": "Token expired",
            "code": "TOKEN_EXPIRED"
        })))
        .expect(2)
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server, fast_retries());
    let error = h
        .client
        .get::<serde_json::Value>("/users/me")
        .await
        .unwrap_err();

    assert_eq!(error.code, ErrorCode::Other("TOKEN_EXPIRED".to_string()));
    assert_eq!(error.http_status, Some(401));
    assert!(h.client.credential().is_none());
    assert_eq!(h.expirations.load(Ordering::SeqCst), 1);
    assert!(h.notifier.calls().is_empty());
}

#[tokio::test]
async fn test_401_on_refresh_endpoint_does_not_recurse() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server, fast_retries());
    let descriptor = RequestDescriptor::new(Method::POST, "/auth/refresh");
    let error = h.client.send(descriptor).await.unwrap_err();

    assert_eq!(error.code, ErrorCode::Unauthorized);
    assert_eq!(h.client.coordinator().refresh_count(), 0);
}

#[tokio::test]
async fn test_skip_auth_401_is_reported_not_refreshed() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"message": "Invalid email or password"})),
        )
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server, fast_retries());
    let descriptor = RequestDescriptor::new(Method::POST, "/auth/login")
        .with_json(&json!({"email": "a@b.c", "password": "nope"}))
        .unwrap()
        .skip_auth();
    let error = h.client.send(descriptor).await.unwrap_err();

    assert_eq!(error.code, ErrorCode::Unauthorized);
    assert_eq!(h.client.coordinator().refresh_count(), 0);
    assert_eq!(h.expirations.load(Ordering::SeqCst), 0);
    assert_eq!(
        h.notifier.calls(),
        vec![("Invalid email or password".to_string(), None)]
    );
}

#[tokio::test]
async fn test_deadline_exceeded_is_timeout() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/decks/1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(envelope(json!(deck())))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server, fast_retries());
    let descriptor =
        RequestDescriptor::new(Method::GET, "/decks/1").with_timeout(Duration::from_millis(50));
    let error = h.client.send(descriptor).await.unwrap_err();

    assert_eq!(error.code, ErrorCode::Timeout);
}

#[tokio::test]
async fn test_network_error_has_status_zero() {
    let client = Client::builder()
        .base_url("http://127.0.0.1:1")
        .unwrap()
        .build()
        .unwrap();

    let error = client
        .get::<serde_json::Value>("/decks")
        .await
        .unwrap_err();

    assert_eq!(error.code, ErrorCode::NetworkError);
    assert_eq!(error.http_status, Some(0));
}

#[tokio::test]
async fn test_payload_decode_failure_is_unknown_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/decks/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({"id": "one"}))))
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server, fast_retries());
    let error = h.client.get::<Deck>("/decks/1").await.unwrap_err();

    assert_eq!(error.code, ErrorCode::UnknownError);
    assert!(error.message.starts_with("Failed to decode response"));
    assert_eq!(h.notifier.calls().len(), 1);
}

#[tokio::test]
async fn test_all_http_methods() {
    let mock_server = MockServer::start().await;

    for verb in ["GET", "PUT", "PATCH"] {
        Mock::given(method(verb))
            .and(path("/decks/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!(deck()))))
            .mount(&mock_server)
            .await;
    }

    Mock::given(method("DELETE"))
        .and(path("/decks/1"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&mock_server)
        .await;

    let h = harness(&mock_server, fast_retries());

    let _ = h.client.get::<Deck>("/decks/1").await.unwrap();
    let _ = h
        .client
        .put::<Deck, Deck>("/decks/1", &deck())
        .await
        .unwrap();
    let _ = h
        .client
        .patch::<Deck, Deck>("/decks/1", &deck())
        .await
        .unwrap();

    // An empty 204 body unwraps to `null`.
    let deleted = h.client.delete::<()>("/decks/1").await.unwrap();
    assert_eq!(deleted.status.as_u16(), 204);
}

#[tokio::test]
async fn test_missing_base_url_is_configuration_error() {
    let error = Client::builder().build().err().unwrap();
    assert_eq!(error.code, ErrorCode::ConfigurationError);
}
