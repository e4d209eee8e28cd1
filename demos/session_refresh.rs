//! Demonstrates transparent credential refresh.
//!
//! A local mock backend rejects the initial access token, hands out a fresh one
//! from `/auth/refresh`, and then serves the original requests. Four requests
//! are sent concurrently; only one refresh call is made.
//!
//! Run with: `cargo run --example session_refresh`

use callward::{Client, Credential, ErrorCode, RetryPolicy};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Deserialize)]
struct Folder {
    id: u32,
    name: String,
}

#[tokio::main]
async fn main() -> Result<(), callward::ClassifiedError> {
    tracing_subscriber::fmt()
        .with_env_filter("callward=debug,session_refresh=info")
        .init();

    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "success": true,
                    "data": { "access_token": "fresh-token", "expires_in": 900 }
                }))
                .set_delay(Duration::from_millis(100)),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/folders/7"))
        .and(header("authorization", "Bearer fresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "id": 7, "name": "Languages" },
            "message": "Folder loaded"
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/folders/7"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "message": "Access token expired"
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/folders/404"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "message": "Folder not found",
            "code": "FOLDER_NOT_FOUND"
        })))
        .mount(&server)
        .await;

    let client = Client::builder()
        .base_url(server.uri())?
        .timeout(Duration::from_secs(5))
        .retry_policy(
            RetryPolicy::builder()
                .base_delay(Duration::from_millis(200))
                .max_retries(2)
                .build(),
        )
        .session_handler(|| println!("Session expired: redirecting to sign-in"))
        .build()?;

    client.login(Credential::new("stale-token"));

    println!("=== Concurrent requests with an expired token ===");
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.get::<Folder>("/folders/7").await })
        })
        .collect();

    for handle in handles {
        match handle.await {
            Ok(Ok(response)) => println!(
                "Folder {} '{}' after {} attempt(s), correlation id {}",
                response.data.id, response.data.name, response.attempts, response.correlation_id
            ),
            Ok(Err(error)) => println!("Request failed: {}", error),
            Err(join_error) => println!("Task failed: {}", join_error),
        }
    }
    println!(
        "Refresh calls made: {}",
        client.coordinator().refresh_count()
    );
    println!();

    println!("=== Classified error ===");
    match client.get::<Folder>("/folders/404").await {
        Ok(response) => println!("Unexpected success: {:?}", response.data),
        Err(error) if error.code == ErrorCode::Other("FOLDER_NOT_FOUND".to_string()) => {
            println!("{} (status {:?}, at {})", error.message, error.http_status, error.timestamp)
        }
        Err(error) => println!("Other error: {}", error),
    }

    Ok(())
}
