//! E2E Upload Flow Tests
//!
//! Full path from an HTTP multipart request through the relay to the fake
//! backend and back.
//!
//! ## Test Coverage
//!
//! - Successful upload returns filename and public URL
//! - The backend sees the `image` field and the secret cookie
//! - History lists uploads most recent first
//! - Health and metrics endpoints

use super::common::{E2ETestEnv, BACKEND_SECRET};
use serde_json::Value;
use wiremock::matchers::{body_string_contains, header, method};
use wiremock::{Mock, ResponseTemplate};

/// Test: Upload returns the public URL
#[tokio::test]
async fn test_upload_returns_public_url() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");
    env.backend_replies(200, r#"{"code":1,"message":"https://cdn.example/f/abc123"}"#)
        .await;

    let response = env
        .upload("cat.jpg", "image/jpeg", b"\xff\xd8\xff\xe0")
        .await
        .expect("Request failed");

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["filename"], "cat.jpg");
    assert_eq!(body["url"], "https://host.example/f/abc123");
}

/// Test: Backend receives the file as `image` with the secret cookie
#[tokio::test]
async fn test_backend_receives_image_field_and_cookie() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");
    Mock::given(method("POST"))
        .and(header("cookie", format!("p={}", BACKEND_SECRET).as_str()))
        .and(body_string_contains("name=\"image\""))
        .and(body_string_contains("filename=\"clip.mp4\""))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(r#"{"code":1,"message":"/f/clip"}"#),
        )
        .expect(1)
        .mount(&env.backend)
        .await;

    let response = env
        .upload("clip.mp4", "video/mp4", b"mp4 data")
        .await
        .expect("Request failed");

    assert_eq!(response.status(), 200);
    env.backend.verify().await;
}

/// Test: History lists uploads newest first
#[tokio::test]
async fn test_history_after_uploads() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");
    env.backend_replies(200, r#"{"code":1,"message":"/f/x"}"#).await;

    for name in ["first.png", "second.png"] {
        let response = env.upload(name, "image/png", b"png").await.unwrap();
        assert_eq!(response.status(), 200);
    }

    let response = env.get("/api/history").await.unwrap();
    assert_eq!(response.status(), 200);

    let entries: Vec<Value> = response.json().await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["filename"], "second.png");
    assert_eq!(entries[1]["filename"], "first.png");
    assert_eq!(entries[0]["url"], "https://host.example/f/x");
    assert!(entries[0].get("created_at").is_some());
    assert!(entries[0].get("id").is_none());
}

/// Test: Empty history is an empty array
#[tokio::test]
async fn test_empty_history() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");

    let entries: Vec<Value> = env.get("/api/history").await.unwrap().json().await.unwrap();
    assert!(entries.is_empty());
}

/// Test: Health check
#[tokio::test]
async fn test_health_check() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");

    let response = env.get("/health").await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "ok");
}

/// Test: Metrics are exposed after an upload
#[tokio::test]
async fn test_metrics_endpoint() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");
    env.backend_replies(200, r#"{"code":1,"message":"/f/m"}"#).await;
    env.upload("m.gif", "image/gif", b"GIF89a").await.unwrap();

    let response = env.get("/metrics").await.unwrap();
    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("relay_uploads_total"));
    assert!(body.contains("relay_history_records_total"));
}
