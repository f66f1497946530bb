//! E2E Error Scenario Tests
//!
//! Every failure reaches the caller as `{"kind", "detail"}` with a matching
//! status code, and never adds a history record.
//!
//! ## Test Coverage
//!
//! - Backend rejection, empty and malformed replies
//! - Backend error status and unreachable backend
//! - Non-media files and malformed requests
//! - Oversized bodies, unknown routes and wrong methods

use super::common::{generate_test_data, E2ETestEnv};
use serde_json::Value;
use wiremock::matchers::method;
use wiremock::{Mock, ResponseTemplate};

async fn history_len(env: &E2ETestEnv) -> usize {
    let entries: Vec<Value> = env.get("/api/history").await.unwrap().json().await.unwrap();
    entries.len()
}

async fn error_body(response: reqwest::Response) -> (u16, Value) {
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

/// Test: Backend rejection carries the backend message
#[tokio::test]
async fn test_backend_rejection() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");
    env.backend_replies(200, r#"{"code":0,"message":"quota exceeded"}"#)
        .await;

    let (status, body) = error_body(env.upload("cat.jpg", "image/jpeg", b"jpeg").await.unwrap()).await;

    assert_eq!(status, 500);
    assert_eq!(body["kind"], "backend_rejected");
    assert!(body["detail"].as_str().unwrap().contains("quota exceeded"));
    assert_eq!(history_len(&env).await, 0);
}

/// Test: Empty backend reply
#[tokio::test]
async fn test_empty_backend_reply() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");
    env.backend_replies(200, "").await;

    let (status, body) = error_body(env.upload("cat.jpg", "image/jpeg", b"jpeg").await.unwrap()).await;

    assert_eq!(status, 500);
    assert_eq!(body["kind"], "empty_response");
    assert_eq!(history_len(&env).await, 0);
}

/// Test: HTML reply is malformed and its content is not echoed
#[tokio::test]
async fn test_malformed_backend_reply() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");
    env.backend_replies(200, "<html>secret admin page</html>").await;

    let (status, body) = error_body(env.upload("cat.jpg", "image/jpeg", b"jpeg").await.unwrap()).await;

    assert_eq!(status, 500);
    assert_eq!(body["kind"], "malformed_response");
    assert!(!body["detail"].as_str().unwrap().contains("secret admin page"));
}

/// Test: Success without a location
#[tokio::test]
async fn test_success_without_location() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");
    env.backend_replies(200, r#"{"code":1,"message":""}"#).await;

    let (status, body) = error_body(env.upload("cat.jpg", "image/jpeg", b"jpeg").await.unwrap()).await;

    assert_eq!(status, 500);
    assert_eq!(body["kind"], "no_location");
}

/// Test: Backend error status
#[tokio::test]
async fn test_backend_error_status() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");
    env.backend_replies(502, "bad gateway").await;

    let (status, body) = error_body(env.upload("cat.jpg", "image/jpeg", b"jpeg").await.unwrap()).await;

    assert_eq!(status, 500);
    assert_eq!(body["kind"], "backend_status_error");
}

/// Test: Unreachable backend is a gateway error
#[tokio::test]
async fn test_unreachable_backend() {
    let env = E2ETestEnv::with_endpoint("http://127.0.0.1:1/api")
        .await
        .expect("Failed to create test env");

    let (status, body) = error_body(env.upload("cat.jpg", "image/jpeg", b"jpeg").await.unwrap()).await;

    assert_eq!(status, 502);
    assert_eq!(body["kind"], "transport_error");
    assert_eq!(history_len(&env).await, 0);
}

/// Test: Non-media upload never reaches the backend
#[tokio::test]
async fn test_non_media_rejected_without_outbound_call() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&env.backend)
        .await;

    let (status, body) = error_body(env.upload("notes.txt", "text/plain", b"hello").await.unwrap()).await;

    assert_eq!(status, 400);
    assert_eq!(body["kind"], "validation_error");
    assert_eq!(history_len(&env).await, 0);
    env.backend.verify().await;
}

/// Test: Multipart body without a `file` part
#[tokio::test]
async fn test_missing_file_part() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");

    let form = reqwest::multipart::Form::new().text("other", "value");
    let response = env
        .client
        .post(format!("{}/api/upload", env.base_url()))
        .multipart(form)
        .send()
        .await
        .unwrap();

    let (status, body) = error_body(response).await;
    assert_eq!(status, 400);
    assert_eq!(body["kind"], "invalid_request");
}

/// Test: Non-multipart body
#[tokio::test]
async fn test_non_multipart_body() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");

    let response = env
        .client
        .post(format!("{}/api/upload", env.base_url()))
        .header("content-type", "application/json")
        .body("{}")
        .send()
        .await
        .unwrap();

    let (status, body) = error_body(response).await;
    assert_eq!(status, 400);
    assert_eq!(body["kind"], "invalid_request");
}

/// Test: Body over the configured limit
///
/// The server answers before reading the rest of the body, so the client may
/// see the 413 or a reset connection. Either way nothing is relayed.
#[tokio::test]
async fn test_payload_too_large() {
    let env = E2ETestEnv::with_limit(1024)
        .await
        .expect("Failed to create test env");
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&env.backend)
        .await;

    // Just over the limit, so the whole body is usually written before the answer.
    let part = reqwest::multipart::Part::bytes(generate_test_data(1200))
        .file_name("big.png")
        .mime_str("image/png")
        .unwrap();
    let form = reqwest::multipart::Form::new().part("file", part);

    let response = env
        .client
        .post(format!("{}/api/upload", env.base_url()))
        .multipart(form)
        .send()
        .await;

    match response {
        Ok(response) => {
            let (status, body) = error_body(response).await;
            assert_eq!(status, 413);
            assert_eq!(body["kind"], "payload_too_large");
        }
        Err(e) => {
            assert!(!e.is_timeout(), "Server should answer promptly: {}", e);
            assert!(e.is_request() || e.is_body(), "Unexpected client error: {}", e);
        }
    }

    assert_eq!(history_len(&env).await, 0);
    env.backend.verify().await;
}

/// Test: Unknown route
#[tokio::test]
async fn test_unknown_route() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");

    let response = env.get("/does-not-exist").await.unwrap();
    assert_eq!(response.status(), 404);
}

/// Test: Wrong method on a known route
#[tokio::test]
async fn test_wrong_method() {
    let env = E2ETestEnv::new().await.expect("Failed to create test env");

    let response = env.get("/api/upload").await.unwrap();
    assert_eq!(response.status(), 405);
    assert_eq!(response.headers()["allow"], "POST");
}
