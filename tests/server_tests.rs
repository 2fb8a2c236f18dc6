//! End-to-end tests over a real socket.
//!
//! Each test binds the application router to an ephemeral port and talks to
//! it with `reqwest`, so client IPs come from the connection itself.
//!
//! Run with: `cargo test --test server_tests`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use request_pipeline::auth::BasicAuthenticator;
use request_pipeline::limiter::RateConfig;
use request_pipeline::logger::MemoryLogger;
use request_pipeline::{AppState, Config, build_router};

const USERNAME: &str = "admin";
const PASSWORD: &str = "s3cret";

/// Test fixture that serves the application on an ephemeral port.
struct TestServer {
    base_url: String,
    client: Client,
    state: AppState,
    logger: std::sync::Arc<MemoryLogger>,
}

impl TestServer {
    async fn start() -> Self {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            jwt_secret: Some("integration-secret".to_string()),
            basic_auth_username: Some(USERNAME.to_string()),
            basic_auth_password: Some(PASSWORD.to_string()),
            rate_limit_operations: HashMap::from([(
                "POST:/echo".to_string(),
                RateConfig::new(0.0, 2),
            )]),
            log_request_redact: vec!["headers.authorization".to_string(), "body.secret".to_string()],
            metrics_port: 0,
            ..Config::default()
        };
        config.validate().expect("test config must be valid");

        let logger = MemoryLogger::new();
        let state = AppState::new(config, logger.clone());
        let app = build_router(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to ephemeral port");
        let addr = listener.local_addr().expect("Failed to get local address");

        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .expect("server error");
        });

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: format!("http://{addr}"),
            client,
            state,
            logger,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn basic_header(&self) -> String {
        BasicAuthenticator::new(USERNAME, PASSWORD).header_value()
    }

    async fn issue_tokens(&self, subject: &str) -> Value {
        let response = self
            .client
            .post(self.url("/tokens"))
            .header("authorization", self.basic_header())
            .json(&json!({ "subject": subject }))
            .send()
            .await
            .expect("token request failed");
        assert_eq!(response.status(), StatusCode::OK);
        response.json().await.expect("Failed to parse response")
    }
}

// ============================================================================
// Health & Echo
// ============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let server = TestServer::start().await;

    let response = server
        .client
        .get(server.url("/health"))
        .header("x-request-id", "health-1")
        .send()
        .await
        .expect("Health request failed");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-request-id"], "health-1");
    assert_eq!(response.headers()["content-type"], "application/json");

    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "healthy");
    assert!(body.get("version").is_some());
    assert!(body.get("timestamp").is_some());

    server.state.shutdown().await;
}

#[tokio::test]
async fn test_echo_logs_peer_address_and_redacts_secret() {
    let server = TestServer::start().await;

    let response = server
        .client
        .post(server.url("/echo"))
        .header("idempotency-key", "idem-1")
        .json(&json!({ "message": "hi", "secret": "do-not-log" }))
        .send()
        .await
        .expect("Echo request failed");

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "hi");
    assert_eq!(body["secret"], "do-not-log");
    assert_eq!(body["idempotency_key"], "idem-1");
    assert!(body["user_id"].is_null());

    let entry = server
        .logger
        .find("[in-http] POST ")
        .pop()
        .expect("request was logged");
    assert!(
        entry.fields.get("remote_address").unwrap().as_str().unwrap().starts_with("127.0.0.1:")
    );
    let logged = entry.fields.get("request").unwrap()["body"].as_str().unwrap().to_string();
    assert!(!logged.contains("do-not-log"));
    assert!(logged.contains("*REDACTED*"));

    server.state.shutdown().await;
}

#[tokio::test]
async fn test_echo_validation_error() {
    let server = TestServer::start().await;

    let response = server
        .client
        .post(server.url("/echo"))
        .json(&json!({ "message": "" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "message is required");
    assert_eq!(body["code"], 422);

    server.state.shutdown().await;
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_token_flow() {
    let server = TestServer::start().await;

    let tokens = server.issue_tokens("42").await;
    assert_eq!(tokens["token_type"], "Bearer");
    let access = tokens["access_token"].as_str().unwrap();
    let refresh = tokens["refresh_token"].as_str().unwrap();

    let me: Value = server
        .client
        .get(server.url("/me"))
        .bearer_auth(access)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me["user_id"], 42);

    // a refresh token is not an access token
    let response = server
        .client
        .get(server.url("/me"))
        .bearer_auth(refresh)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let renewed: Value = server
        .client
        .post(server.url("/tokens/refresh"))
        .bearer_auth(refresh)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(renewed["access_token"].is_string());
    assert!(renewed.get("refresh_token").is_none());

    server.state.shutdown().await;
}

#[tokio::test]
async fn test_me_accepts_basic_and_rejects_anonymous() {
    let server = TestServer::start().await;

    let response = server
        .client
        .get(server.url("/me"))
        .header("authorization", server.basic_header())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = server.client.get(server.url("/me")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Unauthorized");
    let data = body["data"].as_str().unwrap();
    assert!(data.contains("invalid jwt"));
    assert!(data.contains("invalid basic"));

    server.state.shutdown().await;
}

#[tokio::test]
async fn test_tokens_require_basic_credentials() {
    let server = TestServer::start().await;

    let response = server
        .client
        .post(server.url("/tokens"))
        .basic_auth(USERNAME, Some("wrong"))
        .json(&json!({ "subject": "1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    server.state.shutdown().await;
}

// ============================================================================
// Rate Limiting
// ============================================================================

#[tokio::test]
async fn test_rate_limit_returns_429_per_operation() {
    let server = TestServer::start().await;

    for _ in 0..2 {
        let response = server
            .client
            .post(server.url("/echo"))
            .json(&json!({ "message": "ok" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = server
        .client
        .post(server.url("/echo"))
        .json(&json!({ "message": "ok" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], 429);

    // other operations keep their own bucket
    let response = server.client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    server.state.shutdown().await;
}

#[tokio::test]
async fn test_cors_preflight() {
    let server = TestServer::start().await;

    let response = server
        .client
        .request(reqwest::Method::OPTIONS, server.url("/echo"))
        .header("origin", "https://app.example.com")
        .header("access-control-request-method", "POST")
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());
    assert_eq!(response.headers()["access-control-allow-origin"], "*");

    server.state.shutdown().await;
}
