//! Test utilities and fixtures for keyhold integration tests

#![allow(dead_code)]

use std::net::SocketAddr;

use axum::{
    Router,
    body::{Body, to_bytes},
    extract::ConnectInfo,
    http::{HeaderMap, Method, Request, StatusCode},
};
use rusqlite::Connection;
use serde_json::Value;
use tower::ServiceExt;

pub use keyhold::audit::AuditLogger;
pub use keyhold::config::Config;
pub use keyhold::db::{AppState, DbPool, create_memory_pool, init_audit_db, init_db, queries};
pub use keyhold::handlers;
pub use keyhold::jwt;
pub use keyhold::models::*;
pub use keyhold::rate_limit::RateLimitConfig;

pub const ADMIN_SECRET: &str = "test-admin-secret";
pub const CLIENT_ADDR: &str = "203.0.113.10:40000";

/// Config with rate limiting off and no signing key.
pub fn test_config() -> Config {
    Config {
        admin_secret: ADMIN_SECRET.to_string(),
        admin_rate_limit: RateLimitConfig::disabled(),
        check_rate_limit: RateLimitConfig::disabled(),
        ..Config::from_vars(|_| None)
    }
}

/// Same as [`test_config`] with a fresh signing key pair.
pub fn signing_config() -> (Config, String) {
    let (private_key, public_key) = jwt::generate_keypair();
    let config = Config {
        signing_private_key: Some(private_key),
        signing_public_key: Some(public_key.clone()),
        ..test_config()
    };
    (config, public_key)
}

/// Create an in-memory test database with schema initialized
pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
    init_db(&conn).expect("Failed to initialize schema");
    conn
}

/// Application state over fresh in-memory databases. Must be called
/// inside a tokio runtime (the audit writer is spawned).
pub fn test_state(config: &Config) -> AppState {
    let db = create_memory_pool().expect("Failed to create db pool");
    init_db(&db.get().unwrap()).expect("Failed to initialize schema");

    let audit = create_memory_pool().expect("Failed to create audit pool");
    init_audit_db(&audit.get().unwrap()).expect("Failed to initialize audit schema");

    let (audit_log, _writer) = AuditLogger::spawn(audit.clone(), config.audit_log_enabled);
    AppState::new(db, audit, audit_log, config)
}

/// Router whose requests all appear to come from `addr`.
pub fn app_from(state: &AppState, addr: &str) -> Router {
    let addr: SocketAddr = addr.parse().expect("invalid socket address");
    handlers::app(state.clone()).layer(axum::Extension(ConnectInfo(addr)))
}

/// Router and state with the default test config.
pub fn test_app() -> (Router, AppState) {
    let state = test_state(&test_config());
    (app_from(&state, CLIENT_ADDR), state)
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
    pub raw: Vec<u8>,
}

pub async fn send(app: &Router, request: Request<Body>) -> TestResponse {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let raw = to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec();
    let body = serde_json::from_slice(&raw).unwrap_or(Value::Null);
    TestResponse {
        status,
        headers,
        body,
        raw,
    }
}

/// Authenticated admin request. `key` goes in `X-License-Key`.
pub fn admin_request(method: Method, uri: &str, key: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", format!("Bearer {}", ADMIN_SECRET));
    if let Some(key) = key {
        builder = builder.header("X-License-Key", key);
    }
    match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub fn check_request(key: Option<&str>, query: &str) -> Request<Body> {
    let uri = if query.is_empty() {
        "/check".to_string()
    } else {
        format!("/check?{}", query)
    };
    let mut builder = Request::builder().method(Method::GET).uri(uri).header("User-Agent", "keyhold-tests");
    if let Some(key) = key {
        builder = builder.header("X-License-Key", key);
    }
    builder.body(Body::empty()).unwrap()
}

/// Create a product through the API and return its id.
pub async fn create_product(app: &Router, body: Value) -> String {
    let res = send(app, admin_request(Method::POST, "/admin/products", None, Some(body))).await;
    assert_eq!(res.status, StatusCode::CREATED, "create product: {}", res.body);
    res.body["id"].as_str().unwrap().to_string()
}

/// Generate a license through the API and return the response body.
pub async fn generate_license(app: &Router, body: Value) -> Value {
    let res = send(app, admin_request(Method::POST, "/admin/keys", None, Some(body))).await;
    assert_eq!(res.status, StatusCode::CREATED, "generate license: {}", res.body);
    res.body
}

pub async fn check(app: &Router, key: &str, query: &str) -> TestResponse {
    send(app, check_request(Some(key), query)).await
}
