//! API Integration Tests
//!
//! Note: Tests marked with #[ignore] require a real database connection.
//! To run them, set DATABASE_URL and run: cargo test -- --ignored
//!
//! Author: hephaex@gmail.com

use authgate_api::auth::{AccessTokenCodec, ACCESS_TOKEN_TYPE};
use authgate_api::{create_router, create_router_for_testing, test_state, TEST_JWT_SECRET};
use authgate_core::AppConfig;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Helper to create a test request
fn create_json_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json");

    match body {
        Some(json_body) => builder
            .body(Body::from(serde_json::to_string(&json_body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn authorized_request(method: &str, uri: &str, token: &str, body: Option<Value>) -> Request<Body> {
    let mut request = create_json_request(method, uri, body);
    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {token}").parse().unwrap(),
    );
    request
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, json)
}

async fn register(
    app: &Router,
    username: &str,
    email: &str,
    password: &str,
) -> (StatusCode, Value) {
    send(
        app,
        create_json_request(
            "POST",
            "/api/v1/auth/register",
            Some(json!({ "username": username, "email": email, "password": password })),
        ),
    )
    .await
}

async fn login(app: &Router, username: &str, password: &str) -> (StatusCode, Value) {
    send(
        app,
        create_json_request(
            "POST",
            "/api/v1/auth/login",
            Some(json!({ "username": username, "password": password })),
        ),
    )
    .await
}

async fn refresh(app: &Router, refresh_token: &str) -> (StatusCode, Value) {
    send(
        app,
        create_json_request(
            "POST",
            "/api/v1/auth/refresh",
            Some(json!({ "refresh_token": refresh_token })),
        ),
    )
    .await
}

/// Register alice and log in, returning the token response
async fn logged_in(app: &Router) -> Value {
    let (status, _) = register(app, "alice", "alice@example.com", "correct horse battery").await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, json) = login(app, "alice", "correct horse battery").await;
    assert_eq!(status, StatusCode::OK);
    json
}

// =============================================================================
// Health Check Tests
// =============================================================================

#[tokio::test]
async fn test_health_check() {
    let app = create_router_for_testing();

    let (status, json) = send(
        &app,
        Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["storage"], "memory");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_openapi_document_served() {
    let app = create_router_for_testing();

    let (status, json) = send(
        &app,
        Request::builder()
            .uri("/api-docs/openapi.json")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["paths"]["/api/v1/auth/register"].is_object());
}

// =============================================================================
// Registration Tests
// =============================================================================

#[tokio::test]
async fn test_register_success() {
    let app = create_router_for_testing();

    let (status, json) =
        register(&app, "alice", "alice@example.com", "correct horse battery").await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["user"]["username"], "alice");
    assert_eq!(json["user"]["email"], "alice@example.com");
    assert!(json["user"]["id"].is_i64());
    assert!(json["user"].get("password_hash").is_none());
}

#[tokio::test]
async fn test_register_weak_password_lists_every_violation() {
    let app = create_router_for_testing();

    let (status, json) = register(&app, "alice123456", "alice@example.com", "123456").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "VALIDATION_ERROR");
    assert_eq!(
        json["details"]["password"],
        json!([
            "password is too short, should be at least 8 characters long",
            "password is too similar to the user attribute",
            "the password cannot be entirely numeric",
            "password is too common"
        ])
    );
}

#[tokio::test]
async fn test_register_invalid_shape() {
    let app = create_router_for_testing();

    let (status, json) = register(&app, "", "not-an-email", "correct horse battery").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["details"]["username"].is_array());
    assert!(json["details"]["email"].is_array());
}

#[tokio::test]
async fn test_register_duplicate_conflict() {
    let app = create_router_for_testing();

    let (status, _) = register(&app, "alice", "alice@example.com", "correct horse battery").await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, json) =
        register(&app, "alice", "other@example.com", "correct horse battery").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["details"]["username"], json!(["username is already in use"]));
}

// =============================================================================
// Login and Token Flow Tests
// =============================================================================

#[tokio::test]
async fn test_login_returns_token_pair() {
    let app = create_router_for_testing();

    let json = logged_in(&app).await;

    assert_eq!(json["token_type"], "Bearer");
    assert_eq!(json["expires_in"], 900);
    assert!(json["access_token"].is_string());
    assert!(json["refresh_token"].is_string());
}

#[tokio::test]
async fn test_login_wrong_password_and_unknown_user_match() {
    let app = create_router_for_testing();
    logged_in(&app).await;

    let (status_a, json_a) = login(&app, "alice", "not the password").await;
    let (status_b, json_b) = login(&app, "mallory", "not the password").await;

    assert_eq!(status_a, StatusCode::UNAUTHORIZED);
    assert_eq!(status_b, StatusCode::UNAUTHORIZED);
    assert_eq!(json_a, json_b);
}

#[tokio::test]
async fn test_me_with_access_token() {
    let app = create_router_for_testing();
    let tokens = logged_in(&app).await;
    let access = tokens["access_token"].as_str().unwrap();

    let (status, json) =
        send(&app, authorized_request("GET", "/api/v1/auth/me", access, None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["username"], "alice");
}

#[tokio::test]
async fn test_refresh_rotates_and_rejects_reuse() {
    let app = create_router_for_testing();
    let tokens = logged_in(&app).await;
    let first = tokens["refresh_token"].as_str().unwrap();

    let (status, rotated) = refresh(&app, first).await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(rotated["refresh_token"], tokens["refresh_token"]);

    // The new access token is admitted by the gate
    let access = rotated["access_token"].as_str().unwrap();
    let (status, _) = send(&app, authorized_request("GET", "/api/v1/auth/me", access, None)).await;
    assert_eq!(status, StatusCode::OK);

    // The consumed token cannot be used again
    let (status, _) = refresh(&app, first).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // The replacement still works exactly once
    let second = rotated["refresh_token"].as_str().unwrap();
    let (status, _) = refresh(&app, second).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_refresh_unknown_token() {
    let app = create_router_for_testing();

    let (status, json) = refresh(&app, "never-issued").await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_refresh_token_is_not_an_access_token() {
    let app = create_router_for_testing();
    let tokens = logged_in(&app).await;
    let refresh_token = tokens["refresh_token"].as_str().unwrap();

    let (status, _) = send(
        &app,
        authorized_request("GET", "/api/v1/auth/me", refresh_token, None),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_revokes_refresh_token() {
    let app = create_router_for_testing();
    let tokens = logged_in(&app).await;
    let access = tokens["access_token"].as_str().unwrap();
    let refresh_token = tokens["refresh_token"].as_str().unwrap();

    let (status, _) = send(
        &app,
        authorized_request(
            "POST",
            "/api/v1/auth/logout",
            access,
            Some(json!({ "refresh_token": refresh_token })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = refresh(&app, refresh_token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// =============================================================================
// Verification Gate Tests
// =============================================================================

#[tokio::test]
async fn test_protected_route_requires_header() {
    let app = create_router_for_testing();

    let (status, json) = send(&app, create_json_request("GET", "/api/v1/auth/me", None)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["message"], "Authorization header is missing or invalid");
}

#[tokio::test]
async fn test_protected_route_rejects_wrong_scheme() {
    let app = create_router_for_testing();
    let tokens = logged_in(&app).await;
    let access = tokens["access_token"].as_str().unwrap();

    let mut request = create_json_request("GET", "/api/v1/auth/me", None);
    request
        .headers_mut()
        .insert("Authorization", format!("Token {access}").parse().unwrap());
    let (status, json) = send(&app, request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["message"], "Authorization header is missing or invalid");
}

#[tokio::test]
async fn test_protected_route_rejects_garbage_token() {
    let app = create_router_for_testing();

    let (status, json) = send(
        &app,
        authorized_request("GET", "/api/v1/auth/me", "not.a.jwt", None),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        json["message"],
        "Unable to extract claims or token type is wrong"
    );
}

#[tokio::test]
async fn test_expired_token_has_distinct_reason() {
    let app = create_router_for_testing();
    let codec = AccessTokenCodec::new(TEST_JWT_SECRET.as_bytes());
    let issued_at = Utc::now().timestamp() - 3600;
    let expired = codec
        .issue_at(1, ACCESS_TOKEN_TYPE, Duration::from_secs(60), issued_at)
        .unwrap();

    let (status, json) =
        send(&app, authorized_request("GET", "/api/v1/auth/me", &expired, None)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], "TOKEN_EXPIRED");
    assert_eq!(json["message"], "Your token is expired");
}

#[tokio::test]
async fn test_token_signed_with_other_secret_rejected() {
    let app = create_router_for_testing();
    let forged = AccessTokenCodec::new(b"some-other-secret-0123456789abcdefgh")
        .issue(1, Duration::from_secs(60))
        .unwrap();

    let (status, json) =
        send(&app, authorized_request("GET", "/api/v1/auth/me", &forged, None)).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_custom_header_and_scheme() {
    let mut config = AppConfig::default();
    config.auth.header_name = "X-Api-Token".to_string();
    config.auth.auth_scheme = "JWT".to_string();
    let app = create_router(Arc::new(test_state(config)));
    let tokens = logged_in(&app).await;
    let access = tokens["access_token"].as_str().unwrap();

    let mut request = create_json_request("GET", "/api/v1/auth/me", None);
    request
        .headers_mut()
        .insert("X-Api-Token", format!("JWT {access}").parse().unwrap());
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);

    // The default header is no longer consulted
    let (status, _) = send(&app, authorized_request("GET", "/api/v1/auth/me", access, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// =============================================================================
// PostgreSQL Tests
// =============================================================================

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_postgres_refresh_rotation() {
    use authgate_api::auth::{PgRefreshTokenStore, RefreshTokenStore, StoreError};

    let mut config = AppConfig::default();
    config.database.url = std::env::var("DATABASE_URL").ok();
    let pool = authgate_core::connect(&config.database).await.unwrap();
    authgate_core::migrate(&pool).await.unwrap();

    let user_id: i64 = sqlx::query_scalar(
        "INSERT INTO users (username, email, password_hash) VALUES ($1, $2, 'x') RETURNING id",
    )
    .bind(format!("pg-{}", uuid::Uuid::new_v4()))
    .bind(format!("{}@example.com", uuid::Uuid::new_v4()))
    .fetch_one(&pool)
    .await
    .unwrap();

    let store = PgRefreshTokenStore::new(pool);
    let first = store.create(user_id, Duration::from_secs(60)).await.unwrap();

    let (a, b) = tokio::join!(
        store.consume_and_replace(&first, Duration::from_secs(60)),
        store.consume_and_replace(&first, Duration::from_secs(60)),
    );
    let winners = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert!([a, b]
        .into_iter()
        .any(|r| matches!(r, Err(StoreError::AlreadyConsumed))));
}
