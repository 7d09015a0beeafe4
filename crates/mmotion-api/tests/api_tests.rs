//! API integration tests over an in-memory job store.
//!
//! Redis and object storage clients point at unreachable endpoints; the
//! paths exercised here never touch them.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use tower::ServiceExt;

use mmotion_api::auth::{Claims, TokenVerifier};
use mmotion_api::middleware::RateLimiterCache;
use mmotion_api::{create_router, ApiConfig, AppState};
use mmotion_models::JobParameters;
use mmotion_queue::{JobQueue, ProgressChannel, QueueConfig};
use mmotion_storage::{ObjectStore, ObjectStoreConfig};
use mmotion_store::JobStore;

const TEST_SECRET: &str = "test-secret";
const DEAD_REDIS: &str = "redis://127.0.0.1:1";

fn token_for(owner: &str) -> String {
    let claims = Claims {
        sub: owner.to_string(),
        exp: chrono::Utc::now().timestamp() + 3600,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .unwrap()
}

async fn test_state() -> AppState {
    test_state_with(ApiConfig::default()).await
}

async fn test_state_with(config: ApiConfig) -> AppState {
    let config = ApiConfig {
        jwt_secret: TEST_SECRET.to_string(),
        ..config
    };

    let store = JobStore::in_memory().await.expect("in-memory store");
    let storage = ObjectStore::new(ObjectStoreConfig {
        endpoint_url: "http://127.0.0.1:9".to_string(),
        access_key_id: "test".to_string(),
        secret_access_key: "test".to_string(),
        bucket_name: "test".to_string(),
        region: "auto".to_string(),
    });
    let queue = JobQueue::new(QueueConfig {
        redis_url: DEAD_REDIS.to_string(),
        ..QueueConfig::default()
    })
    .expect("queue client");
    let progress = ProgressChannel::new(DEAD_REDIS).expect("progress client");

    AppState {
        verifier: TokenVerifier::new(&config.jwt_secret),
        limiter: RateLimiterCache::new(config.submit_rate_per_sec, config.submit_burst),
        config,
        store,
        storage: Arc::new(storage),
        queue: Arc::new(queue),
        progress: Arc::new(progress),
    }
}

async fn test_app() -> (axum::Router, AppState) {
    let state = test_state().await;
    (create_router(state.clone(), None), state)
}

fn multipart_file_body(boundary: &str, data: &str) -> String {
    format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"page.png\"\r\nContent-Type: image/png\r\n\r\n{data}\r\n--{boundary}--\r\n"
    )
}

fn submit_request(token: &str, boundary: &str, body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/jobs")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_submit_requires_auth() {
    let (app, _) = test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/jobs")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_submit_without_input_is_bad_request() {
    let (app, _) = test_app().await;

    let boundary = "X-TEST-BOUNDARY";
    let body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"parameters\"\r\n\r\n{{\"style\":\"noir\"}}\r\n--{boundary}--\r\n"
    );

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/jobs")
                .header(header::AUTHORIZATION, format!("Bearer {}", token_for("alice")))
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={boundary}"),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rejected_submission_creates_no_job() {
    let (app, state) = test_app().await;

    // Empty file part fails validation before anything is staged.
    let boundary = "X-TEST-BOUNDARY";
    let response = app
        .oneshot(submit_request(
            &token_for("alice"),
            boundary,
            multipart_file_body(boundary, ""),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(state.store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_rate_limited_submission_creates_no_job() {
    let state = test_state_with(ApiConfig {
        submit_rate_per_sec: 1,
        submit_burst: 1,
        ..ApiConfig::default()
    })
    .await;
    let app = create_router(state.clone(), None);

    let boundary = "X-TEST-BOUNDARY";
    let token = token_for("alice");

    // First request spends the burst; rejected by validation, not the limiter.
    let response = app
        .clone()
        .oneshot(submit_request(
            &token,
            boundary,
            multipart_file_body(boundary, ""),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Second request in the same instant is refused before validation.
    let response = app
        .oneshot(submit_request(
            &token,
            boundary,
            multipart_file_body(boundary, "panel bytes"),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    assert_eq!(state.store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_ws_upgrade_requires_auth() {
    let (app, _) = test_app().await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/ws/progress")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // With a token the request passes auth and fails only on the missing
    // upgrade handshake.
    let response = app
        .oneshot(
            Request::builder()
                .uri("/ws/progress")
                .header(header::AUTHORIZATION, format!("Bearer {}", token_for("alice")))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response.status().is_client_error());
    assert_ne!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_status_of_unknown_job_is_404() {
    let (app, _) = test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/jobs/does-not-exist")
                .header(header::AUTHORIZATION, format!("Bearer {}", token_for("alice")))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_status_is_owner_scoped() {
    let (app, state) = test_app().await;

    let job = state
        .store
        .create("alice", "uploads/alice/x-input.png", &JobParameters::empty())
        .await
        .unwrap();

    // Another owner gets 404, not 403.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/jobs/{}", job.id))
                .header(header::AUTHORIZATION, format!("Bearer {}", token_for("bob")))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // The owner sees the snapshot.
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/jobs/{}", job.id))
                .header(header::AUTHORIZATION, format!("Bearer {}", token_for("alice")))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["jobId"], job.id.as_str());
    assert_eq!(json["status"], "queued");
    assert_eq!(json["progress"], 0);
}

#[tokio::test]
async fn test_invalid_token_rejected() {
    let (app, _) = test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/jobs/any")
                .header(header::AUTHORIZATION, "Bearer not-a-jwt")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_cors_preflight() {
    let (app, _) = test_app().await;

    let response = app
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/jobs")
                .header("Origin", "http://localhost:3000")
                .header("Access-Control-Request-Method", "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(
        response.status() == StatusCode::OK || response.status() == StatusCode::NO_CONTENT
    );
}
