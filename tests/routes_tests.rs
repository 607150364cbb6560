//! HTTP-level tests for the upload route

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use chunk_upload_server::config::Config;
use chunk_upload_server::kv::{ExpiredKeys, KeyValueStore, KvError};
use chunk_upload_server::routes;
use chunk_upload_server::state::AppState;
use chunk_upload_server::upload::{ArtifactLayout, Publisher, SessionRegistry, UploadService};
use common::{Harness, RecordingSink};

const BOUNDARY: &str = "chunk-upload-test-boundary";

fn app(harness: &Harness) -> Router {
    let mut config = Config::default();
    config.uploads.staging_dir = harness.staging_root();
    config.uploads.final_dir = harness.final_root();
    routes::app(AppState::new(config, harness.service.clone()))
}

fn multipart_body(metadata: &serde_json::Value, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"metadata\"\r\n\r\n{}\r\n",
            metadata
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"blob\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn chunk_request(
    cookie: Option<&str>,
    total_chunks: u32,
    chunk_number: u32,
    finalize: bool,
    data: &[u8],
) -> Request<Body> {
    let metadata = serde_json::json!({
        "file_name": "notes.txt",
        "file_type": "txt",
        "file_size": 1,
        "file_size_unit": "KB",
        "total_chunks": total_chunks,
        "chunk_number": chunk_number,
        "compile_status": finalize,
    });

    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/upload_chunk")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .header(header::USER_AGENT, "route-tests/1.0")
        .header("x-forwarded-for", "198.51.100.20");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder
        .body(Body::from(multipart_body(&metadata, data)))
        .unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Option<String>, serde_json::Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, cookie, json)
}

/// `session_id=<value>` pair out of a Set-Cookie header
fn cookie_pair(set_cookie: &str) -> String {
    set_cookie.split(';').next().unwrap().trim().to_string()
}

#[tokio::test]
async fn test_health() {
    let harness = Harness::new(Arc::new(RecordingSink::default()));
    let router = app(&harness);

    let (status, _, body) = send(
        &router,
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"], "ok");
}

/// Store that refuses every command
struct UnreachableStore;

#[async_trait::async_trait]
impl KeyValueStore for UnreachableStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, KvError> {
        Err(KvError::Connection("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), KvError> {
        Err(KvError::Connection("connection refused".to_string()))
    }

    async fn set_all(&self, _entries: &[(String, String)], _ttl: Duration) -> Result<(), KvError> {
        Err(KvError::Connection("connection refused".to_string()))
    }

    async fn delete(&self, _key: &str) -> Result<Option<String>, KvError> {
        Err(KvError::Connection("connection refused".to_string()))
    }

    async fn exists(&self, _key: &str) -> Result<bool, KvError> {
        Err(KvError::Connection("connection refused".to_string()))
    }

    async fn ttl(&self, _key: &str) -> Result<Option<Duration>, KvError> {
        Err(KvError::Connection("connection refused".to_string()))
    }

    async fn subscribe_expired(&self) -> Result<ExpiredKeys, KvError> {
        Err(KvError::Subscription("connection refused".to_string()))
    }
}

#[tokio::test]
async fn test_health_reports_unreachable_store() {
    let temp = tempfile::TempDir::new().unwrap();
    let mut config = Config::default();
    config.uploads.staging_dir = temp.path().join("staging");
    config.uploads.final_dir = temp.path().join("final");

    let service = UploadService::new(
        SessionRegistry::new(Arc::new(UnreachableStore)),
        ArtifactLayout::new(&config.uploads.staging_dir, &config.uploads.final_dir),
        Publisher::new(Arc::new(RecordingSink::default()), common::BUCKET, ""),
        Duration::from_secs(60),
    );
    let router = routes::app(AppState::new(config, service));

    let (status, _, body) = send(
        &router,
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["store"], "unavailable");
}

#[tokio::test]
async fn test_full_upload_over_http() {
    let sink = Arc::new(RecordingSink::default());
    let harness = Harness::new(sink.clone());
    let router = app(&harness);

    let (status, set_cookie, body) = send(&router, chunk_request(None, 2, 2, false, b"world")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "accepted");

    let set_cookie = set_cookie.expect("session cookie issued");
    assert!(set_cookie.starts_with("session_id="));
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("Max-Age=60"));
    assert!(set_cookie.contains("Path=/"));
    let cookie = cookie_pair(&set_cookie);

    let (status, set_cookie, body) =
        send(&router, chunk_request(Some(&cookie), 2, 1, true, b"hello ")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["size"], 11);
    assert!(set_cookie.unwrap().contains("Max-Age=0"));

    let objects = sink.objects();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].body, b"hello world");
}

#[tokio::test]
async fn test_unknown_session_cookie_is_unauthorized() {
    let harness = Harness::new(Arc::new(RecordingSink::default()));
    let router = app(&harness);

    let cookie = format!("session_id={}", uuid::Uuid::new_v4());
    let (status, _, body) = send(&router, chunk_request(Some(&cookie), 2, 1, false, b"x")).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "SESSION_EXPIRED");
    assert_eq!(body["error"], "Invalid credentials.");
}

#[tokio::test]
async fn test_partial_failure_status() {
    let harness = Harness::new(Arc::new(RecordingSink::default()));
    let router = app(&harness);

    let (_, set_cookie, body) = send(&router, chunk_request(None, 1, 1, false, b"x")).await;
    let cookie = cookie_pair(&set_cookie.unwrap());
    let id: uuid::Uuid = body["session_id"].as_str().unwrap().parse().unwrap();

    let path = harness.layout.chunk_path(id, 1, "txt");
    tokio::fs::remove_file(&path).await.unwrap();
    tokio::fs::create_dir_all(&path).await.unwrap();

    let (status, _, body) = send(&router, chunk_request(Some(&cookie), 1, 1, true, b"x")).await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(body["status"], "partial_failure");
    assert_eq!(body["failed_chunk_list"], serde_json::json!([1]));
}

#[tokio::test]
async fn test_bad_requests() {
    let harness = Harness::new(Arc::new(RecordingSink::default()));
    let router = app(&harness);

    let (status, _, body) = send(&router, chunk_request(None, 2, 7, false, b"x")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "CHUNK_INDEX_OUT_OF_RANGE");

    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/upload_chunk")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"metadata\"\r\n\r\nnot json\r\n--{BOUNDARY}--\r\n"
        )))
        .unwrap();
    let (status, _, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_REQUEST");
}
