//! End-to-end upload flow tests
//!
//! Drives the real router with a mock storage backend and an in-memory
//! database, covering chunked assembly, deduplication, integrity
//! verification, and the lookup surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use sqlx::sqlite::SqlitePoolOptions;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tower::ServiceExt;

use almacen_server::config::Config;
use almacen_server::hash::compute_hash;
use almacen_server::routes;
use almacen_server::state::AppState;
use almacen_server::storage::{BackendError, ContentBackend, NodeInfo};

// ============================================================================
// Test Harness
// ============================================================================

struct MockBackend {
    adds: AtomicUsize,
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MockBackend {
    fn new() -> Self {
        Self {
            adds: AtomicUsize::new(0),
            objects: Mutex::new(HashMap::new()),
        }
    }

    fn add_count(&self) -> usize {
        self.adds.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ContentBackend for MockBackend {
    async fn add_object(
        &self,
        data: Vec<u8>,
        _size_hint: u64,
        _mime_type: &str,
    ) -> Result<String, BackendError> {
        self.adds.fetch_add(1, Ordering::SeqCst);
        let cid = format!("bafy-mock-{}", &compute_hash(&data)[..16]);
        self.objects.lock().await.insert(cid.clone(), data);
        Ok(cid)
    }

    async fn resolve(&self, cid: &str) -> Result<Vec<u8>, BackendError> {
        self.objects
            .lock()
            .await
            .get(cid)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(cid.to_string()))
    }

    async fn node_info(&self) -> Result<NodeInfo, BackendError> {
        Ok(NodeInfo {
            peer_id: "12D3KooWMock".to_string(),
            version: "kubo/0.29.0-mock".to_string(),
            addresses: vec![],
            repo_objects: self.objects.lock().await.len() as u64,
            repo_size: 0,
        })
    }
}

async fn test_app(spool: &TempDir) -> (Router, Arc<MockBackend>) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    almacen_server::db::initialize_schema(&pool).await.unwrap();

    let mut config = Config::default();
    config.upload.spool_dir = spool.path().to_path_buf();
    config.upload.max_object_size = 1024 * 1024;

    let backend = Arc::new(MockBackend::new());
    let state = AppState::new(config, backend.clone(), pool);

    (routes::app(state), backend)
}

async fn post_chunk(app: &Router, uri: &str, payload: &[u8]) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .body(Body::from(payload.to_vec()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    (status, json)
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    (status, json)
}

// ============================================================================
// Chunked Upload Flow
// ============================================================================

#[tokio::test]
async fn test_chunked_upload_out_of_order() {
    let spool = TempDir::new().unwrap();
    let (app, backend) = test_app(&spool).await;

    // Chunks arrive in order [1, 0, 2]
    let (status, json) = post_chunk(
        &app,
        "/api/v1/upload/chunked/u1/chunks/1?total=3&name=greeting.txt",
        b"B",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["complete"], false);
    assert_eq!(json["chunksReceived"], 1);

    let (_, json) = post_chunk(&app, "/api/v1/upload/chunked/u1/chunks/0?total=3", b"A").await;
    assert_eq!(json["complete"], false);
    assert_eq!(json["chunksReceived"], 2);

    let (status, json) = post_chunk(&app, "/api/v1/upload/chunked/u1/chunks/2?total=3", b"C").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["complete"], true);

    let expected_hash = compute_hash(b"ABC");
    assert_eq!(json["result"]["contentHash"], expected_hash.as_str());
    assert_eq!(json["result"]["sizeBytes"], 3);
    assert_eq!(json["result"]["name"], "greeting.txt");
    assert_eq!(json["result"]["deduplicated"], false);
    assert_eq!(backend.add_count(), 1);

    // The record is visible through the lookup surface
    let (status, json) = get_json(&app, &format!("/api/v1/blobs/{}", expected_hash)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["contentHash"], expected_hash.as_str());

    let (_, json) = get_json(&app, "/api/v1/blobs").await;
    assert_eq!(json["count"], 1);

    // The content resolves back through the backend
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/blobs/{}/content", expected_hash))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"ABC");
}

#[tokio::test]
async fn test_duplicate_chunk_reported() {
    let spool = TempDir::new().unwrap();
    let (app, backend) = test_app(&spool).await;

    post_chunk(&app, "/api/v1/upload/chunked/u1/chunks/0?total=2", b"AA").await;

    let (status, json) = post_chunk(&app, "/api/v1/upload/chunked/u1/chunks/0?total=2", b"XX").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["duplicate"], true);
    assert_eq!(json["chunksReceived"], 1);

    let (_, json) = post_chunk(&app, "/api/v1/upload/chunked/u1/chunks/1?total=2", b"BB").await;
    assert_eq!(json["complete"], true);

    // The duplicate's payload was discarded, so the object is "AABB"
    assert_eq!(
        json["result"]["contentHash"],
        compute_hash(b"AABB").as_str()
    );
    assert_eq!(backend.add_count(), 1);
}

#[tokio::test]
async fn test_chunked_upload_dedup_across_sessions() {
    let spool = TempDir::new().unwrap();
    let (app, backend) = test_app(&spool).await;

    let (_, json) = post_chunk(&app, "/api/v1/upload/chunked/a/chunks/0?total=1", b"same").await;
    assert_eq!(json["result"]["deduplicated"], false);

    // Identical content under a different upload id publishes nothing new
    let (_, json) = post_chunk(&app, "/api/v1/upload/chunked/b/chunks/0?total=1", b"same").await;
    assert_eq!(json["result"]["deduplicated"], true);

    assert_eq!(backend.add_count(), 1);

    let (_, json) = get_json(&app, "/api/v1/blobs").await;
    assert_eq!(json["count"], 1);
}

#[tokio::test]
async fn test_chunked_claimed_hash_mismatch() {
    let spool = TempDir::new().unwrap();
    let (app, backend) = test_app(&spool).await;

    let wrong = compute_hash(b"something else");
    let uri = format!("/api/v1/upload/chunked/u1/chunks/0?total=1&hash={}", wrong);

    let (status, json) = post_chunk(&app, &uri, b"payload").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "INTEGRITY_MISMATCH");

    // Nothing was published or indexed
    assert_eq!(backend.add_count(), 0);
    let (_, json) = get_json(&app, "/api/v1/blobs").await;
    assert_eq!(json["count"], 0);
}

#[tokio::test]
async fn test_invalid_chunk_parameters() {
    let spool = TempDir::new().unwrap();
    let (app, _) = test_app(&spool).await;

    let (status, json) = post_chunk(&app, "/api/v1/upload/chunked/u1/chunks/5?total=3", b"x").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "INVALID_CHUNK_PARAMETERS");
}

// ============================================================================
// Single-Shot Upload
// ============================================================================

const BOUNDARY: &str = "test-boundary-7MA4YWxkTrZu0gW";

fn multipart_body(payload: &[u8], filename: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: text/plain\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(payload);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

async fn post_single(
    app: &Router,
    payload: &[u8],
    claimed_hash: Option<&str>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/v1/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
    if let Some(hash) = claimed_hash {
        builder = builder.header("x-content-hash", hash);
    }

    let response = app
        .clone()
        .oneshot(
            builder
                .body(Body::from(multipart_body(payload, "hello.txt")))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    (status, json)
}

#[tokio::test]
async fn test_single_shot_upload() {
    let spool = TempDir::new().unwrap();
    let (app, backend) = test_app(&spool).await;

    let (status, json) = post_single(&app, b"hello", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["contentHash"], compute_hash(b"hello").as_str());
    assert_eq!(json["name"], "hello.txt");
    assert_eq!(json["deduplicated"], false);
    assert_eq!(backend.add_count(), 1);

    // Publishing the same bytes again returns the existing record
    let (status, json) = post_single(&app, b"hello", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["deduplicated"], true);
    assert_eq!(backend.add_count(), 1);
}

#[tokio::test]
async fn test_single_shot_integrity_mismatch() {
    let spool = TempDir::new().unwrap();
    let (app, backend) = test_app(&spool).await;

    let claimed = compute_hash(b"hello");
    let (status, json) = post_single(&app, b"world", Some(&claimed)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "INTEGRITY_MISMATCH");

    assert_eq!(backend.add_count(), 0);
    let (_, json) = get_json(&app, "/api/v1/blobs").await;
    assert_eq!(json["count"], 0);

    // A correct claimed hash goes through
    let (status, json) = post_single(&app, b"hello", Some(&claimed)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["contentHash"], claimed.as_str());
}

// ============================================================================
// Lookup Surface
// ============================================================================

#[tokio::test]
async fn test_unknown_blob_not_found() {
    let spool = TempDir::new().unwrap();
    let (app, _) = test_app(&spool).await;

    let missing = compute_hash(b"never uploaded");
    let (status, json) = get_json(&app, &format!("/api/v1/blobs/{}", missing)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_status_endpoint() {
    let spool = TempDir::new().unwrap();
    let (app, _) = test_app(&spool).await;

    post_chunk(&app, "/api/v1/upload/chunked/partial/chunks/0?total=2", b"x").await;

    let (status, json) = get_json(&app, "/api/v1/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["node"]["peerId"], "12D3KooWMock");
    assert_eq!(json["indexedBlobs"], 0);
    assert_eq!(json["activeSessions"], 1);
}

#[tokio::test]
async fn test_health() {
    let spool = TempDir::new().unwrap();
    let (app, _) = test_app(&spool).await;

    let (status, json) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
}
