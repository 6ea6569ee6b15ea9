//! Integration tests for the document store client against a mock service.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::Value as JsonValue;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use uuid::Uuid;

use store::docs::{AnalysisDocument, RunComplete, RunStart, SourceDocument};
use store::{DocumentStore, StoreError};

// =============================================================================
// Mock document store service
// =============================================================================

#[derive(Default)]
struct MockDocStore {
    starts: AtomicUsize,
    source_data: AtomicUsize,
    analyses: AtomicUsize,
    completes: AtomicUsize,
    last_run_id: RwLock<Option<String>>,
    last_api_key: RwLock<Option<String>>,
    last_body: RwLock<Option<JsonValue>>,
}

async fn handle_start(
    State(state): State<Arc<MockDocStore>>,
    headers: HeaderMap,
    Json(body): Json<JsonValue>,
) -> impl IntoResponse {
    state.starts.fetch_add(1, Ordering::SeqCst);
    *state.last_api_key.write().await = headers
        .get("X-Internal-API-Key")
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);
    *state.last_body.write().await = Some(body);
    StatusCode::OK
}

async fn handle_source_data(
    State(state): State<Arc<MockDocStore>>,
    Path(run_id): Path<String>,
    Json(body): Json<JsonValue>,
) -> impl IntoResponse {
    state.source_data.fetch_add(1, Ordering::SeqCst);
    *state.last_run_id.write().await = Some(run_id);
    *state.last_body.write().await = Some(body);
    StatusCode::OK
}

async fn handle_analysis(
    State(state): State<Arc<MockDocStore>>,
    Path(run_id): Path<String>,
    Json(body): Json<JsonValue>,
) -> impl IntoResponse {
    state.analyses.fetch_add(1, Ordering::SeqCst);
    *state.last_run_id.write().await = Some(run_id);
    *state.last_body.write().await = Some(body);
    StatusCode::OK
}

async fn handle_complete(
    State(state): State<Arc<MockDocStore>>,
    Path(run_id): Path<String>,
    Json(body): Json<JsonValue>,
) -> impl IntoResponse {
    state.completes.fetch_add(1, Ordering::SeqCst);
    *state.last_run_id.write().await = Some(run_id);
    *state.last_body.write().await = Some(body);
    StatusCode::OK
}

async fn start_mock() -> (SocketAddr, Arc<MockDocStore>) {
    let state = Arc::new(MockDocStore::default());

    let app = Router::new()
        .route("/job-execution/start", post(handle_start))
        .route("/job-execution/:run_id/source-data", post(handle_source_data))
        .route("/job-execution/:run_id/llm-analysis", post(handle_analysis))
        .route("/job-execution/:run_id/complete", post(handle_complete))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, state)
}

fn client_for(addr: SocketAddr) -> DocumentStore {
    DocumentStore::new(format!("http://{addr}"), "test-internal-key".to_string()).unwrap()
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn run_start_carries_auth_and_metadata() {
    let (addr, state) = start_mock().await;
    let docs = client_for(addr);

    let start = RunStart {
        job_run_id: "run_j1_1700000000".to_string(),
        job_id: Uuid::nil(),
        user_id: Uuid::nil(),
        job_name: "Earnings watch".to_string(),
        sources: vec!["https://a.test/x".to_string()],
        started_at: Utc::now(),
    };
    docs.record_start(&start).await.unwrap();

    assert_eq!(state.starts.load(Ordering::SeqCst), 1);
    assert_eq!(
        state.last_api_key.read().await.as_deref(),
        Some("test-internal-key")
    );
    let body = state.last_body.read().await.clone().unwrap();
    assert_eq!(body["job_run_id"], "run_j1_1700000000");
    assert_eq!(body["job_name"], "Earnings watch");
}

#[tokio::test]
async fn per_source_documents_are_keyed_by_run() {
    let (addr, state) = start_mock().await;
    let docs = client_for(addr);

    let source = SourceDocument {
        source_url: "https://a.test/x".to_string(),
        content: "body text".to_string(),
        status_code: 200,
        content_length: 9,
        scraped_at: Utc::now(),
    };
    docs.record_source_data("run_42", &source).await.unwrap();
    assert_eq!(state.source_data.load(Ordering::SeqCst), 1);
    assert_eq!(state.last_run_id.read().await.as_deref(), Some("run_42"));

    let analysis = AnalysisDocument {
        source_url: "https://a.test/x".to_string(),
        relevance_score: 82,
        title: "Q3 beat".to_string(),
        summary: "Revenue up 12%".to_string(),
        reasoning: None,
        outcome: "alert_created".to_string(),
        analyzed_at: Utc::now(),
    };
    docs.record_analysis("run_42", &analysis).await.unwrap();
    assert_eq!(state.analyses.load(Ordering::SeqCst), 1);

    let body = state.last_body.read().await.clone().unwrap();
    assert_eq!(body["relevance_score"], 82);
    assert_eq!(body["outcome"], "alert_created");
    // Absent optionals are omitted, not null.
    assert!(body.get("reasoning").is_none());

    let complete = RunComplete {
        status: "completed".to_string(),
        sources_processed: 1,
        alerts_generated: 1,
        summary: serde_json::json!([]),
        completed_at: Utc::now(),
    };
    docs.record_complete("run_42", &complete).await.unwrap();
    assert_eq!(state.completes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rejections_surface_as_errors() {
    let app = Router::new().route(
        "/job-execution/start",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let docs = client_for(addr);
    let start = RunStart {
        job_run_id: "run_x".to_string(),
        job_id: Uuid::nil(),
        user_id: Uuid::nil(),
        job_name: "j".to_string(),
        sources: vec![],
        started_at: Utc::now(),
    };

    let err = docs.record_start(&start).await.unwrap_err();
    match err {
        StoreError::DocumentStore { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("unexpected error: {other}"),
    }
}
