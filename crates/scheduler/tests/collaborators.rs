//! Integration tests for the collaborator clients against mock services.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use uuid::Uuid;

use scheduler::stage::TaskStage;
use scheduler::telemetry::{StageEvent, TelemetryBroadcaster};
use scheduler::{AnalyzerClient, ScraperClient};

// =============================================================================
// Mock collaborator plumbing
// =============================================================================

#[derive(Default)]
struct MockService {
    requests: AtomicUsize,
    last_headers: RwLock<Option<String>>,
    last_body: RwLock<Option<JsonValue>>,
    response: RwLock<Option<(StatusCode, String)>>,
}

impl MockService {
    async fn respond_with(&self, status: StatusCode, body: impl Into<String>) {
        *self.response.write().await = Some((status, body.into()));
    }
}

async fn handle(
    State(state): State<Arc<MockService>>,
    headers: HeaderMap,
    Json(body): Json<JsonValue>,
) -> impl IntoResponse {
    state.requests.fetch_add(1, Ordering::SeqCst);
    *state.last_headers.write().await = headers
        .get("X-Internal-API-Key")
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);
    *state.last_body.write().await = Some(body);

    let (status, body) = state
        .response
        .read()
        .await
        .clone()
        .unwrap_or((StatusCode::OK, "{}".to_string()));
    (status, body)
}

async fn start_mock(path: &'static str) -> (SocketAddr, Arc<MockService>) {
    let state = Arc::new(MockService::default());
    let app = Router::new()
        .route(path, post(handle))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, state)
}

// =============================================================================
// Scraper client
// =============================================================================

#[tokio::test]
async fn scraper_posts_url_with_wait_time_and_auth() {
    let (addr, state) = start_mock("/scrape").await;
    state
        .respond_with(
            StatusCode::OK,
            json!({
                "url": "https://a.test/x",
                "content": "a".repeat(4000),
                "status_code": 200,
                "headers": {},
                "success": true
            })
            .to_string(),
        )
        .await;

    let client = ScraperClient::new(format!("http://{addr}"), "secret-key".to_string()).unwrap();
    let result = client.scrape("https://a.test/x").await.unwrap();

    assert_eq!(result.content.len(), 4000);
    assert_eq!(result.status_code, Some(200));
    assert_eq!(state.last_headers.read().await.as_deref(), Some("secret-key"));

    let body = state.last_body.read().await.clone().unwrap();
    assert_eq!(body["url"], "https://a.test/x");
    assert_eq!(body["wait_time"], 3);
}

#[tokio::test]
async fn scraper_surfaces_unsuccessful_scrapes() {
    let (addr, state) = start_mock("/scrape").await;
    state
        .respond_with(
            StatusCode::OK,
            json!({
                "url": "https://a.test/x",
                "content": "",
                "success": false,
                "error": "navigation timeout"
            })
            .to_string(),
        )
        .await;

    let client = ScraperClient::new(format!("http://{addr}"), "k".to_string()).unwrap();
    let err = client.scrape("https://a.test/x").await.unwrap_err();
    assert!(err.to_string().contains("navigation timeout"));
}

#[tokio::test]
async fn scraper_surfaces_http_failures() {
    let (addr, state) = start_mock("/scrape").await;
    state
        .respond_with(StatusCode::BAD_GATEWAY, "upstream broke")
        .await;

    let client = ScraperClient::new(format!("http://{addr}"), "k".to_string()).unwrap();
    let err = client.scrape("https://a.test/x").await.unwrap_err();
    assert!(err.to_string().contains("502"));
}

// =============================================================================
// Analyzer client
// =============================================================================

#[tokio::test]
async fn analyzer_decodes_clean_response_and_sends_contract_fields() {
    let (addr, state) = start_mock("/analyze").await;
    state
        .respond_with(
            StatusCode::OK,
            json!({
                "relevance_score": 82,
                "title": "Q3 beat",
                "summary": "Revenue up 12%",
                "key_points": ["earnings", "revenue"],
                "confidence": 0.9,
                "success": true
            })
            .to_string(),
        )
        .await;

    let client = AnalyzerClient::new(
        format!("http://{addr}"),
        "secret-key".to_string(),
        "test-model".to_string(),
    )
    .unwrap();
    let analysis = client.analyze("page content", "earnings news").await.unwrap();

    assert_eq!(analysis.relevance_score, 82);
    assert_eq!(analysis.title, "Q3 beat");
    assert_eq!(analysis.key_points.len(), 2);

    let body = state.last_body.read().await.clone().unwrap();
    assert_eq!(body["content"], "page content");
    assert_eq!(body["prompt"], "earnings news");
    assert_eq!(body["max_tokens"], 1000);
    assert_eq!(body["model"], "test-model");
}

#[tokio::test]
async fn analyzer_tolerates_json_wrapped_in_prose() {
    let (addr, state) = start_mock("/analyze").await;
    state
        .respond_with(
            StatusCode::OK,
            "Sure! Here is the analysis you asked for:\n```json\n{\"relevance_score\": 91, \"title\": \"Breaking\", \"summary\": \"Big news\"}\n```\nLet me know if you need anything else.".to_string(),
        )
        .await;

    let client = AnalyzerClient::new(format!("http://{addr}"), "k".to_string(), "m".to_string())
        .unwrap();
    let analysis = client.analyze("content", "prompt").await.unwrap();

    assert_eq!(analysis.relevance_score, 91);
    assert_eq!(analysis.title, "Breaking");
}

#[tokio::test]
async fn analyzer_clamps_out_of_range_scores() {
    let (addr, state) = start_mock("/analyze").await;
    state
        .respond_with(
            StatusCode::OK,
            json!({ "relevance_score": 250, "title": "T", "summary": "S", "confidence": -2.0 })
                .to_string(),
        )
        .await;

    let client = AnalyzerClient::new(format!("http://{addr}"), "k".to_string(), "m".to_string())
        .unwrap();
    let analysis = client.analyze("content", "prompt").await.unwrap();

    assert_eq!(analysis.relevance_score, 100);
    assert!(analysis.confidence.abs() < f32::EPSILON);
}

#[tokio::test]
async fn analyzer_rejects_explicit_failure() {
    let (addr, state) = start_mock("/analyze").await;
    state
        .respond_with(
            StatusCode::OK,
            json!({ "relevance_score": 0, "title": "", "summary": "", "success": false, "error": "model unavailable" })
                .to_string(),
        )
        .await;

    let client = AnalyzerClient::new(format!("http://{addr}"), "k".to_string(), "m".to_string())
        .unwrap();
    let err = client.analyze("content", "prompt").await.unwrap_err();
    assert!(err.to_string().contains("model unavailable"));
}

// =============================================================================
// Telemetry broadcaster
// =============================================================================

fn sample_event(stage: TaskStage) -> StageEvent {
    StageEvent {
        run_id: "run_1".to_string(),
        job_id: Uuid::nil(),
        job_name: "job".to_string(),
        source_url: "https://a.test/x".to_string(),
        current_stage: stage,
        completion_percentage: stage.percentage(),
        stage_data: json!({}),
        sources_processed: 0,
        sources_total: 1,
        alerts_generated: 0,
        analysis_details: Vec::new(),
        user_id: Uuid::nil(),
        timestamp: Utc::now(),
    }
}

#[tokio::test]
async fn telemetry_reaches_the_dashboard() {
    let (addr, state) = start_mock("/internal/broadcast").await;

    let telemetry = TelemetryBroadcaster::new(Some(format!("http://{addr}")));
    telemetry.emit(sample_event(TaskStage::Scraping));

    // Fire-and-forget: wait for the spawned POST to land.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(state.requests.load(Ordering::SeqCst), 1);

    let body = state.last_body.read().await.clone().unwrap();
    assert_eq!(body["current_stage"], "scraping");
    assert_eq!(body["completion_percentage"], 25);
    assert_eq!(body["run_id"], "run_1");
}

#[tokio::test]
async fn telemetry_failure_never_surfaces() {
    // Nothing is listening on this port; emit must not panic or block.
    let telemetry = TelemetryBroadcaster::new(Some("http://127.0.0.1:1".to_string()));
    telemetry.emit(sample_event(TaskStage::Analyzing));
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn disabled_telemetry_drops_events() {
    let telemetry = TelemetryBroadcaster::disabled();
    telemetry.emit(sample_event(TaskStage::Completed));
}
