//! Integration tests for channel delivery against mock webhook/mail services.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value as JsonValue};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::RwLock;

use dispatch::channels::email::EmailChannel;
use dispatch::channels::slack::SlackChannel;
use dispatch::channels::teams::TeamsChannel;
use dispatch::{AlertChannel, ChannelError, MailConfig, RenderedAlert};

// =============================================================================
// Mock webhook receiver
// =============================================================================

#[derive(Default)]
struct MockReceiver {
    requests: AtomicUsize,
    last_auth: RwLock<Option<String>>,
    last_body: RwLock<Option<JsonValue>>,
    status: RwLock<Option<StatusCode>>,
}

async fn receive(
    State(state): State<Arc<MockReceiver>>,
    headers: HeaderMap,
    Json(body): Json<JsonValue>,
) -> impl IntoResponse {
    state.requests.fetch_add(1, Ordering::SeqCst);
    *state.last_auth.write().await = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);
    *state.last_body.write().await = Some(body);
    state.status.read().await.unwrap_or(StatusCode::OK)
}

async fn start_receiver(path: &'static str) -> (SocketAddr, Arc<MockReceiver>) {
    let state = Arc::new(MockReceiver::default());
    let app = Router::new()
        .route(path, post(receive))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, state)
}

fn sample_alert() -> RenderedAlert {
    RenderedAlert {
        title: "Q3 beat".to_string(),
        subject: "Monitoring Alert: Q3 beat".to_string(),
        summary: "Revenue up 12%".to_string(),
        source_url: "https://a.test/x".to_string(),
        relevance_score: 82,
        timestamp: "2026-01-02 03:04:05 UTC".to_string(),
        acknowledge_url: "http://api.test/alerts/1/acknowledge?token=tok".to_string(),
        dashboard_url: "http://dash.test".to_string(),
        text_body: "text body".to_string(),
        html_body: "<html>html body</html>".to_string(),
    }
}

// =============================================================================
// Slack
// =============================================================================

#[tokio::test]
async fn slack_delivers_card_to_configured_webhook() {
    let (addr, state) = start_receiver("/hook").await;
    let channel = SlackChannel::new().unwrap();
    let config = json!({ "webhook_url": format!("http://{addr}/hook") });

    channel.deliver(&sample_alert(), &config).await.unwrap();

    assert_eq!(state.requests.load(Ordering::SeqCst), 1);
    let body = state.last_body.read().await.clone().unwrap();
    assert_eq!(body["text"], "*Q3 beat*");
    assert!(body["attachments"][0]["fields"]
        .as_array()
        .unwrap()
        .iter()
        .any(|f| f["value"].as_str().unwrap_or_default().contains("82/100")));
}

#[tokio::test]
async fn slack_missing_webhook_is_a_config_error() {
    let channel = SlackChannel::new().unwrap();
    let err = channel
        .deliver(&sample_alert(), &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, ChannelError::InvalidConfig(_)));
}

#[tokio::test]
async fn slack_rejection_fails_the_delivery() {
    let (addr, state) = start_receiver("/hook").await;
    *state.status.write().await = Some(StatusCode::TOO_MANY_REQUESTS);

    let channel = SlackChannel::new().unwrap();
    let config = json!({ "webhook_url": format!("http://{addr}/hook") });
    let err = channel.deliver(&sample_alert(), &config).await.unwrap_err();
    assert!(matches!(err, ChannelError::Rejected(_)));
}

// =============================================================================
// Teams
// =============================================================================

#[tokio::test]
async fn teams_delivers_message_card() {
    let (addr, state) = start_receiver("/hook").await;
    let channel = TeamsChannel::new().unwrap();
    let config = json!({ "webhook_url": format!("http://{addr}/hook") });

    channel.deliver(&sample_alert(), &config).await.unwrap();

    let body = state.last_body.read().await.clone().unwrap();
    assert_eq!(body["@type"], "MessageCard");
    assert_eq!(body["sections"][0]["activitySubtitle"], "Q3 beat");
    let facts = body["sections"][0]["facts"].as_array().unwrap();
    assert!(facts.iter().any(|f| f["name"] == "Source"));
    assert!(facts.iter().any(|f| f["name"] == "Time"));
}

// =============================================================================
// Email
// =============================================================================

#[tokio::test]
async fn email_sends_text_and_html_through_mail_api() {
    let (addr, state) = start_receiver("/v3/mail/send").await;
    let channel = EmailChannel::new(MailConfig {
        api_key: Some("mail-key".to_string()),
        api_base: format!("http://{addr}"),
        from_email: "alerts@vigil.test".to_string(),
    })
    .unwrap();
    let config = json!({ "email": "user@example.test" });

    channel.deliver(&sample_alert(), &config).await.unwrap();

    assert_eq!(
        state.last_auth.read().await.as_deref(),
        Some("Bearer mail-key")
    );
    let body = state.last_body.read().await.clone().unwrap();
    assert_eq!(
        body["personalizations"][0]["to"][0]["email"],
        "user@example.test"
    );
    assert_eq!(body["from"]["email"], "alerts@vigil.test");
    assert_eq!(body["subject"], "Monitoring Alert: Q3 beat");
    assert_eq!(body["content"][0]["type"], "text/plain");
    assert_eq!(body["content"][1]["type"], "text/html");
}

#[tokio::test]
async fn email_without_api_key_is_not_configured() {
    let channel = EmailChannel::new(MailConfig {
        api_key: None,
        api_base: "http://mail.test".to_string(),
        from_email: "alerts@vigil.test".to_string(),
    })
    .unwrap();

    let err = channel
        .deliver(&sample_alert(), &json!({ "email": "user@example.test" }))
        .await
        .unwrap_err();
    assert!(matches!(err, ChannelError::NotConfigured(_)));
}
