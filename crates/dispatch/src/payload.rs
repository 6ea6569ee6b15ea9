//! Wire format of the alert dispatch queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One entry of the `alert_queue` FIFO. Produced by the task pipeline on a
/// fresh threshold crossing and by the re-notifier for repeat deliveries;
/// consumed by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPayload {
    pub alert_id: Uuid,
    pub job_id: Uuid,
    pub job_run_id: String,
    pub source_url: String,
    pub title: String,
    pub content: String,
    pub relevance_score: i32,
    pub user_id: Uuid,
    /// Present when the alert row already holds a token (repeat deliveries).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledgment_token: Option<String>,
    /// Repeat deliveries are deliberate re-sends and bypass the dedup shield.
    #[serde(default)]
    pub repeat: bool,
    pub timestamp: DateTime<Utc>,
}

/// Generate an acknowledgement token: opaque, unguessable, 68 characters.
#[must_use]
pub fn generate_acknowledgment_token() -> String {
    format!("{}{}", Uuid::new_v4(), Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_long_enough_and_unique() {
        let a = generate_acknowledgment_token();
        let b = generate_acknowledgment_token();
        assert!(a.len() >= 64);
        assert_ne!(a, b);
    }

    #[test]
    fn payload_round_trips_without_optional_fields() {
        let raw = serde_json::json!({
            "alert_id": "7a0db0fe-3c28-4734-8220-0f9f6c38a1f1",
            "job_id": "d2f1a1c0-9a52-4a3d-b1c4-34a62b04b72a",
            "job_run_id": "run_d2f1a1c0_1700000000",
            "source_url": "https://a.test/x",
            "title": "Q3 beat",
            "content": "Revenue up 12%",
            "relevance_score": 82,
            "user_id": "f81b1830-67a8-4b12-9f19-1d53a7e87a51",
            "timestamp": "2026-01-01T00:00:00Z"
        });

        let payload: AlertPayload = serde_json::from_value(raw).unwrap();
        assert!(!payload.repeat);
        assert!(payload.acknowledgment_token.is_none());
        assert_eq!(payload.relevance_score, 82);
    }
}
