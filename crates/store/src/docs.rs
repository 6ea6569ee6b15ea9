//! Document store collaborator client.
//!
//! Raw scrape payloads and analysis results are archived in the document
//! store, keyed by run. Every call here is fire-and-forget from the
//! pipeline's point of view: a failure is logged by the caller and never
//! blocks task progress.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use uuid::Uuid;

use crate::error::StoreError;

const INTERNAL_KEY_HEADER: &str = "X-Internal-API-Key";

/// Initial run metadata, posted when a run starts.
#[derive(Debug, Clone, Serialize)]
pub struct RunStart {
    pub job_run_id: String,
    pub job_id: Uuid,
    pub user_id: Uuid,
    pub job_name: String,
    pub sources: Vec<String>,
    pub started_at: DateTime<Utc>,
}

/// Raw scraped payload for one source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceDocument {
    pub source_url: String,
    pub content: String,
    pub status_code: u16,
    pub content_length: usize,
    pub scraped_at: DateTime<Utc>,
}

/// Analysis result for one source.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisDocument {
    pub source_url: String,
    pub relevance_score: i32,
    pub title: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub outcome: String,
    pub analyzed_at: DateTime<Utc>,
}

/// Run completion summary.
#[derive(Debug, Clone, Serialize)]
pub struct RunComplete {
    pub status: String,
    pub sources_processed: u32,
    pub alerts_generated: u32,
    pub summary: JsonValue,
    pub completed_at: DateTime<Utc>,
}

/// HTTP client for the document store service.
#[derive(Clone, Debug)]
pub struct DocumentStore {
    base_url: String,
    internal_api_key: String,
    client: Client,
}

impl DocumentStore {
    /// Create a client for the given base URL.
    pub fn new(base_url: String, internal_api_key: String) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            base_url,
            internal_api_key,
            client,
        })
    }

    /// Record initial run metadata.
    pub async fn record_start(&self, start: &RunStart) -> Result<(), StoreError> {
        self.post("/job-execution/start".to_string(), start).await
    }

    /// Archive one source's raw scrape payload. Idempotent by
    /// `(run_id, source_url)` on the service side.
    pub async fn record_source_data(
        &self,
        run_id: &str,
        doc: &SourceDocument,
    ) -> Result<(), StoreError> {
        self.post(format!("/job-execution/{run_id}/source-data"), doc)
            .await
    }

    /// Archive one source's analysis result.
    pub async fn record_analysis(
        &self,
        run_id: &str,
        doc: &AnalysisDocument,
    ) -> Result<(), StoreError> {
        self.post(format!("/job-execution/{run_id}/llm-analysis"), doc)
            .await
    }

    /// Record the run completion summary.
    pub async fn record_complete(
        &self,
        run_id: &str,
        summary: &RunComplete,
    ) -> Result<(), StoreError> {
        self.post(format!("/job-execution/{run_id}/complete"), summary)
            .await
    }

    async fn post<T: Serialize>(&self, path: String, body: &T) -> Result<(), StoreError> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .header(INTERNAL_KEY_HEADER, &self.internal_api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(StoreError::DocumentStore {
                status: status.as_u16(),
                body,
            })
        }
    }
}
