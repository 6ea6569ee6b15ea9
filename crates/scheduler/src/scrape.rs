//! Scraping collaborator client.

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

const INTERNAL_KEY_HEADER: &str = "X-Internal-API-Key";

/// Seconds the headless browser waits for dynamic content before extracting.
const SCRAPE_WAIT_SECONDS: u32 = 3;

/// Request body for the scrape endpoint.
#[derive(Debug, Serialize)]
struct ScrapeRequest<'a> {
    url: &'a str,
    wait_time: u32,
}

/// Response from the scraping collaborator.
#[derive(Debug, Clone, Deserialize)]
pub struct ScrapeResult {
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// HTTP client for the scraping service.
#[derive(Clone, Debug)]
pub struct ScraperClient {
    base_url: String,
    internal_api_key: String,
    client: Client,
}

impl ScraperClient {
    /// Create a client for the given base URL.
    pub fn new(base_url: String, internal_api_key: String) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            base_url,
            internal_api_key,
            client,
        })
    }

    /// Scrape a single source URL.
    pub async fn scrape(&self, source_url: &str) -> Result<ScrapeResult> {
        let request = ScrapeRequest {
            url: source_url,
            wait_time: SCRAPE_WAIT_SECONDS,
        };

        let response = self
            .client
            .post(format!("{}/scrape", self.base_url))
            .header(INTERNAL_KEY_HEADER, &self.internal_api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow!("scrape request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("scraping service returned {status}: {body}"));
        }

        let result: ScrapeResult = response
            .json()
            .await
            .map_err(|e| anyhow!("failed to parse scrape response: {e}"))?;

        if !result.success {
            let reason = result.error.unwrap_or_else(|| "unknown error".to_string());
            return Err(anyhow!("scrape unsuccessful for {source_url}: {reason}"));
        }

        Ok(result)
    }
}
