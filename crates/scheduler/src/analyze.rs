//! Analysis collaborator client.
//!
//! The analysis service fronts a language model, and its responses are only
//! nominally JSON: the scored object can arrive bare, wrapped in prose, or
//! inside a fenced code block. The decode ladder here accepts any of those
//! shapes as long as a numeric `relevance_score` can be recovered, and clamps
//! out-of-range values at the boundary.

use anyhow::{anyhow, bail, Result};
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

const INTERNAL_KEY_HEADER: &str = "X-Internal-API-Key";

/// Token budget requested from the analysis model.
const MAX_TOKENS: u32 = 1000;

/// Scraped content is truncated to this many characters before submission.
const MAX_CONTENT_CHARS: usize = 12_000;

const DEFAULT_TITLE: &str = "Alert";
const DEFAULT_SUMMARY: &str = "No summary available";

/// Request body for the analyze endpoint.
#[derive(Debug, Serialize)]
struct AnalysisRequest<'a> {
    content: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    model: &'a str,
}

/// A decoded analysis result.
#[derive(Debug, Clone, Deserialize)]
pub struct Analysis {
    pub relevance_score: i32,
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// HTTP client for the analysis service.
#[derive(Clone, Debug)]
pub struct AnalyzerClient {
    base_url: String,
    internal_api_key: String,
    model: String,
    client: Client,
}

impl AnalyzerClient {
    /// Create a client for the given base URL.
    pub fn new(base_url: String, internal_api_key: String, model: String) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            base_url,
            internal_api_key,
            model,
            client,
        })
    }

    /// Submit content plus the job's prompt for relevance scoring.
    pub async fn analyze(&self, content: &str, prompt: &str) -> Result<Analysis> {
        let truncated = truncate_chars(content, MAX_CONTENT_CHARS);
        let request = AnalysisRequest {
            content: &truncated,
            prompt,
            max_tokens: MAX_TOKENS,
            model: &self.model,
        };

        let response = self
            .client
            .post(format!("{}/analyze", self.base_url))
            .header(INTERNAL_KEY_HEADER, &self.internal_api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow!("analysis request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("analysis service returned {status}: {body}"));
        }

        let text = response.text().await?;

        // An explicit failure from the collaborator is terminal for the task.
        if let Ok(value) = serde_json::from_str::<JsonValue>(&text) {
            if value.get("success").and_then(JsonValue::as_bool) == Some(false) {
                let reason = value
                    .get("error")
                    .and_then(JsonValue::as_str)
                    .unwrap_or("unknown error");
                bail!("analysis unsuccessful: {reason}");
            }
        }

        parse_analysis(&text)
    }
}

/// Decode an analysis result from a possibly-messy response body.
///
/// Ladder: bare JSON object → fenced ```json block → embedded object
/// containing `relevance_score` → bare regex field extraction.
pub fn parse_analysis(raw: &str) -> Result<Analysis> {
    if let Ok(value) = serde_json::from_str::<JsonValue>(raw) {
        if let Some(analysis) = analysis_from_value(&value) {
            return Ok(analysis);
        }
    }

    let fenced = Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```")?;
    for caps in fenced.captures_iter(raw) {
        if let Ok(value) = serde_json::from_str::<JsonValue>(&caps[1]) {
            if let Some(analysis) = analysis_from_value(&value) {
                return Ok(analysis);
            }
        }
    }

    let embedded = Regex::new(r#"\{[^{}]*"relevance_score"[^{}]*\}"#)?;
    for found in embedded.find_iter(raw) {
        if let Ok(value) = serde_json::from_str::<JsonValue>(found.as_str()) {
            if let Some(analysis) = analysis_from_value(&value) {
                return Ok(analysis);
            }
        }
    }

    // Last resort: pull the fields out individually.
    let score_re = Regex::new(r#""?relevance_score"?\s*:\s*(-?\d+)"#)?;
    if let Some(caps) = score_re.captures(raw) {
        let score: i64 = caps[1].parse()?;
        let title = capture_string(raw, "title")?.unwrap_or_else(|| DEFAULT_TITLE.to_string());
        let summary =
            capture_string(raw, "summary")?.unwrap_or_else(|| DEFAULT_SUMMARY.to_string());
        return Ok(Analysis {
            relevance_score: clamp_score(score as f64),
            title,
            summary,
            key_points: Vec::new(),
            confidence: 0.0,
            reasoning: None,
        });
    }

    bail!("no relevance_score found in analysis response")
}

fn analysis_from_value(value: &JsonValue) -> Option<Analysis> {
    let obj = value.as_object()?;
    let score = obj.get("relevance_score")?.as_f64()?;

    let key_points = obj
        .get("key_points")
        .and_then(JsonValue::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(JsonValue::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default();

    Some(Analysis {
        relevance_score: clamp_score(score),
        title: obj
            .get("title")
            .and_then(JsonValue::as_str)
            .unwrap_or(DEFAULT_TITLE)
            .to_string(),
        summary: obj
            .get("summary")
            .and_then(JsonValue::as_str)
            .unwrap_or(DEFAULT_SUMMARY)
            .to_string(),
        key_points,
        confidence: obj
            .get("confidence")
            .and_then(JsonValue::as_f64)
            .unwrap_or(0.0)
            .clamp(0.0, 1.0) as f32,
        reasoning: obj
            .get("reasoning")
            .and_then(JsonValue::as_str)
            .map(ToString::to_string),
    })
}

fn capture_string(raw: &str, field: &str) -> Result<Option<String>> {
    let re = Regex::new(&format!(r#""{field}"\s*:\s*"([^"]*)""#))?;
    Ok(re.captures(raw).map(|caps| caps[1].to_string()))
}

fn clamp_score(score: f64) -> i32 {
    score.clamp(0.0, 100.0) as i32
}

/// Truncate on a character boundary.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_json() {
        let raw = r#"{"relevance_score": 82, "title": "Q3 beat", "summary": "Revenue up 12%", "confidence": 0.9}"#;
        let analysis = parse_analysis(raw).unwrap();
        assert_eq!(analysis.relevance_score, 82);
        assert_eq!(analysis.title, "Q3 beat");
        assert_eq!(analysis.summary, "Revenue up 12%");
    }

    #[test]
    fn parses_fenced_block_inside_prose() {
        let raw = "Here is my analysis:\n```json\n{\"relevance_score\": 64, \"title\": \"Note\", \"summary\": \"S\"}\n```\nHope that helps!";
        let analysis = parse_analysis(raw).unwrap();
        assert_eq!(analysis.relevance_score, 64);
        assert_eq!(analysis.title, "Note");
    }

    #[test]
    fn parses_embedded_object_without_fences() {
        let raw = r#"The result is {"relevance_score": 55, "title": "T", "summary": "S"} as requested."#;
        let analysis = parse_analysis(raw).unwrap();
        assert_eq!(analysis.relevance_score, 55);
    }

    #[test]
    fn falls_back_to_field_extraction() {
        let raw = "relevance_score: 71\nsome broken { json here";
        let analysis = parse_analysis(raw).unwrap();
        assert_eq!(analysis.relevance_score, 71);
        assert_eq!(analysis.title, DEFAULT_TITLE);
        assert_eq!(analysis.summary, DEFAULT_SUMMARY);
    }

    #[test]
    fn clamps_out_of_range_values() {
        let raw = r#"{"relevance_score": 140, "title": "T", "summary": "S", "confidence": 3.5}"#;
        let analysis = parse_analysis(raw).unwrap();
        assert_eq!(analysis.relevance_score, 100);
        assert!((analysis.confidence - 1.0).abs() < f32::EPSILON);

        let raw = r#"{"relevance_score": -10, "title": "T", "summary": "S"}"#;
        assert_eq!(parse_analysis(raw).unwrap().relevance_score, 0);
    }

    #[test]
    fn rejects_scoreless_responses() {
        assert!(parse_analysis("I could not analyze this content.").is_err());
    }

    #[test]
    fn missing_fields_get_defaults() {
        let raw = r#"{"relevance_score": 50}"#;
        let analysis = parse_analysis(raw).unwrap();
        assert_eq!(analysis.title, DEFAULT_TITLE);
        assert_eq!(analysis.summary, DEFAULT_SUMMARY);
        assert!(analysis.key_points.is_empty());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "é".repeat(20);
        let truncated = truncate_chars(&text, 10);
        assert_eq!(truncated.chars().count(), 10);
    }
}
