//! Client for the hosted generative-AI endpoint behind the insight panels.
//!
//! The response is opaque narrative text; nothing downstream may assume a
//! schema. A missing key or a failed call degrades the insight panel only,
//! never the surrounding action.

use std::time::Duration;

use serde_json::json;

use crate::ipc::error::ApiError;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";

pub struct InsightsClient {
    api_key: Option<String>,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl InsightsClient {
    pub fn from_env() -> Self {
        let timeout_secs = std::env::var("ACADBOOST_AI_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(20);
        InsightsClient {
            api_key: std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty()),
            model: std::env::var("ACADBOOST_AI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            base_url: std::env::var("ACADBOOST_AI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// One blocking request with a single retry on transport failure.
    pub fn summarize(&self, prompt: &str) -> Result<String, ApiError> {
        let Some(key) = self.api_key.as_deref() else {
            return Err(ApiError::ExternalUnavailable(
                "GEMINI_API_KEY is not set".to_string(),
            ));
        };

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("http client: {e}"))?;
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let mut last_err = String::new();
        for attempt in 0..2 {
            if attempt > 0 {
                tracing::warn!(error = %last_err, "insight request failed, retrying once");
            }
            match client
                .post(&url)
                .header("x-goog-api-key", key)
                .json(&body)
                .send()
            {
                Ok(resp) => {
                    let status = resp.status();
                    if !status.is_success() {
                        last_err = format!("upstream returned {}", status);
                        continue;
                    }
                    let value: serde_json::Value = match resp.json() {
                        Ok(v) => v,
                        Err(e) => {
                            last_err = format!("bad response body: {e}");
                            continue;
                        }
                    };
                    match extract_text(&value) {
                        Some(text) => return Ok(text),
                        None => {
                            last_err = "response carried no text".to_string();
                            continue;
                        }
                    }
                }
                Err(e) => {
                    last_err = e.to_string();
                }
            }
        }
        Err(ApiError::ExternalUnavailable(last_err))
    }
}

/// Pull candidate text out of a generateContent response. Free text only;
/// shape beyond `candidates[].content.parts[].text` is not relied on.
fn extract_text(value: &serde_json::Value) -> Option<String> {
    let parts = value
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let joined = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join("\n");
    if joined.trim().is_empty() {
        None
    } else {
        Some(joined)
    }
}
