//! Gemini transcript analysis.
//!
//! Sends the comedy set prompt to `generateContent`, trying each configured
//! model in order until one answers.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scribe_models::Hints;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::analyzer::Analyzer;
use crate::error::{AiError, AiResult};
use crate::prompt::build_prompt;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Models tried in order.
pub const DEFAULT_GEMINI_MODELS: &[&str] = &["gemini-2.0-flash", "gemini-2.5-flash", "gemini-2.5-flash-lite"];

/// Gemini API request.
#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

/// Gemini API response.
#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

/// Analyzer backed by the Gemini API.
pub struct GeminiAnalyzer {
    client: Client,
    api_key: String,
    base_url: String,
    models: Vec<String>,
}

impl GeminiAnalyzer {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        models: Vec<String>,
        request_timeout: Duration,
    ) -> AiResult<Self> {
        if models.is_empty() {
            return Err(AiError::config("At least one Gemini model is required"));
        }
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| AiError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            models,
        })
    }

    async fn call_model(&self, model: &str, prompt: &str) -> AiResult<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Api { status, body });
        }

        let parsed: GeminiResponse = response
            .json()
            .await
            .map_err(|e| AiError::invalid_response(format!("Failed to parse Gemini response: {}", e)))?;

        let text: String = parsed
            .candidates
            .first()
            .map(|c| c.content.parts.iter().map(|p| p.text.as_str()).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(AiError::EmptyResponse);
        }
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl Analyzer for GeminiAnalyzer {
    async fn analyze(&self, text: &str, hints: &Hints) -> AiResult<String> {
        let prompt = build_prompt(text, hints);
        let mut last_error = None;

        for model in &self.models {
            info!("Attempting Gemini API with model: {}", model);
            match self.call_model(model, &prompt).await {
                Ok(analysis) => {
                    info!(chars = analysis.len(), "Got analysis from {}", model);
                    return Ok(analysis);
                }
                Err(e) => {
                    warn!("Failed with model {}: {}", model, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AiError::config("No Gemini models configured")))
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn analyzer(server: &MockServer, models: &[&str]) -> GeminiAnalyzer {
        GeminiAnalyzer::new(
            "g-key",
            server.uri(),
            models.iter().map(|m| m.to_string()).collect(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn answer(text: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": text }] } }]
        })
    }

    #[tokio::test]
    async fn test_analyze_returns_first_candidate() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/primary:generateContent"))
            .and(header("x-goog-api-key", "g-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer("**Riff** hi")))
            .expect(1)
            .mount(&server)
            .await;

        let result = analyzer(&server, &["primary"])
            .analyze("hi", &Hints::default())
            .await
            .unwrap();
        assert_eq!(result, "**Riff** hi");
    }

    #[tokio::test]
    async fn test_analyze_falls_back_to_next_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/primary:generateContent"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/models/backup:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(answer("labelled")))
            .expect(1)
            .mount(&server)
            .await;

        let result = analyzer(&server, &["primary", "backup"])
            .analyze("text", &Hints::default())
            .await
            .unwrap();
        assert_eq!(result, "labelled");
    }

    #[tokio::test]
    async fn test_analyze_reports_last_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "candidates": [] })))
            .mount(&server)
            .await;

        let err = analyzer(&server, &["a", "b"])
            .analyze("text", &Hints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::EmptyResponse));
    }

    #[test]
    fn test_requires_a_model() {
        assert!(GeminiAnalyzer::new("k", "http://localhost", vec![], Duration::from_secs(1)).is_err());
    }
}
