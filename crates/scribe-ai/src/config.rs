//! Provider configuration and selection.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::analyzer::Analyzer;
use crate::error::AiResult;
use crate::gemini::{GeminiAnalyzer, DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODELS};
use crate::mock::{MockAnalyzer, MockTranscriber};
use crate::transcriber::Transcriber;
use crate::whisper::{WhisperTranscriber, DEFAULT_OPENAI_BASE_URL, DEFAULT_WHISPER_MODEL};

/// AI provider configuration.
#[derive(Debug, Clone)]
pub struct AiConfig {
    /// OpenAI key; mock transcription when unset
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub whisper_model: String,
    pub whisper_timeout: Duration,
    /// Gemini key; mock analysis when unset
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub gemini_models: Vec<String>,
    pub gemini_timeout: Duration,
    /// Simulated latency of the mock providers
    pub mock_delay: Duration,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            whisper_model: DEFAULT_WHISPER_MODEL.to_string(),
            whisper_timeout: Duration::from_secs(120),
            gemini_api_key: None,
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            gemini_models: DEFAULT_GEMINI_MODELS.iter().map(|m| m.to_string()).collect(),
            gemini_timeout: Duration::from_secs(60),
            mock_delay: Duration::from_secs(1),
        }
    }
}

impl AiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            openai_api_key: non_empty_var("OPENAI_API_KEY"),
            openai_base_url: non_empty_var("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            whisper_model: non_empty_var("WHISPER_MODEL").unwrap_or(defaults.whisper_model),
            whisper_timeout: Duration::from_secs(
                std::env::var("WHISPER_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            ),
            gemini_api_key: non_empty_var("GEMINI_API_KEY"),
            gemini_base_url: non_empty_var("GEMINI_BASE_URL").unwrap_or(defaults.gemini_base_url),
            gemini_models: non_empty_var("GEMINI_MODELS")
                .map(|s| {
                    s.split(',')
                        .map(|m| m.trim().to_string())
                        .filter(|m| !m.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.gemini_models),
            gemini_timeout: Duration::from_secs(
                std::env::var("GEMINI_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            mock_delay: Duration::from_millis(
                std::env::var("MOCK_AI_DELAY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1000),
            ),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Build the configured transcriber, falling back to the mock.
pub fn create_transcriber(config: &AiConfig) -> AiResult<Arc<dyn Transcriber>> {
    match &config.openai_api_key {
        Some(key) => {
            info!(model = %config.whisper_model, "Using Whisper transcriber");
            Ok(Arc::new(WhisperTranscriber::new(
                key.clone(),
                config.openai_base_url.clone(),
                config.whisper_model.clone(),
                config.whisper_timeout,
            )?))
        }
        None => {
            warn!("OPENAI_API_KEY not set, using mock transcriber");
            Ok(Arc::new(MockTranscriber::new(config.mock_delay)))
        }
    }
}

/// Build the configured analyzer, falling back to the mock.
pub fn create_analyzer(config: &AiConfig) -> AiResult<Arc<dyn Analyzer>> {
    match &config.gemini_api_key {
        Some(key) => {
            info!(models = ?config.gemini_models, "Using Gemini analyzer");
            Ok(Arc::new(GeminiAnalyzer::new(
                key.clone(),
                config.gemini_base_url.clone(),
                config.gemini_models.clone(),
                config.gemini_timeout,
            )?))
        }
        None => {
            warn!("GEMINI_API_KEY not set, using mock analyzer");
            Ok(Arc::new(MockAnalyzer::new(config.mock_delay)))
        }
    }
}
