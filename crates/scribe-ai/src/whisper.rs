//! OpenAI Whisper transcription.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;
use reqwest::Client;
use tracing::{debug, info};

use crate::error::{AiError, AiResult};
use crate::transcriber::{AudioInput, Transcriber};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_WHISPER_MODEL: &str = "whisper-1";

/// Transcriber backed by the OpenAI audio transcription endpoint.
pub struct WhisperTranscriber {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl WhisperTranscriber {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> AiResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| AiError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: &AudioInput) -> AiResult<String> {
        let url = format!("{}/audio/transcriptions", self.base_url);

        let file_part = multipart::Part::bytes(audio.bytes.clone())
            .file_name(audio.filename.clone())
            .mime_str(audio.mime_type())
            .map_err(|e| AiError::request_failed(format!("mime: {}", e)))?;

        let form = multipart::Form::new()
            .text("model", self.model.clone())
            .text("response_format", "text")
            .part("file", file_part);

        debug!(
            model = %self.model,
            bytes = audio.bytes.len(),
            "Sending audio to Whisper API"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(AiError::Api { status, body });
        }

        let transcript = response.text().await?;
        let transcript = transcript.trim();
        if transcript.is_empty() {
            return Err(AiError::EmptyResponse);
        }

        info!(chars = transcript.len(), "Whisper transcription completed");
        Ok(transcript.to_string())
    }

    fn name(&self) -> &str {
        "whisper"
    }
}
