//! The speech-to-text capability.

use async_trait::async_trait;

use crate::error::AiResult;

/// Audio handed to a transcriber.
#[derive(Debug, Clone)]
pub struct AudioInput {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl AudioInput {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }

    /// MIME type guessed from the file extension.
    pub fn mime_type(&self) -> &'static str {
        let ext = self
            .filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "mp3" => "audio/mpeg",
            "wav" => "audio/wav",
            "m4a" => "audio/mp4",
            "flac" => "audio/flac",
            "mp4" => "video/mp4",
            "webm" => "audio/webm",
            "txt" => "text/plain",
            _ => "application/octet-stream",
        }
    }
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &AudioInput) -> AiResult<String>;

    /// Provider name, for logs.
    fn name(&self) -> &str;
}
