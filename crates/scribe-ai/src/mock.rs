//! Mock providers used when no API key is configured.

use std::time::Duration;

use async_trait::async_trait;
use scribe_models::Hints;

use crate::analyzer::Analyzer;
use crate::error::AiResult;
use crate::transcriber::{AudioInput, Transcriber};

/// Returns a canned transcript after an optional delay.
#[derive(Debug, Clone, Default)]
pub struct MockTranscriber {
    delay: Duration,
}

impl MockTranscriber {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, audio: &AudioInput) -> AiResult<String> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(format!(
            "[MOCK TRANSCRIPTION] This is a simulated transcription of {}. \
             In production, this would be real speech-to-text from the Whisper API.",
            audio.filename
        ))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Returns a canned comedy analysis after an optional delay.
#[derive(Debug, Clone, Default)]
pub struct MockAnalyzer {
    delay: Duration,
}

impl MockAnalyzer {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Analyzer for MockAnalyzer {
    async fn analyze(&self, text: &str, hints: &Hints) -> AiResult<String> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let opening: String = text.chars().take(100).collect();
        let yes_no = |present: bool| if present { "Yes" } else { "No" };
        Ok(format!(
            "[MOCK GEMINI ANALYSIS]\n\n\
             **Joke: Opening Bit**\n{}...\n\n\
             **NEW BIT: Performance Test**\n\
             This is a simulated analysis of your comedy performance.\n\n\
             **Riff**\n\
             In production, this would be real analysis from the Gemini API.\n\n\
             Set List Provided: {}\n\
             Custom Prompt: {}",
            opening,
            yes_no(hints.set_list.is_some()),
            yes_no(hints.custom_prompt.is_some()),
        ))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
