//! Processing strategies.

use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Which subset of {transcription, analysis} a job's pipeline performs.
///
/// The strategy only selects the pipeline shape. Which provider implements
/// each step is injected at deployment time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    TranscribeOnly,
    TranscribeAndAnalyze,
    AnalyzeOnly,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::TranscribeOnly => "transcribe_only",
            Strategy::TranscribeAndAnalyze => "transcribe_and_analyze",
            Strategy::AnalyzeOnly => "analyze_only",
        }
    }

    pub fn needs_transcription(&self) -> bool {
        matches!(self, Strategy::TranscribeOnly | Strategy::TranscribeAndAnalyze)
    }

    pub fn needs_analysis(&self) -> bool {
        matches!(self, Strategy::TranscribeAndAnalyze | Strategy::AnalyzeOnly)
    }

    /// Progress reported once transcription finishes.
    pub fn transcription_checkpoint(&self) -> u8 {
        if self.needs_analysis() {
            50
        } else {
            100
        }
    }
}

impl FromStr for Strategy {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "transcribe_only" => Ok(Strategy::TranscribeOnly),
            "transcribe_and_analyze" => Ok(Strategy::TranscribeAndAnalyze),
            "analyze_only" => Ok(Strategy::AnalyzeOnly),
            _ => Err(ModelError::invalid_strategy(s)),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
