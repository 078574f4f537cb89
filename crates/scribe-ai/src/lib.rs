//! Speech-to-text and transcript analysis adapters.
//!
//! This crate provides:
//! - The `Transcriber` and `Analyzer` capabilities
//! - OpenAI Whisper transcription over multipart HTTP
//! - Gemini transcript annotation with model fallback
//! - Mock providers used when no API key is configured

pub mod analyzer;
pub mod config;
pub mod error;
pub mod gemini;
pub mod mock;
pub mod prompt;
pub mod transcriber;
pub mod whisper;

pub use analyzer::Analyzer;
pub use config::{create_analyzer, create_transcriber, AiConfig};
pub use error::{AiError, AiResult};
pub use gemini::GeminiAnalyzer;
pub use mock::{MockAnalyzer, MockTranscriber};
pub use transcriber::{AudioInput, Transcriber};
pub use whisper::WhisperTranscriber;
