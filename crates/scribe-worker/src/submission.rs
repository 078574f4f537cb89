//! Submission payloads and their synchronous validation.

use scribe_models::{JobId, Strategy};

use crate::error::{JobError, JobResult};

/// Audio formats accepted for transcription.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "flac", "mp4", "webm"];

/// Transcript format accepted for analysis-only jobs.
pub const TEXT_EXTENSION: &str = "txt";

/// What a client hands to `submit`.
#[derive(Debug, Clone)]
pub enum SubmissionInput {
    /// An uploaded file, stored in the blob store before the job is created.
    Upload { filename: String, bytes: Vec<u8> },
    /// Inline transcript text.
    Text(String),
    /// Analyze the transcript of an earlier job.
    SourceJob(JobId),
}

impl SubmissionInput {
    pub fn upload(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::Upload {
            filename: filename.into(),
            bytes,
        }
    }
}

/// Parse a client-supplied strategy name.
pub fn parse_strategy(value: &str) -> JobResult<Strategy> {
    value.parse::<Strategy>().map_err(JobError::from)
}

/// Lowercased extension of `filename`, without the dot.
pub fn file_extension(filename: &str) -> Option<String> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// Content type stored alongside an uploaded blob.
pub fn content_type_for(filename: &str) -> &'static str {
    match file_extension(filename).as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("m4a") => "audio/mp4",
        Some("flac") => "audio/flac",
        Some("mp4") => "video/mp4",
        Some("webm") => "audio/webm",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// Reject payloads that can never succeed. Nothing is persisted on error.
pub fn validate(input: &SubmissionInput, strategy: Strategy, max_upload_bytes: usize) -> JobResult<()> {
    match input {
        SubmissionInput::Upload { filename, bytes } => {
            if filename.trim().is_empty() {
                return Err(JobError::invalid_input("No file provided"));
            }
            if bytes.is_empty() {
                return Err(JobError::invalid_input("Uploaded file is empty"));
            }
            if bytes.len() > max_upload_bytes {
                return Err(JobError::invalid_input(format!(
                    "File too large: {} bytes (limit {} MB)",
                    bytes.len(),
                    max_upload_bytes / (1024 * 1024)
                )));
            }

            let ext = file_extension(filename).unwrap_or_default();
            let allowed = if strategy.needs_transcription() {
                AUDIO_EXTENSIONS.contains(&ext.as_str())
            } else {
                ext == TEXT_EXTENSION
            };
            if !allowed {
                let expected = if strategy.needs_transcription() {
                    AUDIO_EXTENSIONS
                        .iter()
                        .map(|e| format!(".{}", e))
                        .collect::<Vec<_>>()
                        .join(", ")
                } else {
                    format!(".{}", TEXT_EXTENSION)
                };
                return Err(JobError::invalid_input(format!(
                    "Unsupported file type '{}' for {}. Allowed: {}",
                    filename, strategy, expected
                )));
            }
            Ok(())
        }
        SubmissionInput::Text(text) => {
            if strategy.needs_transcription() {
                return Err(JobError::invalid_input(format!(
                    "{} requires an audio upload",
                    strategy
                )));
            }
            if text.trim().is_empty() {
                return Err(JobError::invalid_input("Transcript text is empty"));
            }
            Ok(())
        }
        SubmissionInput::SourceJob(job_id) => {
            if strategy.needs_transcription() {
                return Err(JobError::invalid_input(format!(
                    "{} requires an audio upload",
                    strategy
                )));
            }
            if job_id.as_str().trim().is_empty() {
                return Err(JobError::invalid_input("Source job id is empty"));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 50 * 1024 * 1024;

    #[test]
    fn test_accepts_audio_for_transcription() {
        for name in ["set.mp3", "set.WAV", "a.b.m4a", "clip.webm"] {
            let input = SubmissionInput::upload(name, vec![1, 2, 3]);
            assert!(validate(&input, Strategy::TranscribeOnly, LIMIT).is_ok(), "{}", name);
        }
    }

    #[test]
    fn test_rejects_empty_upload() {
        let input = SubmissionInput::upload("set.mp3", Vec::new());
        let err = validate(&input, Strategy::TranscribeOnly, LIMIT).unwrap_err();
        assert!(matches!(err, JobError::InvalidInput(_)));
    }

    #[test]
    fn test_rejects_oversized_upload() {
        let input = SubmissionInput::upload("set.mp3", vec![0u8; 61]);
        let err = validate(&input, Strategy::TranscribeOnly, 60).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_text_upload_only_for_analysis() {
        let input = SubmissionInput::upload("notes.txt", b"hello".to_vec());
        assert!(validate(&input, Strategy::AnalyzeOnly, LIMIT).is_ok());
        assert!(validate(&input, Strategy::TranscribeAndAnalyze, LIMIT).is_err());

        let audio = SubmissionInput::upload("set.mp3", vec![1]);
        assert!(validate(&audio, Strategy::AnalyzeOnly, LIMIT).is_err());
    }

    #[test]
    fn test_rejects_unknown_extension() {
        let input = SubmissionInput::upload("set.ogg", vec![1]);
        assert!(validate(&input, Strategy::TranscribeOnly, LIMIT).is_err());
        let input = SubmissionInput::upload("noext", vec![1]);
        assert!(validate(&input, Strategy::TranscribeOnly, LIMIT).is_err());
    }

    #[test]
    fn test_inline_text_rules() {
        let short = SubmissionInput::Text("short".into());
        // Short text is accepted here and fails later as a missing precursor
        assert!(validate(&short, Strategy::AnalyzeOnly, LIMIT).is_ok());
        assert!(validate(&SubmissionInput::Text("   ".into()), Strategy::AnalyzeOnly, LIMIT).is_err());
        assert!(validate(&short, Strategy::TranscribeOnly, LIMIT).is_err());
    }

    #[test]
    fn test_parse_strategy() {
        assert_eq!(parse_strategy("transcribe_only").unwrap(), Strategy::TranscribeOnly);
        assert!(matches!(parse_strategy("gpt"), Err(JobError::InvalidStrategy(_))));
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type_for("a.MP3"), "audio/mpeg");
        assert_eq!(content_type_for("dir/a.txt"), "text/plain; charset=utf-8");
        assert_eq!(content_type_for("a"), "application/octet-stream");
    }
}
