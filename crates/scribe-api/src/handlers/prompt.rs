//! Analysis prompt template.

use axum::Json;
use serde::{Deserialize, Serialize};

/// Body of `GET /v1/prompt`.
#[derive(Debug, Serialize, Deserialize)]
pub struct PromptResponse {
    /// Default analysis prompt; usable as `custom_prompt` on submissions
    pub prompt: String,
    pub placeholders: Vec<String>,
}

/// Return the default analysis prompt template.
pub async fn get_prompt() -> Json<PromptResponse> {
    Json(PromptResponse {
        prompt: scribe_ai::prompt::default_template(),
        placeholders: vec!["{set_list}".to_string(), "{transcript}".to_string()],
    })
}
