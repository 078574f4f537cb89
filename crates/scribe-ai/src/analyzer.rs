//! The transcript annotation capability.

use async_trait::async_trait;
use scribe_models::Hints;

use crate::error::AiResult;

#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Annotate `text`. Hints are passed through untouched.
    async fn analyze(&self, text: &str, hints: &Hints) -> AiResult<String>;

    /// Provider name, for logs.
    fn name(&self) -> &str;
}
