//! LLM service clients
//!
//! Two providers are recognized. The multimodal transcription contract
//! (file upload, streamed text generation, file deletion) is served by the
//! Gemini File API; translation goes to Gemini or OpenAI depending on the
//! configured model name. Stages depend on the [`MediaModel`] / [`TextModel`]
//! traits so tests can substitute a mock transport.

pub mod gemini;
pub mod openai;
pub mod pricing;

use async_trait::async_trait;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::ChunkFormat;
use crate::error::{PipelineError, Result};

/// Token counts reported by a provider for one call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A complete text response with its token accounting
#[derive(Debug, Clone)]
pub struct TextResponse {
    pub text: String,
    pub usage: TokenUsage,
}

/// Handle to a file uploaded to the multimodal provider
#[derive(Debug, Clone)]
pub struct RemoteFile {
    /// Server-assigned resource name (`files/...`), used for deletion
    pub name: String,
    /// URI referenced from generation requests
    pub uri: String,
    /// MIME type declared at upload
    pub mime_type: String,
}

/// LLM provider, selected by a substring match on the model identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Gemini,
    OpenAi,
}

/// Model-name based provider selection.
pub fn provider_for_model(model: &str) -> Provider {
    if model.to_lowercase().contains("gemini") {
        Provider::Gemini
    } else {
        Provider::OpenAi
    }
}

/// MIME type of a media slice.
pub fn mime_type_for(format: ChunkFormat) -> &'static str {
    match format {
        ChunkFormat::Audio => "audio/mpeg",
        ChunkFormat::Video => "video/mp4",
    }
}

/// Multimodal LLM: upload media, generate from it, delete the upload.
///
/// `upload` and `generate_from_file` take the cancellation flag and must
/// drop their in-flight request when it flips. `delete_file` deliberately
/// does not: the uploaded remote resource is deleted even on cancellation.
#[async_trait]
pub trait MediaModel: Send + Sync {
    /// Upload a local file; blocks until the remote file is ready for use.
    async fn upload(
        &self,
        path: &Path,
        mime_type: &str,
        cancelled: &AtomicBool,
    ) -> Result<RemoteFile>;

    /// Generate text from an uploaded file plus a prompt, collecting the
    /// whole streamed response before returning.
    async fn generate_from_file(
        &self,
        model: &str,
        file: &RemoteFile,
        prompt: &str,
        cancelled: &AtomicBool,
    ) -> Result<TextResponse>;

    /// Delete an uploaded file. Deleting an already-deleted file is not an
    /// error.
    async fn delete_file(&self, file: &RemoteFile) -> Result<()>;
}

/// Text LLM: single prompt in, full response out. Implementations must drop
/// the in-flight request when the cancellation flag flips.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        cancelled: &AtomicBool,
    ) -> Result<TextResponse>;
}

/// Resolve once the cancellation flag flips.
async fn wait_cancelled(cancelled: &AtomicBool) {
    while !cancelled.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Race a future against the cancellation flag. On cancellation the future
/// is dropped, which aborts any in-flight request it carries.
pub(crate) async fn abort_on_cancel<F: Future>(
    future: F,
    cancelled: &AtomicBool,
) -> Result<F::Output> {
    tokio::select! {
        output = future => Ok(output),
        _ = wait_cancelled(cancelled) => Err(PipelineError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_for_model() {
        assert_eq!(provider_for_model("gemini-2.5-pro"), Provider::Gemini);
        assert_eq!(provider_for_model("models/Gemini-2.0-flash"), Provider::Gemini);
        assert_eq!(provider_for_model("gpt-4o-mini"), Provider::OpenAi);
        assert_eq!(provider_for_model("o3"), Provider::OpenAi);
    }

    #[test]
    fn test_mime_type_for() {
        assert_eq!(mime_type_for(ChunkFormat::Audio), "audio/mpeg");
        assert_eq!(mime_type_for(ChunkFormat::Video), "video/mp4");
    }

    #[tokio::test]
    async fn test_abort_on_cancel_drops_pending_future() {
        let cancelled = AtomicBool::new(true);
        let result = abort_on_cancel(std::future::pending::<()>(), &cancelled).await;
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }

    #[tokio::test]
    async fn test_abort_on_cancel_passes_result_through() {
        let cancelled = AtomicBool::new(false);
        let result = abort_on_cancel(async { 7 }, &cancelled).await;
        assert_eq!(result.unwrap(), 7);
    }
}
