//! Gemini API client
//!
//! Covers the three multimodal operations the pipeline needs — resumable
//! file upload, streamed generation referencing the uploaded file, and file
//! deletion — plus plain text generation for translation. Responses report
//! token usage through `usageMetadata`.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::llm::{abort_on_cancel, MediaModel, RemoteFile, TextModel, TextResponse, TokenUsage};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// How long to wait for an uploaded file to leave the PROCESSING state.
const FILE_READY_POLL_INTERVAL: Duration = Duration::from_secs(2);
const FILE_READY_MAX_POLLS: u32 = 90;

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Api(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    async fn poll_until_ready(&self, name: &str, cancelled: &AtomicBool) -> Result<()> {
        for _ in 0..FILE_READY_MAX_POLLS {
            let request = self
                .http
                .get(format!("{}/v1beta/{}", self.base_url, name))
                .query(&[("key", self.api_key.as_str())])
                .send();
            let resp = abort_on_cancel(request, cancelled).await??;
            let status = resp.status();
            if !status.is_success() {
                return Err(PipelineError::Api(format!(
                    "file status check failed ({}): {}",
                    status,
                    resp.text().await.unwrap_or_default()
                )));
            }
            let file: FileResource = abort_on_cancel(resp.json(), cancelled).await??;
            match file.state.as_deref() {
                Some("PROCESSING") => {
                    abort_on_cancel(tokio::time::sleep(FILE_READY_POLL_INTERVAL), cancelled)
                        .await?;
                }
                Some("FAILED") => {
                    return Err(PipelineError::Api(format!(
                        "uploaded file {} failed server-side processing",
                        name
                    )))
                }
                // ACTIVE, or older API versions that omit the state.
                _ => return Ok(()),
            }
        }
        Err(PipelineError::Api(format!(
            "uploaded file {} never became ready",
            name
        )))
    }
}

#[async_trait]
impl MediaModel for GeminiClient {
    async fn upload(
        &self,
        path: &Path,
        mime_type: &str,
        cancelled: &AtomicBool,
    ) -> Result<RemoteFile> {
        let bytes = tokio::fs::read(path).await?;
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "media".to_string());

        // Resumable upload, step 1: announce the file, get the upload URL.
        let request = self
            .http
            .post(format!("{}/upload/v1beta/files", self.base_url))
            .query(&[("key", self.api_key.as_str())])
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&serde_json::json!({ "file": { "display_name": display_name } }))
            .send();
        let start = abort_on_cancel(request, cancelled).await??;
        let status = start.status();
        if !status.is_success() {
            return Err(PipelineError::Api(format!(
                "upload start failed ({}): {}",
                status,
                start.text().await.unwrap_or_default()
            )));
        }
        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or_else(|| PipelineError::Api("upload start returned no upload URL".into()))?;

        // Step 2: send the bytes and finalize in one shot.
        let request = self
            .http
            .post(&upload_url)
            .header("X-Goog-Upload-Command", "upload, finalize")
            .header("X-Goog-Upload-Offset", "0")
            .body(bytes)
            .send();
        let resp = abort_on_cancel(request, cancelled).await??;
        let status = resp.status();
        if !status.is_success() {
            return Err(PipelineError::Api(format!(
                "upload failed ({}): {}",
                status,
                resp.text().await.unwrap_or_default()
            )));
        }
        let envelope: FileEnvelope = abort_on_cancel(resp.json(), cancelled).await??;
        let file = envelope.file;
        let uri = file
            .uri
            .clone()
            .ok_or_else(|| PipelineError::Api("upload response missing file uri".into()))?;
        debug!("uploaded {} as {}", display_name, file.name);

        self.poll_until_ready(&file.name, cancelled).await?;

        Ok(RemoteFile {
            name: file.name,
            uri,
            mime_type: mime_type.to_string(),
        })
    }

    async fn generate_from_file(
        &self,
        model: &str,
        file: &RemoteFile,
        prompt: &str,
        cancelled: &AtomicBool,
    ) -> Result<TextResponse> {
        let body = serde_json::json!({
            "contents": [{
                "parts": [
                    { "file_data": { "mime_type": file.mime_type, "file_uri": file.uri } },
                    { "text": prompt },
                ]
            }]
        });

        let request = self
            .http
            .post(format!(
                "{}/v1beta/models/{}:streamGenerateContent",
                self.base_url, model
            ))
            .query(&[("alt", "sse"), ("key", self.api_key.as_str())])
            .json(&body)
            .send();
        let resp = abort_on_cancel(request, cancelled).await??;
        let status = resp.status();
        if !status.is_success() {
            return Err(PipelineError::Api(format!(
                "streamGenerateContent failed ({}): {}",
                status,
                resp.text().await.unwrap_or_default()
            )));
        }

        // Collect the whole stream before returning; nothing downstream can
        // act on a partial transcript. Cancellation drops the stream (and
        // with it the connection) mid-flight.
        let mut collector = SseCollector::default();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = abort_on_cancel(stream.next(), cancelled).await? {
            let chunk = chunk?;
            collector.feed(&String::from_utf8_lossy(&chunk));
        }
        Ok(collector.finish())
    }

    async fn delete_file(&self, file: &RemoteFile) -> Result<()> {
        let resp = self
            .http
            .delete(format!("{}/v1beta/{}", self.base_url, file.name))
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await?;
        let status = resp.status();
        // Already gone is as good as deleted.
        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            return Err(PipelineError::Api(format!(
                "file deletion failed ({}) for {}",
                status, file.name
            )));
        }
        debug!("deleted remote file {}", file.name);
        Ok(())
    }
}

#[async_trait]
impl TextModel for GeminiClient {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        cancelled: &AtomicBool,
    ) -> Result<TextResponse> {
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });
        let request = self
            .http
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, model
            ))
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send();
        let resp = abort_on_cancel(request, cancelled).await??;
        let status = resp.status();
        if !status.is_success() {
            return Err(PipelineError::Api(format!(
                "generateContent failed ({}): {}",
                status,
                resp.text().await.unwrap_or_default()
            )));
        }
        let parsed: GenerateResponse = abort_on_cancel(resp.json(), cancelled).await??;
        let text = parsed.text();
        if text.is_empty() {
            warn!("empty generation from {}", model);
        }
        Ok(TextResponse {
            text,
            usage: parsed.usage(),
        })
    }
}

/// Incremental collector for `alt=sse` generation streams.
///
/// SSE frames arrive as `data: {json}` lines; chunks from the network need
/// not align with frame boundaries, so partial lines are buffered.
#[derive(Default)]
struct SseCollector {
    buffer: String,
    text: String,
    usage: TokenUsage,
}

impl SseCollector {
    fn feed(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            self.consume_line(line.trim_end());
        }
    }

    fn consume_line(&mut self, line: &str) {
        let Some(payload) = line.strip_prefix("data:").map(str::trim_start) else {
            return;
        };
        match serde_json::from_str::<GenerateResponse>(payload) {
            Ok(parsed) => {
                self.text.push_str(&parsed.text());
                let usage = parsed.usage();
                // Every frame repeats the running totals; the last one wins.
                if usage != TokenUsage::default() {
                    self.usage = usage;
                }
            }
            Err(e) => warn!("unparseable stream frame: {} ({})", payload, e),
        }
    }

    fn finish(mut self) -> TextResponse {
        // A final frame without a trailing newline is still a frame.
        let tail: String = std::mem::take(&mut self.buffer);
        if !tail.trim().is_empty() {
            self.consume_line(tail.trim_end());
        }
        TextResponse {
            text: self.text,
            usage: self.usage,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    usage_metadata: Option<UsageMetadata>,
}

impl GenerateResponse {
    fn text(&self) -> String {
        let mut out = String::new();
        if let Some(candidates) = &self.candidates {
            for candidate in candidates {
                if let Some(parts) = candidate.content.as_ref().and_then(|c| c.parts.as_ref()) {
                    for part in parts {
                        if let Some(text) = &part.text {
                            out.push_str(text);
                        }
                    }
                }
            }
        }
        out
    }

    fn usage(&self) -> TokenUsage {
        self.usage_metadata
            .as_ref()
            .map(|u| TokenUsage {
                input_tokens: u.prompt_token_count.unwrap_or(0),
                output_tokens: u.candidates_token_count.unwrap_or(0),
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    parts: Option<Vec<Part>>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileEnvelope {
    file: FileResource,
}

#[derive(Debug, Deserialize)]
struct FileResource {
    name: String,
    uri: Option<String>,
    state: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(text: &str) -> String {
        format!(
            "data: {{\"candidates\": [{{\"content\": {{\"parts\": [{{\"text\": \"{}\"}}]}}}}]}}\n",
            text
        )
    }

    #[test]
    fn test_sse_collector_joins_frames() {
        let mut collector = SseCollector::default();
        collector.feed(&frame("hello "));
        collector.feed(&frame("world"));
        let resp = collector.finish();
        assert_eq!(resp.text, "hello world");
    }

    #[test]
    fn test_sse_collector_handles_split_frames() {
        let full = frame("split across chunks");
        let (a, b) = full.split_at(25);
        let mut collector = SseCollector::default();
        collector.feed(a);
        collector.feed(b);
        assert_eq!(collector.finish().text, "split across chunks");
    }

    #[test]
    fn test_sse_collector_takes_last_usage() {
        let mut collector = SseCollector::default();
        collector.feed("data: {\"usageMetadata\": {\"promptTokenCount\": 10, \"candidatesTokenCount\": 1}}\n");
        collector.feed("data: {\"usageMetadata\": {\"promptTokenCount\": 10, \"candidatesTokenCount\": 25}}\n");
        let resp = collector.finish();
        assert_eq!(resp.usage.input_tokens, 10);
        assert_eq!(resp.usage.output_tokens, 25);
    }

    #[test]
    fn test_sse_collector_ignores_non_data_lines() {
        let mut collector = SseCollector::default();
        collector.feed(": keepalive\n\n");
        collector.feed(&frame("ok"));
        assert_eq!(collector.finish().text, "ok");
    }

    #[test]
    fn test_sse_collector_final_frame_without_newline() {
        let mut collector = SseCollector::default();
        let full = frame("tail");
        collector.feed(full.trim_end());
        assert_eq!(collector.finish().text, "tail");
    }

    #[test]
    fn test_generate_response_usage_default() {
        let parsed: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.usage(), TokenUsage::default());
        assert_eq!(parsed.text(), "");
    }
}
