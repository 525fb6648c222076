//! OpenAI chat-completions client
//!
//! Translation-only: one prompt in, the full completion out, token counts
//! from the `usage` block.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::llm::{abort_on_cancel, TextModel, TextResponse, TokenUsage};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiClient {
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

}

#[async_trait]
impl TextModel for OpenAiClient {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        cancelled: &AtomicBool,
    ) -> Result<TextResponse> {
        let body = serde_json::json!({
            "model": model,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let request = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();
        let resp = abort_on_cancel(request, cancelled).await??;
        let status = resp.status();
        if !status.is_success() {
            return Err(PipelineError::Api(format!(
                "chat completion failed ({}): {}",
                status,
                resp.text().await.unwrap_or_default()
            )));
        }

        let parsed: ChatResponse = abort_on_cancel(resp.json(), cancelled).await??;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| PipelineError::Api("chat completion had no content".into()))?;
        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                input_tokens: u.prompt_tokens.unwrap_or(0),
                output_tokens: u.completion_tokens.unwrap_or(0),
            })
            .unwrap_or_default();

        Ok(TextResponse { text, usage })
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_response_parsing() {
        let json = r#"{
            "choices": [{"message": {"role": "assistant", "content": "translated"}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 45, "total_tokens": 165}
        }"#;
        let parsed: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("translated")
        );
        assert_eq!(parsed.usage.as_ref().unwrap().prompt_tokens, Some(120));
    }

    #[test]
    fn test_chat_response_without_usage() {
        let json = r#"{"choices": [{"message": {"content": "x"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.usage.is_none());
    }
}
