//! Core provider trait and request types.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// LLM-related errors.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("rate limited: retry after {0} seconds")]
    RateLimited(u32),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("timeout after {0} seconds")]
    Timeout(u32),
}

/// Result type for LLM operations.
pub type LlmResult<T> = Result<T, LlmError>;

/// One chat turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// A prompt request as carried on the bus.
///
/// `response_format` holds a provider-native JSON-schema response shape;
/// the service passes it through without validating the model's output —
/// validation is the caller's responsibility.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PromptRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming: Option<bool>,
}

impl PromptRequest {
    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self::from_messages(vec![ChatMessage::user(prompt)])
    }

    pub fn with_response_format(mut self, format: Value) -> Self {
        self.response_format = Some(format);
        self
    }
}

/// Builds the OpenAI-style `json_schema` response format used across the
/// generation and evaluation prompts.
pub fn json_schema_format(name: &str, schema: Value) -> Value {
    serde_json::json!({
        "type": "json_schema",
        "json_schema": {
            "name": name,
            "schema": schema,
        }
    })
}

/// A chat-completion provider. Streaming providers accumulate internally
/// and return the full string.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate_response(&self, request: &PromptRequest) -> LlmResult<String>;
}

/// Canned-response provider for tests.
///
/// Responses queued with [`MockProvider::push_response`] are returned in
/// order; once the queue is empty, pattern-matched responses registered
/// with [`MockProvider::with_response`] apply.
pub struct MockProvider {
    queue: Mutex<VecDeque<String>>,
    patterns: Vec<(String, String)>,
    fallback: String,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            patterns: Vec::new(),
            fallback: "{}".into(),
        }
    }

    pub fn with_response(mut self, pattern: &str, response: &str) -> Self {
        self.patterns.push((pattern.into(), response.into()));
        self
    }

    pub fn with_fallback(mut self, response: &str) -> Self {
        self.fallback = response.into();
        self
    }

    pub fn push_response(&self, response: impl Into<String>) {
        self.queue
            .lock()
            .expect("mock queue poisoned")
            .push_back(response.into());
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate_response(&self, request: &PromptRequest) -> LlmResult<String> {
        if let Some(response) = self.queue.lock().expect("mock queue poisoned").pop_front() {
            return Ok(response);
        }
        let prompt: String = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        for (pattern, response) in &self.patterns {
            if prompt.contains(pattern.as_str()) {
                return Ok(response.clone());
            }
        }
        Ok(self.fallback.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queued_responses_come_first() {
        let provider = MockProvider::new().with_response("hello", "pattern");
        provider.push_response("queued");

        let request = PromptRequest::from_prompt("hello there");
        assert_eq!(provider.generate_response(&request).await.unwrap(), "queued");
        assert_eq!(
            provider.generate_response(&request).await.unwrap(),
            "pattern"
        );
    }

    #[test]
    fn request_roundtrips_through_json() {
        let request = PromptRequest::from_messages(vec![
            ChatMessage::system("You are an evaluator."),
            ChatMessage::user("Score this."),
        ])
        .with_response_format(json_schema_format(
            "evaluate_question",
            serde_json::json!({"type": "object"}),
        ));

        let value = serde_json::to_value(&request).unwrap();
        let back: PromptRequest = serde_json::from_value(value).unwrap();
        assert_eq!(back.messages.len(), 2);
        assert!(back.response_format.is_some());
    }
}
