//! Anthropic messages-API provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::provider::{LlmError, LlmProvider, LlmResult, PromptRequest};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-3-5-haiku-20241022";
const DEFAULT_MAX_TOKENS: u32 = 2048;

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<RequestMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct RequestMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: String,
}

pub struct ClaudeProvider {
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl ClaudeProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: 0.0,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl LlmProvider for ClaudeProvider {
    fn name(&self) -> &str {
        "claude"
    }

    async fn generate_response(&self, request: &PromptRequest) -> LlmResult<String> {
        // The messages API has no response_format parameter; a JSON-schema
        // request degrades into a system instruction.
        let mut system_parts: Vec<String> = request
            .messages
            .iter()
            .filter(|m| m.role == "system")
            .map(|m| m.content.clone())
            .collect();
        if let Some(format) = &request.response_format {
            system_parts.push(format!(
                "Respond with a single JSON value matching this response format, with no surrounding text: {format}"
            ));
        }

        let body = MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: if system_parts.is_empty() {
                None
            } else {
                Some(system_parts.join("\n\n"))
            },
            messages: request
                .messages
                .iter()
                .filter(|m| m.role != "system")
                .map(|m| RequestMessage {
                    role: m.role.clone(),
                    content: m.content.clone(),
                })
                .collect(),
            temperature: request.temperature.unwrap_or(self.temperature),
        };

        let response = self
            .client
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    LlmError::ConnectionFailed(e.to_string())
                } else {
                    LlmError::ApiError(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 => LlmError::AuthenticationFailed,
                429 => LlmError::RateLimited(60),
                _ => LlmError::ApiError(format!("{status}: {text}")),
            });
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        parsed
            .content
            .into_iter()
            .next()
            .map(|block| block.text)
            .ok_or_else(|| LlmError::InvalidResponse("no content in response".into()))
    }
}
