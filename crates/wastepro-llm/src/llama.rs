//! Local Llama provider over the Ollama chat endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provider::{ChatMessage, LlmError, LlmProvider, LlmResult, PromptRequest};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3.2";

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: OllamaMessage,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    content: String,
}

pub struct LlamaProvider {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl LlamaProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: DEFAULT_MODEL.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn localhost() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// Shared request path for the Ollama-style `/api/chat` endpoint.
pub(crate) async fn ollama_chat(
    client: &reqwest::Client,
    base_url: &str,
    model: &str,
    request: &PromptRequest,
) -> LlmResult<String> {
    // Ollama's structured-output switch is the coarse `format: "json"`;
    // any schema request maps onto it.
    let format: Option<&str> = request.response_format.as_ref().map(|value| match value {
        Value::String(s) if s == "text" => "text",
        _ => "json",
    });
    let body = OllamaRequest {
        model,
        messages: &request.messages,
        stream: false,
        format,
    };
    let response = client
        .post(format!("{base_url}/api/chat"))
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
        return Err(LlmError::ApiError(format!("{status}: {text}")));
    }

    let parsed: OllamaResponse = response
        .json()
        .await
        .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
    Ok(parsed.message.content)
}

#[async_trait]
impl LlmProvider for LlamaProvider {
    fn name(&self) -> &str {
        "llama"
    }

    async fn generate_response(&self, request: &PromptRequest) -> LlmResult<String> {
        ollama_chat(&self.client, &self.base_url, &self.model, request).await
    }
}
