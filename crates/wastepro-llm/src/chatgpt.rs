//! OpenAI chat-completions provider.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provider::{ChatMessage, LlmError, LlmProvider, LlmResult, PromptRequest};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<&'a Value>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

pub struct ChatGptProvider {
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

impl ChatGptProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.into(),
            model: DEFAULT_MODEL.into(),
            temperature: 0.0,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    fn check_status(status: reqwest::StatusCode, body: &str) -> LlmResult<()> {
        if status.is_success() {
            return Ok(());
        }
        match status.as_u16() {
            401 => Err(LlmError::AuthenticationFailed),
            429 => Err(LlmError::RateLimited(60)),
            _ => Err(LlmError::ApiError(format!("{status}: {body}"))),
        }
    }

    fn map_send_error(e: reqwest::Error) -> LlmError {
        if e.is_connect() {
            LlmError::ConnectionFailed(e.to_string())
        } else if e.is_timeout() {
            LlmError::Timeout(0)
        } else {
            LlmError::ApiError(e.to_string())
        }
    }

    async fn complete(&self, request: &PromptRequest) -> LlmResult<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature.unwrap_or(self.temperature),
            response_format: request.response_format.as_ref(),
            stream: false,
        };
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Self::check_status(status, &text).unwrap_err());
        }
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("no content in response".into()))
    }

    /// Streamed completion, accumulated into the full string before
    /// returning.
    async fn complete_streaming(&self, request: &PromptRequest) -> LlmResult<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature.unwrap_or(self.temperature),
            response_format: request.response_format.as_ref(),
            stream: true,
        };
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Self::check_status(status, &text).unwrap_err());
        }

        let mut reply = String::new();
        let mut buffer = String::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::ApiError(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_string();
                buffer.drain(..=newline);
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    return Ok(reply);
                }
                if let Ok(chunk) = serde_json::from_str::<StreamChunk>(data) {
                    if let Some(delta) = chunk
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|choice| choice.delta.content)
                    {
                        reply.push_str(&delta);
                    }
                }
            }
        }
        Ok(reply)
    }
}

#[async_trait]
impl LlmProvider for ChatGptProvider {
    fn name(&self) -> &str {
        "chatgpt"
    }

    async fn generate_response(&self, request: &PromptRequest) -> LlmResult<String> {
        if request.streaming.unwrap_or(false) {
            self.complete_streaming(request).await
        } else {
            self.complete(request).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let provider = ChatGptProvider::new("sk-test")
            .with_model("gpt-4o")
            .with_base_url("http://localhost:8080/v1")
            .with_temperature(0.5);
        assert_eq!(provider.model, "gpt-4o");
        assert_eq!(provider.base_url, "http://localhost:8080/v1");
        assert_eq!(provider.temperature, 0.5);
    }
}
