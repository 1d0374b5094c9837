//! Self-hosted OSS-GPT provider.
//!
//! Targets a departmental gpt-oss deployment that speaks the Ollama chat
//! protocol.

use async_trait::async_trait;

use crate::llama::ollama_chat;
use crate::provider::{LlmProvider, LlmResult, PromptRequest};

const DEFAULT_MODEL: &str = "gpt-oss:20b";

pub struct OssGptProvider {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OssGptProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: DEFAULT_MODEL.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl LlmProvider for OssGptProvider {
    fn name(&self) -> &str {
        "ossgpt"
    }

    async fn generate_response(&self, request: &PromptRequest) -> LlmResult<String> {
        ollama_chat(&self.client, &self.base_url, &self.model, request).await
    }
}
