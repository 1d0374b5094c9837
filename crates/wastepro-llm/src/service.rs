//! The LLM service agent and its bus-side client.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use wastepro_core::config::LlmServiceConfig;
use wastepro_core::{AgentBehavior, AgentHandle, Error, Parcel, Result};

use crate::chatgpt::ChatGptProvider;
use crate::claude::ClaudeProvider;
use crate::llama::LlamaProvider;
use crate::ossgpt::OssGptProvider;
use crate::provider::{LlmError, LlmProvider, LlmResult, PromptRequest};

pub const TOPIC_PROMPT: &str = "Prompt/LlmService/Services";

/// Default deadline for one model round-trip over the bus.
pub const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(120);

/// Build the configured provider. The provider is selected once, at
/// service activation.
pub fn build_provider(config: &LlmServiceConfig) -> Result<Arc<dyn LlmProvider>> {
    let missing = |what: &str| Error::Config(format!("[service.llm] missing {what}"));
    match config.name.as_str() {
        "ChatGpt" => {
            let table = config.chatgpt.clone().unwrap_or_default();
            let api_key = table
                .openai_api_key
                .or(table.api_key)
                .ok_or_else(|| missing("chatgpt.openai_api_key"))?;
            let mut provider = ChatGptProvider::new(api_key);
            if let Some(base_url) = table.base_url {
                provider = provider.with_base_url(base_url);
            }
            if let Some(model) = table.model {
                provider = provider.with_model(model);
            }
            if let Some(temperature) = table.temperature {
                provider = provider.with_temperature(temperature);
            }
            Ok(Arc::new(provider))
        }
        "Claude" => {
            let table = config.claude.clone().unwrap_or_default();
            let api_key = table
                .api_key
                .or(table.openai_api_key)
                .ok_or_else(|| missing("claude.api_key"))?;
            let mut provider = ClaudeProvider::new(api_key);
            if let Some(model) = table.model {
                provider = provider.with_model(model);
            }
            Ok(Arc::new(provider))
        }
        "LLama" => {
            let table = config.llama.clone().unwrap_or_default();
            let mut provider = match table.base_url {
                Some(base_url) => LlamaProvider::new(base_url),
                None => LlamaProvider::localhost(),
            };
            if let Some(model) = table.model {
                provider = provider.with_model(model);
            }
            Ok(Arc::new(provider))
        }
        "OssGpt" => {
            let table = config.ossgpt.clone().unwrap_or_default();
            let base_url = table.base_url.ok_or_else(|| missing("ossgpt.base_url"))?;
            let mut provider = OssGptProvider::new(base_url);
            if let Some(model) = table.model {
                provider = provider.with_model(model);
            }
            Ok(Arc::new(provider))
        }
        other => Err(Error::Config(format!("unknown LLM provider: {other}"))),
    }
}

/// Exposes one topic; all providers hide behind `generate_response`.
pub struct LlmService {
    config: LlmServiceConfig,
    provider: OnceLock<Arc<dyn LlmProvider>>,
}

impl LlmService {
    pub fn new(config: LlmServiceConfig) -> Self {
        Self {
            config,
            provider: OnceLock::new(),
        }
    }

    /// Use an explicit provider instead of the configured one. Tests and
    /// embedded deployments inject mocks this way.
    pub fn with_provider(provider: Arc<dyn LlmProvider>) -> Self {
        let service = Self::new(LlmServiceConfig::default());
        let _ = service.provider.set(provider);
        service
    }
}

#[async_trait]
impl AgentBehavior for LlmService {
    fn name(&self) -> &str {
        "llm_service.services.wastepro"
    }

    async fn on_activate(&self, agent: &AgentHandle) -> Result<()> {
        if self.provider.get().is_none() {
            let provider = build_provider(&self.config)?;
            debug!(provider = provider.name(), "llm provider selected");
            let _ = self.provider.set(provider);
        }
        agent.subscribe(TOPIC_PROMPT).await
    }

    async fn on_message(
        &self,
        _agent: &AgentHandle,
        _topic: &str,
        parcel: Parcel,
    ) -> Result<Option<Parcel>> {
        let request: PromptRequest = match serde_json::from_value(parcel.content().clone()) {
            Ok(request) => request,
            Err(e) => {
                return Ok(Some(Parcel::error(
                    "InvalidRequest",
                    format!("malformed prompt request: {e}"),
                )))
            }
        };
        let provider = self
            .provider
            .get()
            .expect("provider installed at activation");

        match provider.generate_response(&request).await {
            Ok(response) => Ok(Some(json!({ "response": response }).into())),
            Err(e) => {
                warn!(provider = provider.name(), error = %e, "generation failed");
                Ok(Some(Parcel::error("LLMInvalidResponse", e.to_string())))
            }
        }
    }
}

/// A synchronous chat seam so pipeline components can be tested without a
/// bus or a model.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(&self, request: PromptRequest) -> LlmResult<String>;
}

/// Bus-side client that forwards prompt requests to the LLM service via
/// `publish_sync`.
pub struct LlmGateway {
    agent: AgentHandle,
    topic: String,
    timeout: Duration,
}

impl LlmGateway {
    pub fn new(agent: AgentHandle) -> Self {
        Self {
            agent,
            topic: TOPIC_PROMPT.into(),
            timeout: DEFAULT_PROMPT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ChatClient for LlmGateway {
    async fn chat(&self, request: PromptRequest) -> LlmResult<String> {
        let content = serde_json::to_value(&request)
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        let reply = self
            .agent
            .publish_sync(&self.topic, Parcel::text(content), self.timeout)
            .await
            .map_err(|e| match e {
                Error::Timeout(d) => LlmError::Timeout(d.as_secs() as u32),
                Error::Remote { message, .. } => LlmError::InvalidResponse(message),
                other => LlmError::ConnectionFailed(other.to_string()),
            })?;
        reply
            .get("response")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| LlmError::InvalidResponse("reply carried no response field".into()))
    }
}
