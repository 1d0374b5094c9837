//! # WastePro LLM
//!
//! Chat-completion providers behind a single `generate_response` seam,
//! the prompt service agent, and repair helpers for almost-JSON model
//! output. Provider selection is static configuration; callers that ask
//! for JSON-schema output validate the result themselves.

pub mod chatgpt;
pub mod claude;
pub mod llama;
pub mod ossgpt;
pub mod provider;
pub mod repair;
pub mod service;

pub use chatgpt::ChatGptProvider;
pub use claude::ClaudeProvider;
pub use llama::LlamaProvider;
pub use ossgpt::OssGptProvider;
pub use provider::{
    json_schema_format, ChatMessage, LlmError, LlmProvider, LlmResult, MockProvider,
    PromptRequest,
};
pub use service::{
    build_provider, ChatClient, LlmGateway, LlmService, DEFAULT_PROMPT_TIMEOUT, TOPIC_PROMPT,
};
