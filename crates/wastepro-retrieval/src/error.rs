//! Errors of the retrieval pipeline.

use thiserror::Error;

use wastepro_llm::LlmError;

pub type RetrievalResult<T> = std::result::Result<T, RetrievalError>;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("page extraction failed: {0}")]
    PageExtractionFailed(String),

    #[error("missing field '{0}'")]
    MissingField(String),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Bus(#[from] wastepro_core::Error),
}
