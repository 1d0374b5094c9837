//! Errors of the generation/evaluation path.

use thiserror::Error;

use wastepro_kg::KgError;
use wastepro_llm::LlmError;

pub type ScqResult<T> = std::result::Result<T, ScqError>;

#[derive(Debug, Error)]
pub enum ScqError {
    /// No concepts under the requested document/section.
    #[error("no concepts available for the question criteria")]
    NoConcepts,

    /// No fact relations to build source text from.
    #[error("no text materials available for the selected concepts")]
    NoTextMaterials,

    #[error("invalid question criteria: {0}")]
    InvalidCriteria(String),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Kg(#[from] KgError),

    #[error(transparent)]
    Bus(#[from] wastepro_core::Error),
}

impl ScqError {
    /// The error kind carried on a reply parcel.
    pub fn kind(&self) -> &'static str {
        match self {
            ScqError::NoConcepts => "NoConcepts",
            ScqError::NoTextMaterials => "NoTextMaterials",
            ScqError::InvalidCriteria(_) => "InvalidRequest",
            ScqError::Llm(_) => "LLMInvalidResponse",
            ScqError::Kg(_) => "KGQueryFailed",
            ScqError::Bus(_) => "Transport",
        }
    }
}
