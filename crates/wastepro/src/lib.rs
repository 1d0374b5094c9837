//! # WastePro
//!
//! Document ingestion into per-subject knowledge graphs, and generation of
//! single-choice exam questions whose measured difficulty matches a
//! caller-supplied target.
//!
//! The system is a set of cooperating agents that communicate exclusively
//! through a topic-addressed message bus; each agent owns one
//! responsibility and exposes a small set of request/reply endpoints.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wastepro::prelude::*;
//!
//! let config = Config::load()?;
//! let broker = LocalBroker::new();
//! let services = wastepro::bootstrap::start_services(
//!     &config,
//!     broker.clone(),
//!     Collaborators::in_memory("localhost"),
//! )
//! .await?;
//!
//! // Ingest a document.
//! client.publish("FileUpload/Pdf/Retrieval", upload_parcel).await?;
//!
//! // Generate a question.
//! let reply = client
//!     .publish_sync(
//!         "Create/SCQ/Generation",
//!         serde_json::json!({
//!             "question_id": "Q101",
//!             "subject": "Wastepro02",
//!             "document": "Wastepro02",
//!             "difficulty": 50,
//!         }),
//!         std::time::Duration::from_secs(120),
//!     )
//!     .await?;
//! ```
//!
//! ## Architecture
//!
//! | Crate | Owns |
//! |-------|------|
//! | [`wastepro_core`] | Agent runtime, parcel codec, broker, config, logging |
//! | [`wastepro_kg`] | KG-per-subject lifecycle, triplet merge, structural queries |
//! | [`wastepro_llm`] | Chat providers, the prompt service, JSON repair |
//! | [`wastepro_retrieval`] | File persistence, extraction, the ingest pipeline |
//! | [`wastepro_scq`] | Feature scale, rankers, question generation and evaluation |
//!
//! ## Bus topics
//!
//! - `FileUpload/FileService/Services`
//! - `FileUpload/Pdf/Retrieval`, `Retrieved/Pdf/Retrieval`
//! - `Create/KGService/Services`, `AccessPoint/KGService/Services`
//! - `<subject>/AddTriplets/KGService/Services`
//! - `ConceptsQuery/KGService/Services`, `SectionsQuery/KGService/Services`
//! - `Prompt/LlmService/Services`
//! - `Create/SCQ/Generation`, `Evaluate/SCQ/Evaluation`

pub mod bootstrap;

pub use bootstrap::{start_services, Collaborators, ServiceStack};

pub use wastepro_core as core;
pub use wastepro_kg as kg;
pub use wastepro_llm as llm;
pub use wastepro_retrieval as retrieval;
pub use wastepro_scq as scq;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::bootstrap::{start_services, Collaborators, ServiceStack};
    pub use wastepro_core::prelude::*;
    pub use wastepro_kg::{GraphNode, GraphStore, KgOrchestrator, NodeKind, StoreResolver, Triplet};
    pub use wastepro_llm::{ChatClient, LlmProvider, PromptRequest};
    pub use wastepro_retrieval::{PageExtractor, TocNode};
    pub use wastepro_scq::{FeatureVector, Question, QuestionCriteria};
}
