//! # WastePro KG
//!
//! Per-subject knowledge-graph lifecycle, triplet merge, and structural
//! queries. Subjects live in isolated labeled-property-graph instances
//! spun up lazily by an orchestrator; the core consumes that orchestrator
//! only through the seams in [`orchestrator`].

pub mod memory;
pub mod orchestrator;
pub mod registry;
pub mod service;
pub mod store;

pub use memory::MemoryGraph;
pub use orchestrator::{KgEndpoints, KgOrchestrator, MemoryOrchestrator, RunningKg, StoreResolver};
pub use registry::PageRegistry;
pub use service::{
    triplets_topic, KgService, TOPIC_ACCESS_POINT, TOPIC_CONCEPTS_QUERY, TOPIC_CREATE,
    TOPIC_SECTIONS_QUERY, TOPIC_TRIPLETS_ADD,
};
pub use store::{
    GraphEdge, GraphNode, GraphSnapshot, GraphStore, KgError, KgResult, NodeKind, NodeSpec,
    Predicate, Triplet,
};
