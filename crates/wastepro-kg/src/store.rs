//! Graph data model and the narrow store interface.
//!
//! Four node kinds populate a subject's graph, from most general to most
//! specific: `document`, `structure`, `concept`, `fact`. Facts are
//! page-scoped observations; the other kinds are subject-scoped and merged
//! by `(label, name)`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Result type for store operations.
pub type KgResult<T> = std::result::Result<T, KgError>;

#[derive(Debug, Error)]
pub enum KgError {
    #[error("KG query failed: {0}")]
    QueryFailed(String),

    #[error("unknown subject: {0}")]
    UnknownSubject(String),

    #[error("KG instance unavailable: {0}")]
    InstanceUnavailable(String),

    #[error("invalid triplet: {0}")]
    InvalidTriplet(String),
}

/// The four node labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Document,
    Structure,
    Concept,
    Fact,
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Document => "document",
            NodeKind::Structure => "structure",
            NodeKind::Concept => "concept",
            NodeKind::Fact => "fact",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One endpoint of an incoming triplet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl NodeSpec {
    pub fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            aliases: Vec::new(),
            meta: None,
        }
    }

    pub fn with_aliases(mut self, aliases: Vec<String>) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// The dedup key used by the per-page registry.
    pub fn dedup_key(&self) -> String {
        format!("{}-{}", self.kind.label(), self.name)
    }
}

/// A directed relation name. Relations carry no properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub name: String,
}

impl Predicate {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// `(subject, predicate, object)` — the unit of graph population.
/// Serializes as a three-element array, matching the wire shape of the
/// triplet-add topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triplet(pub NodeSpec, pub Predicate, pub NodeSpec);

impl Triplet {
    pub fn new(subject: NodeSpec, predicate: impl Into<String>, object: NodeSpec) -> Self {
        Self(subject, Predicate::new(predicate), object)
    }
}

/// A serialized node as returned by queries. `element_id` is assigned by
/// the store and globally unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub element_id: String,
    pub label: NodeKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// A directed edge between two element ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub relation: String,
    pub target: String,
}

/// Full graph dump used by ranker analytics and invariant checks.
#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// The narrow query/mutation interface of a subject's graph store.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Merge a page's triplets. Non-fact nodes merge by `(label, name)`;
    /// fact nodes are created fresh per page unless already recorded for
    /// this `(file_id, page_number)`. Relations merge idempotently.
    async fn add_triplets(
        &self,
        file_id: &str,
        page_number: u32,
        triplets: &[Triplet],
    ) -> KgResult<()>;

    /// Concepts reachable via `include_in` from the document node, unioned
    /// with those reachable from every structure descendant of the section
    /// path. Deduplicated by `element_id`. An unresolvable section path
    /// falls back to the document-level set.
    async fn query_concepts(
        &self,
        document: &str,
        section_path: Option<&[String]>,
    ) -> KgResult<Vec<GraphNode>>;

    /// Structures under the section path (or under the document when the
    /// path is absent), discovered by recursive traversal of `part_of` in
    /// the reverse direction. An unresolvable section path falls back to
    /// the document-level traversal.
    async fn query_subsections(
        &self,
        document: &str,
        section_path: Option<&[String]>,
    ) -> KgResult<Vec<GraphNode>>;

    async fn nodes_by_name(
        &self,
        name: &str,
        label: Option<NodeKind>,
    ) -> KgResult<Vec<GraphNode>>;

    /// Nodes `m` with an edge `m -[relation]-> n`, where `n` is the node
    /// with the given element id.
    async fn nodes_related_by(
        &self,
        element_id: &str,
        relation: Option<&str>,
        label: Option<NodeKind>,
    ) -> KgResult<Vec<GraphNode>>;

    /// Nodes `m` with an edge `n -[relation]-> m`, where `n` is the node
    /// with the given element id.
    async fn nodes_relate_to(
        &self,
        element_id: &str,
        relation: Option<&str>,
        label: Option<NodeKind>,
    ) -> KgResult<Vec<GraphNode>>;

    /// Length-1 fact-to-fact paths touching the given fact, each reported
    /// in edge direction as `(source, relation, target)`.
    async fn fact_neighbors(
        &self,
        element_id: &str,
    ) -> KgResult<Vec<(GraphNode, String, GraphNode)>>;

    /// Full dump for analytics.
    async fn snapshot(&self) -> KgResult<GraphSnapshot>;
}
