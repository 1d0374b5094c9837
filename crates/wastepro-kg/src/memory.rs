//! In-process labeled-property graph.
//!
//! The reference store used by tests and by deployments that do not attach
//! an external graph database. Non-fact nodes merge by `(label, name)`;
//! fact nodes are created fresh per page, gated by the shared
//! [`PageRegistry`]. Relations merge idempotently, so re-ingesting a page
//! is a no-op for everything except brand-new facts.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use uuid::Uuid;

use crate::registry::PageRegistry;
use crate::store::{
    GraphEdge, GraphNode, GraphSnapshot, GraphStore, KgError, KgResult, NodeKind, NodeSpec,
    Triplet,
};

#[derive(Debug, Clone)]
struct NodeData {
    element_id: String,
    kind: NodeKind,
    name: String,
    aliases: Vec<String>,
    file_id: Option<String>,
    page_number: Option<u32>,
    metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
struct EdgeData {
    relation: String,
}

struct GraphInner {
    graph: StableDiGraph<NodeData, EdgeData>,
    /// Merge index for subject-scoped nodes.
    merge_index: HashMap<(NodeKind, String), NodeIndex>,
    /// Latest fact node per name, for relation endpoints.
    fact_index: HashMap<String, NodeIndex>,
    eid_index: HashMap<String, NodeIndex>,
    next_id: u64,
}

pub struct MemoryGraph {
    subject: String,
    store_id: String,
    registry: Arc<PageRegistry>,
    inner: Mutex<GraphInner>,
}

impl MemoryGraph {
    pub fn new(subject: impl Into<String>, registry: Arc<PageRegistry>) -> Self {
        Self {
            subject: subject.into(),
            store_id: Uuid::new_v4().to_string(),
            registry,
            inner: Mutex::new(GraphInner {
                graph: StableDiGraph::new(),
                merge_index: HashMap::new(),
                fact_index: HashMap::new(),
                eid_index: HashMap::new(),
                next_id: 0,
            }),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    fn serialize(data: &NodeData) -> GraphNode {
        GraphNode {
            element_id: data.element_id.clone(),
            label: data.kind,
            name: data.name.clone(),
            aliases: data.aliases.clone(),
            file_id: data.file_id.clone(),
            page_number: data.page_number,
            metadata: data.metadata.clone(),
        }
    }
}

impl GraphInner {
    fn alloc_eid(&mut self, store_id: &str) -> String {
        self.next_id += 1;
        format!("{}:{}", store_id, self.next_id)
    }

    fn create_node(
        &mut self,
        store_id: &str,
        spec: &NodeSpec,
        file_id: &str,
        page_number: Option<u32>,
    ) -> NodeIndex {
        let element_id = self.alloc_eid(store_id);
        let data = NodeData {
            element_id: element_id.clone(),
            kind: spec.kind,
            name: spec.name.clone(),
            aliases: spec.aliases.clone(),
            file_id: Some(file_id.to_string()),
            page_number,
            metadata: spec.meta.clone(),
        };
        let idx = self.graph.add_node(data);
        self.eid_index.insert(element_id, idx);
        idx
    }

    /// Resolve a triplet endpoint to a node index, applying the merge rules.
    fn resolve(
        &mut self,
        store_id: &str,
        registry: &PageRegistry,
        spec: &NodeSpec,
        file_id: &str,
        page_number: u32,
    ) -> NodeIndex {
        if spec.kind == NodeKind::Fact {
            let seen = registry.observe(file_id, page_number, &spec.dedup_key());
            if seen {
                if let Some(idx) = self.fact_index.get(&spec.name) {
                    return *idx;
                }
            }
            let idx = self.create_node(store_id, spec, file_id, Some(page_number));
            self.fact_index.insert(spec.name.clone(), idx);
            return idx;
        }

        let key = (spec.kind, spec.name.clone());
        if let Some(&idx) = self.merge_index.get(&key) {
            // MERGE semantics: refresh non-key attributes.
            let data = &mut self.graph[idx];
            data.file_id = Some(file_id.to_string());
            if !spec.aliases.is_empty() {
                data.aliases = spec.aliases.clone();
            }
            if spec.meta.is_some() {
                data.metadata = spec.meta.clone();
            }
            return idx;
        }
        let idx = self.create_node(store_id, spec, file_id, None);
        self.merge_index.insert(key, idx);
        idx
    }

    fn merge_edge(&mut self, source: NodeIndex, relation: &str, target: NodeIndex) {
        let exists = self
            .graph
            .edges_connecting(source, target)
            .any(|edge| edge.weight().relation == relation);
        if !exists {
            self.graph.add_edge(
                source,
                target,
                EdgeData {
                    relation: relation.to_string(),
                },
            );
        }
    }

    /// Children of `parent` in the section tree: nodes `x` with
    /// `x -[part_of]-> parent`.
    fn section_children(&self, parent: NodeIndex) -> Vec<NodeIndex> {
        self.graph
            .edges_directed(parent, Direction::Incoming)
            .filter(|edge| edge.weight().relation == "part_of")
            .map(|edge| edge.source())
            .filter(|&idx| self.graph[idx].kind == NodeKind::Structure)
            .collect()
    }

    /// The subtree rooted at `start`, including `start` itself.
    fn section_subtree(&self, start: NodeIndex) -> Vec<NodeIndex> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(idx) = queue.pop_front() {
            if !seen.insert(idx) {
                continue;
            }
            out.push(idx);
            queue.extend(self.section_children(idx));
        }
        out
    }

    /// Resolve a document-rooted section chain
    /// `path[0] -part_of-> doc`, `path[1] -part_of-> path[0]`, … and
    /// return the tail structure.
    fn resolve_chain(&self, doc: NodeIndex, path: &[String]) -> Option<NodeIndex> {
        let mut current = doc;
        for name in path {
            current = self
                .section_children(current)
                .into_iter()
                .find(|&idx| self.graph[idx].name == *name)?;
        }
        Some(current)
    }

    /// Concepts with `concept -[include_in]-> target`.
    fn concepts_under(&self, target: NodeIndex) -> Vec<NodeIndex> {
        self.graph
            .edges_directed(target, Direction::Incoming)
            .filter(|edge| edge.weight().relation == "include_in")
            .map(|edge| edge.source())
            .filter(|&idx| self.graph[idx].kind == NodeKind::Concept)
            .collect()
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn add_triplets(
        &self,
        file_id: &str,
        page_number: u32,
        triplets: &[Triplet],
    ) -> KgResult<()> {
        let mut inner = self.inner.lock().expect("graph poisoned");
        for Triplet(subject, predicate, object) in triplets {
            if predicate.name.is_empty() {
                return Err(KgError::InvalidTriplet(format!(
                    "empty relation between '{}' and '{}'",
                    subject.name, object.name
                )));
            }
            let s = inner.resolve(&self.store_id, &self.registry, subject, file_id, page_number);
            let o = inner.resolve(&self.store_id, &self.registry, object, file_id, page_number);
            inner.merge_edge(s, &predicate.name, o);
        }
        Ok(())
    }

    async fn query_concepts(
        &self,
        document: &str,
        section_path: Option<&[String]>,
    ) -> KgResult<Vec<GraphNode>> {
        let inner = self.inner.lock().expect("graph poisoned");
        let doc = match inner
            .merge_index
            .get(&(NodeKind::Document, document.to_string()))
        {
            Some(&idx) => idx,
            None => return Ok(Vec::new()),
        };

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut collect = |indices: Vec<NodeIndex>, inner: &GraphInner| {
            for idx in indices {
                let data = &inner.graph[idx];
                if seen.insert(data.element_id.clone()) {
                    out.push(Self::serialize(data));
                }
            }
        };

        collect(inner.concepts_under(doc), &inner);

        if let Some(path) = section_path.filter(|p| !p.is_empty()) {
            // An unresolvable path falls back to the document-level set
            // already collected.
            if let Some(tail) = inner.resolve_chain(doc, path) {
                for structure in inner.section_subtree(tail) {
                    collect(inner.concepts_under(structure), &inner);
                }
            }
        }
        Ok(out)
    }

    async fn query_subsections(
        &self,
        document: &str,
        section_path: Option<&[String]>,
    ) -> KgResult<Vec<GraphNode>> {
        let inner = self.inner.lock().expect("graph poisoned");

        let mut roots: Vec<NodeIndex> = Vec::new();
        if let Some(path) = section_path.filter(|p| !p.is_empty()) {
            for name in path {
                if let Some(&idx) = inner
                    .merge_index
                    .get(&(NodeKind::Structure, name.clone()))
                {
                    roots.push(idx);
                }
            }
        }
        if roots.is_empty() {
            // Section path absent or unresolvable: start from the
            // document's direct structures.
            let doc = match inner
                .merge_index
                .get(&(NodeKind::Document, document.to_string()))
            {
                Some(&idx) => idx,
                None => return Ok(Vec::new()),
            };
            roots = inner.section_children(doc);
        }

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for root in roots {
            for idx in inner.section_subtree(root) {
                let data = &inner.graph[idx];
                if seen.insert(data.element_id.clone()) {
                    out.push(Self::serialize(data));
                }
            }
        }
        Ok(out)
    }

    async fn nodes_by_name(
        &self,
        name: &str,
        label: Option<NodeKind>,
    ) -> KgResult<Vec<GraphNode>> {
        let inner = self.inner.lock().expect("graph poisoned");
        Ok(inner
            .graph
            .node_weights()
            .filter(|data| data.name == name)
            .filter(|data| label.map_or(true, |l| data.kind == l))
            .map(Self::serialize)
            .collect())
    }

    async fn nodes_related_by(
        &self,
        element_id: &str,
        relation: Option<&str>,
        label: Option<NodeKind>,
    ) -> KgResult<Vec<GraphNode>> {
        let inner = self.inner.lock().expect("graph poisoned");
        let idx = *inner
            .eid_index
            .get(element_id)
            .ok_or_else(|| KgError::QueryFailed(format!("no node {element_id}")))?;
        Ok(inner
            .graph
            .edges_directed(idx, Direction::Incoming)
            .filter(|edge| relation.map_or(true, |r| edge.weight().relation == r))
            .map(|edge| &inner.graph[edge.source()])
            .filter(|data| label.map_or(true, |l| data.kind == l))
            .map(Self::serialize)
            .collect())
    }

    async fn nodes_relate_to(
        &self,
        element_id: &str,
        relation: Option<&str>,
        label: Option<NodeKind>,
    ) -> KgResult<Vec<GraphNode>> {
        let inner = self.inner.lock().expect("graph poisoned");
        let idx = *inner
            .eid_index
            .get(element_id)
            .ok_or_else(|| KgError::QueryFailed(format!("no node {element_id}")))?;
        Ok(inner
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .filter(|edge| relation.map_or(true, |r| edge.weight().relation == r))
            .map(|edge| &inner.graph[edge.target()])
            .filter(|data| label.map_or(true, |l| data.kind == l))
            .map(Self::serialize)
            .collect())
    }

    async fn fact_neighbors(
        &self,
        element_id: &str,
    ) -> KgResult<Vec<(GraphNode, String, GraphNode)>> {
        let inner = self.inner.lock().expect("graph poisoned");
        let idx = *inner
            .eid_index
            .get(element_id)
            .ok_or_else(|| KgError::QueryFailed(format!("no node {element_id}")))?;

        let mut out = Vec::new();
        for edge in inner.graph.edges_directed(idx, Direction::Outgoing) {
            let target = &inner.graph[edge.target()];
            if target.kind == NodeKind::Fact {
                out.push((
                    Self::serialize(&inner.graph[idx]),
                    edge.weight().relation.clone(),
                    Self::serialize(target),
                ));
            }
        }
        for edge in inner.graph.edges_directed(idx, Direction::Incoming) {
            let source = &inner.graph[edge.source()];
            if source.kind == NodeKind::Fact {
                out.push((
                    Self::serialize(source),
                    edge.weight().relation.clone(),
                    Self::serialize(&inner.graph[idx]),
                ));
            }
        }
        Ok(out)
    }

    async fn snapshot(&self) -> KgResult<GraphSnapshot> {
        let inner = self.inner.lock().expect("graph poisoned");
        let nodes = inner.graph.node_weights().map(Self::serialize).collect();
        let edges = inner
            .graph
            .edge_indices()
            .filter_map(|edge| {
                let (source, target) = inner.graph.edge_endpoints(edge)?;
                Some(GraphEdge {
                    source: inner.graph[source].element_id.clone(),
                    relation: inner.graph[edge].relation.clone(),
                    target: inner.graph[target].element_id.clone(),
                })
            })
            .collect();
        Ok(GraphSnapshot { nodes, edges })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryGraph {
        MemoryGraph::new("K", Arc::new(PageRegistry::new()))
    }

    fn page_triplets() -> Vec<Triplet> {
        vec![
            Triplet::new(
                NodeSpec::new(NodeKind::Structure, "ch1-1"),
                "part_of",
                NodeSpec::new(NodeKind::Structure, "ch1"),
            ),
            Triplet::new(
                NodeSpec::new(NodeKind::Structure, "ch1"),
                "part_of",
                NodeSpec::new(NodeKind::Document, "Wastepro02"),
            ),
            Triplet::new(
                NodeSpec::new(NodeKind::Concept, "season")
                    .with_aliases(vec!["季節".into()]),
                "include_in",
                NodeSpec::new(NodeKind::Structure, "ch1-1"),
            ),
            Triplet::new(
                NodeSpec::new(NodeKind::Fact, "winter"),
                "is_a",
                NodeSpec::new(NodeKind::Concept, "season"),
            ),
            Triplet::new(
                NodeSpec::new(NodeKind::Fact, "winter"),
                "precedes",
                NodeSpec::new(NodeKind::Fact, "spring"),
            ),
        ]
    }

    #[tokio::test]
    async fn double_ingest_is_idempotent_for_non_fact_nodes() {
        let store = store();
        store.add_triplets("f1", 0, &page_triplets()).await.unwrap();
        let first = store.snapshot().await.unwrap();

        store.add_triplets("f1", 0, &page_triplets()).await.unwrap();
        let second = store.snapshot().await.unwrap();

        assert_eq!(first.nodes.len(), second.nodes.len());
        assert_eq!(first.edges.len(), second.edges.len());
    }

    #[tokio::test]
    async fn facts_are_fresh_per_page() {
        let store = store();
        store.add_triplets("f1", 0, &page_triplets()).await.unwrap();
        store.add_triplets("f1", 1, &page_triplets()).await.unwrap();

        let winters = store
            .nodes_by_name("winter", Some(NodeKind::Fact))
            .await
            .unwrap();
        assert_eq!(winters.len(), 2);
        assert_eq!(winters[0].page_number, Some(0));
        assert_eq!(winters[1].page_number, Some(1));

        // The merged concept stays singular.
        let seasons = store
            .nodes_by_name("season", Some(NodeKind::Concept))
            .await
            .unwrap();
        assert_eq!(seasons.len(), 1);
    }

    #[tokio::test]
    async fn every_fact_has_is_a_and_every_concept_has_include_in() {
        let store = store();
        store.add_triplets("f1", 0, &page_triplets()).await.unwrap();
        let snapshot = store.snapshot().await.unwrap();

        for node in &snapshot.nodes {
            match node.label {
                NodeKind::Fact => {
                    let has_is_a = snapshot
                        .edges
                        .iter()
                        .any(|e| e.source == node.element_id && e.relation == "is_a");
                    let is_object_of_fact_edge = snapshot
                        .edges
                        .iter()
                        .any(|e| e.target == node.element_id && e.relation != "is_a");
                    assert!(
                        has_is_a || is_object_of_fact_edge,
                        "fact '{}' is orphaned",
                        node.name
                    );
                }
                NodeKind::Concept => {
                    assert!(
                        snapshot
                            .edges
                            .iter()
                            .any(|e| e.source == node.element_id && e.relation == "include_in"),
                        "concept '{}' lacks include_in",
                        node.name
                    );
                }
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn part_of_subgraph_is_a_tree() {
        let store = store();
        store.add_triplets("f1", 0, &page_triplets()).await.unwrap();
        let snapshot = store.snapshot().await.unwrap();

        for node in snapshot
            .nodes
            .iter()
            .filter(|n| n.label == NodeKind::Structure)
        {
            let parents = snapshot
                .edges
                .iter()
                .filter(|e| e.source == node.element_id && e.relation == "part_of")
                .count();
            assert!(parents <= 1, "structure '{}' has {parents} parents", node.name);
        }
    }

    #[tokio::test]
    async fn concepts_query_unions_document_and_section_descendants() {
        let store = store();
        let mut triplets = page_triplets();
        triplets.push(Triplet::new(
            NodeSpec::new(NodeKind::Concept, "regulation"),
            "include_in",
            NodeSpec::new(NodeKind::Document, "Wastepro02"),
        ));
        store.add_triplets("f1", 0, &triplets).await.unwrap();

        let all = store
            .query_concepts("Wastepro02", Some(&["ch1".to_string()]))
            .await
            .unwrap();
        let names: Vec<_> = all.iter().map(|n| n.name.as_str()).collect();
        assert!(names.contains(&"season"));
        assert!(names.contains(&"regulation"));

        // Unresolvable section path: document-level only, not an error.
        let fallback = store
            .query_concepts("Wastepro02", Some(&["no-such-chapter".to_string()]))
            .await
            .unwrap();
        assert_eq!(fallback.len(), 1);
        assert_eq!(fallback[0].name, "regulation");
    }

    #[tokio::test]
    async fn subsections_fall_back_to_document_level() {
        let store = store();
        store.add_triplets("f1", 0, &page_triplets()).await.unwrap();

        let via_section = store
            .query_subsections("Wastepro02", Some(&["ch1".to_string()]))
            .await
            .unwrap();
        let names: Vec<_> = via_section.iter().map(|n| n.name.as_str()).collect();
        assert!(names.contains(&"ch1"));
        assert!(names.contains(&"ch1-1"));

        let fallback = store
            .query_subsections("Wastepro02", Some(&["missing".to_string()]))
            .await
            .unwrap();
        assert!(fallback.iter().any(|n| n.name == "ch1"));
    }

    #[tokio::test]
    async fn fact_neighbors_report_edge_direction() {
        let store = store();
        store.add_triplets("f1", 0, &page_triplets()).await.unwrap();
        let winter = &store
            .nodes_by_name("winter", Some(NodeKind::Fact))
            .await
            .unwrap()[0];

        let neighbors = store.fact_neighbors(&winter.element_id).await.unwrap();
        assert_eq!(neighbors.len(), 1);
        let (source, relation, target) = &neighbors[0];
        assert_eq!(source.name, "winter");
        assert_eq!(relation, "precedes");
        assert_eq!(target.name, "spring");
    }
}
