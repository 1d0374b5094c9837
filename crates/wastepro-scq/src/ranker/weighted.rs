//! Analytics-weighted concept selection.
//!
//! Scores candidates by PageRank over the subject graph, a TF-IDF-like
//! section-spread score, and fact richness, softmax-normalized and
//! averaged. When analytics cannot be computed the ranker degrades to
//! uniform selection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tracing::debug;

use wastepro_kg::{GraphNode, GraphSnapshot, GraphStore, NodeKind};

use crate::error::ScqResult;

use super::{sample_facts, NodeRanker};

const DAMPING: f64 = 0.85;
const PAGERANK_ITERATIONS: usize = 20;
const RICHNESS_ALPHA: f64 = 0.5;

pub struct WeightedRanker {
    store: Arc<dyn GraphStore>,
}

impl WeightedRanker {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }
}

struct Analytics {
    kinds: HashMap<String, NodeKind>,
    /// Directed edges of the analytics graph: fact→concept (`is_a`),
    /// concept→structure (`include_in`), fact→fact.
    outgoing: HashMap<String, Vec<String>>,
    incoming: HashMap<String, Vec<String>>,
    /// `include_in` targets per concept.
    sections_of: HashMap<String, Vec<String>>,
    /// `is_a` sources per concept.
    facts_of: HashMap<String, Vec<String>>,
    pagerank: HashMap<String, f64>,
}

impl Analytics {
    fn build(snapshot: &GraphSnapshot) -> Option<Analytics> {
        if snapshot.nodes.is_empty() {
            return None;
        }
        let kinds: HashMap<String, NodeKind> = snapshot
            .nodes
            .iter()
            .map(|node| (node.element_id.clone(), node.label))
            .collect();

        let mut outgoing: HashMap<String, Vec<String>> = HashMap::new();
        let mut incoming: HashMap<String, Vec<String>> = HashMap::new();
        let mut sections_of: HashMap<String, Vec<String>> = HashMap::new();
        let mut facts_of: HashMap<String, Vec<String>> = HashMap::new();

        for edge in &snapshot.edges {
            let (source_kind, target_kind) =
                match (kinds.get(&edge.source), kinds.get(&edge.target)) {
                    (Some(&s), Some(&t)) => (s, t),
                    _ => continue,
                };
            let relevant = matches!(
                (source_kind, target_kind, edge.relation.as_str()),
                (NodeKind::Fact, NodeKind::Concept, "is_a")
                    | (NodeKind::Concept, NodeKind::Structure, "include_in")
                    | (NodeKind::Fact, NodeKind::Fact, _)
            );
            if !relevant {
                continue;
            }
            outgoing
                .entry(edge.source.clone())
                .or_default()
                .push(edge.target.clone());
            incoming
                .entry(edge.target.clone())
                .or_default()
                .push(edge.source.clone());
            if edge.relation == "include_in" {
                sections_of
                    .entry(edge.source.clone())
                    .or_default()
                    .push(edge.target.clone());
            }
            if edge.relation == "is_a" {
                facts_of
                    .entry(edge.target.clone())
                    .or_default()
                    .push(edge.source.clone());
            }
        }

        let mut analytics = Analytics {
            kinds,
            outgoing,
            incoming,
            sections_of,
            facts_of,
            pagerank: HashMap::new(),
        };
        analytics.pagerank = analytics.compute_pagerank();
        Some(analytics)
    }

    fn compute_pagerank(&self) -> HashMap<String, f64> {
        let nodes: Vec<&String> = self.kinds.keys().collect();
        let n = nodes.len() as f64;
        let mut ranks: HashMap<String, f64> =
            nodes.iter().map(|&id| (id.clone(), 1.0 / n)).collect();

        for _ in 0..PAGERANK_ITERATIONS {
            let mut next: HashMap<String, f64> = nodes
                .iter()
                .map(|&id| (id.clone(), (1.0 - DAMPING) / n))
                .collect();
            for (source, targets) in &self.outgoing {
                let share = ranks[source] * DAMPING / targets.len() as f64;
                for target in targets {
                    *next.get_mut(target).expect("known node") += share;
                }
            }
            // Dangling mass is spread uniformly.
            let dangling: f64 = nodes
                .iter()
                .filter(|id| !self.outgoing.contains_key(id.as_str()))
                .map(|&id| ranks[id])
                .sum();
            for value in next.values_mut() {
                *value += DAMPING * dangling / n;
            }
            ranks = next;
        }
        ranks
    }

    fn tfidf(&self, concept: &str) -> f64 {
        let structures = match self.sections_of.get(concept) {
            Some(structures) => structures,
            None => return 0.0,
        };
        let tf = structures.len() as f64;
        let idf_sum: f64 = structures
            .iter()
            .map(|structure| {
                let concept_count = self
                    .incoming
                    .get(structure)
                    .map(|sources| {
                        sources
                            .iter()
                            .filter(|id| self.kinds.get(*id) == Some(&NodeKind::Concept))
                            .count()
                    })
                    .unwrap_or(0);
                (1.0 + 1.0 / (concept_count as f64 + 1.0)).ln()
            })
            .sum();
        tf * idf_sum
    }

    fn richness(&self, concept: &str) -> f64 {
        let direct: Vec<&String> = self
            .facts_of
            .get(concept)
            .map(|facts| facts.iter().collect())
            .unwrap_or_default();
        let direct_set: HashSet<&String> = direct.iter().copied().collect();
        let mut connected = HashSet::new();
        for fact in &direct {
            if let Some(targets) = self.outgoing.get(*fact) {
                for target in targets {
                    if self.kinds.get(target) == Some(&NodeKind::Fact)
                        && !direct_set.contains(target)
                    {
                        connected.insert(target.clone());
                    }
                }
            }
        }
        direct.len() as f64 + RICHNESS_ALPHA * connected.len() as f64
    }
}

fn softmax(values: &[f64]) -> Vec<f64> {
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = values.iter().map(|v| (v - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

#[async_trait]
impl NodeRanker for WeightedRanker {
    async fn rank_concepts(&self, concepts: &[GraphNode]) -> Option<GraphNode> {
        if concepts.is_empty() {
            return None;
        }
        let analytics = match self.store.snapshot().await.ok().as_ref().and_then(Analytics::build)
        {
            Some(analytics) => analytics,
            None => {
                debug!("analytics unavailable; falling back to uniform selection");
                return concepts.choose(&mut rand::thread_rng()).cloned();
            }
        };

        let pagerank: Vec<f64> = concepts
            .iter()
            .map(|c| analytics.pagerank.get(&c.element_id).copied().unwrap_or(0.0))
            .collect();
        let tfidf: Vec<f64> = concepts
            .iter()
            .map(|c| analytics.tfidf(&c.element_id))
            .collect();
        let richness: Vec<f64> = concepts
            .iter()
            .map(|c| analytics.richness(&c.element_id))
            .collect();

        let (pagerank, tfidf, richness) =
            (softmax(&pagerank), softmax(&tfidf), softmax(&richness));
        let best = concepts
            .iter()
            .enumerate()
            .map(|(i, concept)| {
                let score = (pagerank[i] + tfidf[i] + richness[i]) / 3.0;
                (concept, score)
            })
            .max_by(|(_, a), (_, b)| a.total_cmp(b))?;
        Some(best.0.clone())
    }

    async fn rank_facts(&self, concept: &GraphNode) -> ScqResult<Vec<GraphNode>> {
        sample_facts(&self.store, concept).await
    }
}
