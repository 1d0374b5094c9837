//! Domain-tuned ranker for waste-management corpora.
//!
//! Prefers concepts naming recyclable waste; everything else falls back to
//! uniform selection.

use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;

use wastepro_kg::{GraphNode, GraphStore};

use crate::error::ScqResult;

use super::{sample_facts, NodeRanker};

pub struct WasteManagementRanker {
    store: Arc<dyn GraphStore>,
}

impl WasteManagementRanker {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NodeRanker for WasteManagementRanker {
    async fn rank_concepts(&self, concepts: &[GraphNode]) -> Option<GraphNode> {
        let mut rng = rand::thread_rng();
        let candidates: Vec<&GraphNode> = concepts
            .iter()
            .filter(|concept| concept.name.to_lowercase().contains("recyclable waste"))
            .collect();
        if let Some(selected) = candidates.choose(&mut rng) {
            return Some((*selected).clone());
        }
        concepts.choose(&mut rng).cloned()
    }

    async fn rank_facts(&self, concept: &GraphNode) -> ScqResult<Vec<GraphNode>> {
        sample_facts(&self.store, concept).await
    }
}
