//! Uniform random selection.

use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;

use wastepro_kg::{GraphNode, GraphStore};

use crate::error::ScqResult;

use super::{sample_facts, NodeRanker};

pub struct SimpleRanker {
    store: Arc<dyn GraphStore>,
}

impl SimpleRanker {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NodeRanker for SimpleRanker {
    async fn rank_concepts(&self, concepts: &[GraphNode]) -> Option<GraphNode> {
        concepts.choose(&mut rand::thread_rng()).cloned()
    }

    async fn rank_facts(&self, concept: &GraphNode) -> ScqResult<Vec<GraphNode>> {
        sample_facts(&self.store, concept).await
    }
}
