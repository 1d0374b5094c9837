//! Ranker strategies.
//!
//! A ranker picks one concept from the candidate set and a handful of
//! facts for it. Strategies are stateless between calls and pluggable via
//! configuration.

use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;

use wastepro_kg::{GraphNode, GraphStore, NodeKind};

use crate::error::{ScqError, ScqResult};

mod simple;
mod waste_management;
mod weighted;

pub use simple::SimpleRanker;
pub use waste_management::WasteManagementRanker;
pub use weighted::WeightedRanker;

/// Upper bound on facts drawn per concept.
pub const MAX_FACTS: usize = 5;

#[async_trait]
pub trait NodeRanker: Send + Sync {
    /// Pick one concept from the candidates.
    async fn rank_concepts(&self, concepts: &[GraphNode]) -> Option<GraphNode>;

    /// Facts related to the concept via `is_a`, at most [`MAX_FACTS`].
    async fn rank_facts(&self, concept: &GraphNode) -> ScqResult<Vec<GraphNode>>;
}

/// Instantiate the configured strategy.
pub fn build_ranker(name: &str, store: Arc<dyn GraphStore>) -> ScqResult<Arc<dyn NodeRanker>> {
    match name {
        "simple" => Ok(Arc::new(SimpleRanker::new(store))),
        "weighted" => Ok(Arc::new(WeightedRanker::new(store))),
        "waste_management" => Ok(Arc::new(WasteManagementRanker::new(store))),
        other => Err(ScqError::InvalidCriteria(format!(
            "unknown ranker: {other}"
        ))),
    }
}

/// Shared fact draw: the concept's `is_a` sources, sampled down to
/// [`MAX_FACTS`].
pub(crate) async fn sample_facts(
    store: &Arc<dyn GraphStore>,
    concept: &GraphNode,
) -> ScqResult<Vec<GraphNode>> {
    let facts = store
        .nodes_related_by(&concept.element_id, Some("is_a"), Some(NodeKind::Fact))
        .await?;
    let mut rng = rand::thread_rng();
    Ok(facts
        .choose_multiple(&mut rng, MAX_FACTS.min(facts.len()))
        .cloned()
        .collect())
}
