//! # WastePro SCQ
//!
//! Difficulty-targeted single-choice question generation and evaluation.
//! Difficulty is a weighted sum over a seven-feature scale; generation
//! samples a feature combination matching the target score and an
//! optional closed loop re-grades the result through the evaluator until
//! it measures close enough.

pub mod error;
pub mod evaluator;
pub mod features;
pub mod generator;
pub mod ranker;
pub mod sampler;

pub use error::{ScqError, ScqResult};
pub use evaluator::{grade_stem_length, ScqEvaluator, TOPIC_EVALUATE};
pub use features::{
    difficulty_target, FeatureVector, FEATURE_COUNT, FEATURE_KEYS, FEATURE_TITLES,
    FEATURE_WEIGHTS, LEVEL_DESCRIPTIONS,
};
pub use generator::{
    clean_text, normalize_answer, Question, QuestionCriteria, SingleChoiceGenerator, ERROR_STEM,
    TOPIC_CREATE,
};
pub use ranker::{
    build_ranker, NodeRanker, SimpleRanker, WasteManagementRanker, WeightedRanker, MAX_FACTS,
};
pub use sampler::sample_feature_vector;
