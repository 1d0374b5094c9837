//! The seven-feature difficulty scale.
//!
//! Every question is graded 1..3 on seven features; the weighted sum of
//! the grades is the question's measured difficulty. Generation samples a
//! grade combination matching a target score and prompts the model with
//! the corresponding level descriptors; evaluation grades an existing
//! question on the same scale.

use serde_json::{Map, Value};

pub const FEATURE_COUNT: usize = 7;

pub const FEATURE_KEYS: [&str; FEATURE_COUNT] = [
    "stem_length",
    "stem_technical_term_density",
    "stem_cognitive_level",
    "option_average_length",
    "option_similarity",
    "stem_option_similarity",
    "high_distractor_count",
];

pub const FEATURE_TITLES: [&str; FEATURE_COUNT] = [
    "Stem Length",
    "Technical Term Density in Stem",
    "Cognitive Level",
    "Average Option Length",
    "Option Similarity",
    "Stem-Option Similarity",
    "Number of High-Attraction Distractors",
];

/// Fixed feature weights. Cognitive level and distractor count weigh more
/// than the surface features.
pub const FEATURE_WEIGHTS: [f64; FEATURE_COUNT] = [1.0, 1.0, 1.5, 1.0, 1.0, 1.0, 1.2];

/// Natural-language descriptors per feature and level, used to render the
/// generation prompt.
pub const LEVEL_DESCRIPTIONS: [[&str; 3]; FEATURE_COUNT] = [
    [
        "Generate a short stem containing 5 to 15 words, no more, no less.",
        "Generate a medium stem containing 16 to 30 words, no more, no less.",
        "Provide a long stem that exceeds 30 words in length. Make sure it is not shorter.",
    ],
    [
        "The stem should contain between 0 and 2 technical terms. Do not exceed this limit.",
        "The stem should contain between 2 and 4 technical terms. Do not exceed this limit.",
        "Use a high density of technical language in the stem, with more than 3 technical terms included.",
    ],
    [
        "Design the stem at the remembering level — it should test basic recall of facts or concepts only.",
        "The stem should target the understanding and synthesizing levels of Bloom's Taxonomy. It should go beyond recall to assess comprehension and integration of knowledge.",
        "The stem should reflect Bloom's higher-order levels — specifically analyzing, creating, or evaluating. It should encourage deep thinking and decision-making based on complex information.",
    ],
    [
        "The option text should be no longer than 4 words. Strictly follow this range.",
        "The option text should be no shorter than 3 words and no longer than 6 words. Stay strictly within this range.",
        "The option text must be at least 5 words long. Avoid short or very brief options.",
    ],
    [
        "Ensure low similarity between options — they should be less than 20% similar in wording or structure. Each option must be clearly distinct from the others.",
        "Ensure the options have moderate similarity, with approximately 50% overlap in wording or structure. They should share some elements but still be distinguishable.",
        "Ensure high similarity between options, with more than 80% overlap in wording or structure. Options should appear very similar but differ in subtle ways.",
    ],
    [
        "Ensure high relevance between the stem and the options, with over 80% semantic or contextual overlap. The options should be closely tied to the stem's content.",
        "Ensure moderate relevance between the stem and the options, with approximately 50% semantic or contextual overlap. The options should be related, but not too obvious.",
        "Ensure low relevance between the stem and the options — the semantic or contextual connection should be below 20%. The options should appear only loosely related to the stem.",
    ],
    [
        "The options should contain one highly plausible but incorrect choice designed to mislead learners who lack full understanding of the concept.",
        "The options should contain two very plausible but incorrect answers, designed to challenge learners by appearing correct at first glance.",
        "Include more than 3 highly attractive distractors — these should be incorrect options that seem very plausible and are likely to mislead learners with incomplete understanding.",
    ],
];

/// Target weighted score per requested difficulty.
pub fn difficulty_target(difficulty: u32) -> Option<f64> {
    match difficulty {
        30 => Some(10.0),
        50 => Some(14.0),
        70 => Some(18.0),
        _ => None,
    }
}

/// Seven grades in `1..=3`, or all zeros as the infeasible-target signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureVector(pub [u8; FEATURE_COUNT]);

impl FeatureVector {
    pub fn zero() -> Self {
        Self([0; FEATURE_COUNT])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&grade| grade == 0)
    }

    /// `G(v) = Σ vᵢ·wᵢ`.
    pub fn weighted_grade(&self) -> f64 {
        self.0
            .iter()
            .zip(FEATURE_WEIGHTS)
            .map(|(&grade, weight)| f64::from(grade) * weight)
            .sum()
    }

    /// Keyed mapping, in feature order.
    pub fn to_map(&self) -> Map<String, Value> {
        FEATURE_KEYS
            .iter()
            .zip(self.0)
            .map(|(&key, grade)| (key.to_string(), Value::from(grade)))
            .collect()
    }

    /// Read a keyed mapping; every feature must be present and in range.
    pub fn from_map(map: &Map<String, Value>) -> Option<Self> {
        let mut grades = [0u8; FEATURE_COUNT];
        for (i, key) in FEATURE_KEYS.iter().enumerate() {
            let grade = map.get(*key)?.as_u64()?;
            if !(1..=3).contains(&grade) {
                return None;
            }
            grades[i] = grade as u8;
        }
        Some(Self(grades))
    }

    /// The generation-prompt block: one level descriptor per feature.
    pub fn describe(&self) -> String {
        FEATURE_TITLES
            .iter()
            .zip(LEVEL_DESCRIPTIONS)
            .zip(self.0)
            .map(|((title, levels), grade)| {
                let level = usize::from(grade.clamp(1, 3)) - 1;
                format!("{title}: {}", levels[level])
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
