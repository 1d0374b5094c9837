//! Feature-weight combination sampling.
//!
//! Enumerates all `3⁷` grade combinations, shuffles, and returns the first
//! whose weighted sum lands within ±1 of the target score. An infeasible
//! target yields the zero vector so the caller can fail fast instead of
//! looping.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::features::{FeatureVector, FEATURE_COUNT};

const COMBINATIONS: usize = 2187; // 3^7

fn decode(mut index: usize) -> FeatureVector {
    let mut grades = [0u8; FEATURE_COUNT];
    for grade in grades.iter_mut() {
        *grade = (index % 3) as u8 + 1;
        index /= 3;
    }
    FeatureVector(grades)
}

/// Sample one combination with `target − 1 ≤ G(v) ≤ target + 1`.
pub fn sample_feature_vector(target: f64, rng: &mut impl Rng) -> FeatureVector {
    let mut indices: Vec<usize> = (0..COMBINATIONS).collect();
    indices.shuffle(rng);
    for index in indices {
        let vector = decode(index);
        let grade = vector.weighted_grade();
        if target - 1.0 <= grade && grade <= target + 1.0 {
            return vector;
        }
    }
    FeatureVector::zero()
}
