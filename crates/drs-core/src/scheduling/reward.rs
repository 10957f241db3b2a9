//! Load-balance reward

use crate::models::{ClusterObservation, NODE_FIELDS};

/// Standard deviation over the whole population (divides by n)
pub fn population_std(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    variance.sqrt()
}

/// Negated sum of the spread of every resource across nodes.
///
/// Zero for a perfectly balanced cluster, more negative as load piles up
/// on fewer nodes.
pub fn balance_reward(observation: &ClusterObservation) -> f32 {
    -(0..NODE_FIELDS)
        .map(|field| population_std(&observation.field(field)))
        .sum::<f32>()
}
