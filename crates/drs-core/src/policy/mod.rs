//! Learned placement policy
//!
//! A deep Q-network scores the four nodes for a 30-float state (cluster
//! observation plus workload footprint). Experience is kept in a bounded
//! replay buffer; a target network, refreshed periodically from the eval
//! network, supplies the bootstrap values.

mod dqn;
mod network;
mod replay;

pub use dqn::{DqnPolicy, LearnOutcome, PendingSnapshot};
pub use network::Mlp;
pub use replay::{ReplayBuffer, ReplaySnapshot};

use crate::models::{StateVector, NODE_COUNT};
use serde::Deserialize;
use std::path::PathBuf;

/// Q-value approximator mapping a state to one value per node
pub trait QNetwork: Clone + Send + Sync {
    fn forward(&self, state: &StateVector) -> [f32; NODE_COUNT];

    /// One optimizer step on the squared error between `Q(states[i], actions[i])`
    /// and `targets[i]`. Returns the mean loss before the step.
    fn train_batch(&mut self, states: &[StateVector], actions: &[usize], targets: &[f32]) -> f32;

    /// Flattened copy of every weight and bias
    fn parameters(&self) -> Vec<f32>;

    fn copy_from(&mut self, other: &Self) {
        self.clone_from(other);
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub batch_size: usize,
    pub learning_rate: f32,
    /// Probability of acting greedily
    pub epsilon: f64,
    pub gamma: f32,
    /// Learn calls between target network refreshes
    pub target_sync_interval: u64,
    pub replay_capacity: usize,
    pub hidden_units: usize,
    /// Fixed seed for weight init and exploration; entropy when unset
    pub seed: Option<u64>,
    /// Replay snapshot file, rewritten once the buffer has wrapped
    pub snapshot_path: Option<PathBuf>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            learning_rate: 0.01,
            epsilon: 0.9,
            gamma: 0.9,
            target_sync_interval: 100,
            replay_capacity: 100,
            hidden_units: 50,
            seed: None,
            snapshot_path: None,
        }
    }
}

/// Index of the largest value; the first one wins ties
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate().skip(1) {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax_prefers_first_on_ties() {
        assert_eq!(argmax(&[1.0, 3.0, 3.0, 2.0]), 1);
        assert_eq!(argmax(&[0.0, 0.0, 0.0, 0.0]), 0);
        assert_eq!(argmax(&[-5.0, -1.0, -3.0, -1.0]), 1);
    }

    #[test]
    fn test_policy_config_defaults_fill_missing_fields() {
        let config: PolicyConfig = serde_json::from_str(r#"{"epsilon": 1.0, "seed": 7}"#).unwrap();
        assert_eq!(config.epsilon, 1.0);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.target_sync_interval, 100);
        assert_eq!(config.hidden_units, 50);
    }
}
