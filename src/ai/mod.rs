mod burn_network;
pub mod mcts;
pub mod networks;
mod uniform;

use std::path::Path;

use crate::error::NetworkError;
use crate::training::IterationShard;

pub use burn_network::BurnNetwork;
pub use mcts::{MctsTree, Search, SearchSettings, SearchStep};
pub use networks::{PolicyValueNetwork, PolicyValueNetworkConfig};
pub use uniform::UniformNetwork;

/// Output of one evaluation call: row-major policy probabilities
/// (`rows * action_size`) and one value in `[-1, 1]` per row.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub policy: Vec<f32>,
    pub value: Vec<f32>,
}

/// Average losses over one training phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TrainLoss {
    pub policy: f32,
    pub value: f32,
}

impl TrainLoss {
    pub fn total(&self) -> f32 {
        self.policy + self.value
    }
}

/// Policy/value network driven by the coach.
pub trait Network {
    fn action_size(&self) -> usize;

    fn observation_size(&self) -> usize;

    /// Evaluate `rows` observations laid out back to back in `observations`.
    /// Batched callers pass only the staged rows, so `rows` may be anything
    /// from 1 up to the slot capacity.
    fn evaluate(&self, observations: &[f32], rows: usize) -> Result<Evaluation, NetworkError>;

    /// Train on the given window of shards for `steps` minibatch updates.
    fn train(&mut self, shards: &[IterationShard], steps: usize) -> Result<TrainLoss, NetworkError>;

    /// Write parameters into `dir`, which already exists.
    fn save(&self, dir: &Path) -> Result<(), NetworkError>;

    fn load(&mut self, dir: &Path) -> Result<(), NetworkError>;
}

/// Restrict `probs` to the legal actions and renormalize. Falls back to
/// uniform when the network puts no mass on any legal action.
pub fn masked_priors(probs: &[f32], legal: &[usize], out: &mut [f32]) {
    out.fill(0.0);
    let sum: f32 = legal.iter().map(|&a| probs[a].max(0.0)).sum();
    if sum.is_finite() && sum > 0.0 {
        for &a in legal {
            out[a] = probs[a].max(0.0) / sum;
        }
    } else if !legal.is_empty() {
        let p = 1.0 / legal.len() as f32;
        for &a in legal {
            out[a] = p;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_priors_renormalizes() {
        let probs = [0.5, 0.25, 0.25];
        let mut out = [0.0; 3];
        masked_priors(&probs, &[1, 2], &mut out);
        assert_eq!(out, [0.0, 0.5, 0.5]);
    }

    #[test]
    fn test_masked_priors_falls_back_to_uniform() {
        let probs = [1.0, 0.0, 0.0, 0.0];
        let mut out = [0.0; 4];
        masked_priors(&probs, &[2, 3], &mut out);
        assert_eq!(out, [0.0, 0.0, 0.5, 0.5]);
    }
}
