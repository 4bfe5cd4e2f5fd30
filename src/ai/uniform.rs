use std::fs;
use std::path::Path;

use crate::ai::{Evaluation, Network, TrainLoss};
use crate::error::NetworkError;
use crate::training::IterationShard;

const STATE_FILE: &str = "network.json";

/// Parameter-free network: uniform policy and zero value for every row.
///
/// `generation` counts training phases and round-trips through
/// save/load, which makes checkpoint rollbacks observable.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct UniformNetwork {
    observation_size: usize,
    action_size: usize,
    pub generation: usize,
}

impl UniformNetwork {
    pub fn new(observation_size: usize, action_size: usize) -> Self {
        UniformNetwork {
            observation_size,
            action_size,
            generation: 0,
        }
    }
}

impl Network for UniformNetwork {
    fn action_size(&self) -> usize {
        self.action_size
    }

    fn observation_size(&self) -> usize {
        self.observation_size
    }

    fn evaluate(&self, observations: &[f32], rows: usize) -> Result<Evaluation, NetworkError> {
        let expected = rows * self.observation_size;
        if observations.len() != expected {
            return Err(NetworkError::InputShape {
                expected,
                actual: observations.len(),
            });
        }
        Ok(Evaluation {
            policy: vec![1.0 / self.action_size as f32; rows * self.action_size],
            value: vec![0.0; rows],
        })
    }

    /// Reports the loss a uniform policy and zero value would have on the window.
    fn train(&mut self, shards: &[IterationShard], _steps: usize) -> Result<TrainLoss, NetworkError> {
        let rows: usize = shards.iter().map(IterationShard::len).sum();
        if rows == 0 {
            return Err(NetworkError::EmptyWindow);
        }
        let log_a = (self.action_size as f32).ln();
        let mut policy = 0.0;
        let mut value = 0.0;
        for shard in shards {
            for row in 0..shard.len() {
                policy += shard.policy(row).iter().sum::<f32>() * log_a;
                value += shard.value(row) * shard.value(row);
            }
        }
        self.generation += 1;
        Ok(TrainLoss {
            policy: policy / rows as f32,
            value: value / rows as f32,
        })
    }

    fn save(&self, dir: &Path) -> Result<(), NetworkError> {
        fs::write(dir.join(STATE_FILE), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    fn load(&mut self, dir: &Path) -> Result<(), NetworkError> {
        let json = fs::read_to_string(dir.join(STATE_FILE))?;
        *self = serde_json::from_str(&json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::Sample;

    #[test]
    fn test_uniform_evaluation() {
        let net = UniformNetwork::new(2, 4);
        let eval = net.evaluate(&[0.0; 6], 3).unwrap();
        assert_eq!(eval.policy, vec![0.25; 12]);
        assert_eq!(eval.value, vec![0.0; 3]);
        assert!(net.evaluate(&[0.0; 5], 3).is_err());
    }

    #[test]
    fn test_train_bumps_generation() {
        let mut net = UniformNetwork::new(1, 2);
        let mut shard = IterationShard::new(1, 2);
        shard.push(&Sample {
            observation: vec![0.0],
            policy: vec![1.0, 0.0],
            value: 1.0,
        });
        let loss = net.train(&[shard], 10).unwrap();
        assert_eq!(net.generation, 1);
        assert!((loss.policy - 2f32.ln()).abs() < 1e-6);
        assert!((loss.value - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_save_load_restores_generation() {
        let dir = tempfile::tempdir().unwrap();
        let mut net = UniformNetwork::new(3, 7);
        net.generation = 4;
        net.save(dir.path()).unwrap();

        let mut other = UniformNetwork::new(3, 7);
        other.load(dir.path()).unwrap();
        assert_eq!(other.generation, 4);
    }
}
