use std::path::Path;

use burn::grad_clipping::GradientClippingConfig;
use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::DefaultRecorder;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::TensorData;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::ai::networks::{PolicyValueNetwork, PolicyValueNetworkConfig};
use crate::ai::{Evaluation, Network, TrainLoss};
use crate::config::TrainingConfig;
use crate::error::NetworkError;
use crate::game::Game;
use crate::training::IterationShard;

const WEIGHTS_FILE: &str = "policy_value_network";

/// burn-backed [`Network`]: trains with Adam on the autodiff backend and
/// evaluates with a cached inference copy of the weights.
pub struct BurnNetwork<B: AutodiffBackend> {
    model: PolicyValueNetwork<B>,
    inference: PolicyValueNetwork<B::InnerBackend>,
    optimizer: OptimizerAdaptor<Adam, PolicyValueNetwork<B>, B>,
    model_config: PolicyValueNetworkConfig,
    training: TrainingConfig,
    device: B::Device,
    rng: StdRng,
}

impl<B: AutodiffBackend> BurnNetwork<B> {
    pub fn new(
        model_config: PolicyValueNetworkConfig,
        training: TrainingConfig,
        device: B::Device,
    ) -> Self {
        let model: PolicyValueNetwork<B> = model_config.init(&device);
        let inference = model.valid();
        BurnNetwork {
            model,
            inference,
            optimizer: new_optimizer(&training),
            model_config,
            training,
            device,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Network sized for `G`'s observation planes and action space.
    pub fn for_game<G: Game>(training: TrainingConfig, device: B::Device) -> Self {
        let [channels, rows, cols] = G::OBSERVATION_SHAPE;
        let model_config = PolicyValueNetworkConfig::new(channels, rows, cols, G::ACTION_SIZE);
        Self::new(model_config, training, device)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    fn input_tensor<BB: Backend>(&self, flat: &[f32], rows: usize, device: &BB::Device) -> Tensor<BB, 4> {
        let cfg = &self.model_config;
        Tensor::<BB, 1>::from_data(TensorData::from(flat), device).reshape([
            rows,
            cfg.channels,
            cfg.rows,
            cfg.cols,
        ])
    }

    /// One gradient step on rows drawn uniformly (with replacement) from `window`.
    fn train_step(&mut self, window: &[(&IterationShard, usize)], total: usize) -> Result<Option<TrainLoss>, NetworkError> {
        let n = self.training.train_batch_size.min(total);
        let obs_size = self.model_config.input_size();
        let actions = self.model_config.actions;

        let mut obs = Vec::with_capacity(n * obs_size);
        let mut policies = Vec::with_capacity(n * actions);
        let mut values = Vec::with_capacity(n);
        for _ in 0..n {
            let mut row = self.rng.random_range(0..total);
            for &(shard, len) in window {
                if row < len {
                    obs.extend_from_slice(shard.observation(row));
                    policies.extend_from_slice(shard.policy(row));
                    values.push(shard.value(row));
                    break;
                }
                row -= len;
            }
        }

        let state_tensor = self.input_tensor::<B>(&obs, n, &self.device);
        let policy_targets =
            Tensor::<B, 1>::from_data(TensorData::from(policies.as_slice()), &self.device)
                .reshape([n, actions]);
        let value_targets =
            Tensor::<B, 1>::from_data(TensorData::from(values.as_slice()), &self.device)
                .reshape([n, 1]);

        let (logits, value) = self.model.forward(state_tensor);

        // Cross-entropy against the visit distribution, MSE on tanh(value).
        let log_probs = burn::tensor::activation::log_softmax(logits, 1);
        let policy_loss = -(policy_targets * log_probs).sum_dim(1).mean();
        let value_diff = value.tanh() - value_targets;
        let value_loss = (value_diff.clone() * value_diff).mean();

        let policy_scalar = scalar(policy_loss.clone())?;
        let value_scalar = scalar(value_loss.clone())?;
        if !(policy_scalar.is_finite() && value_scalar.is_finite()) {
            return Ok(None);
        }

        let total_loss = policy_loss + value_loss;
        let grads = GradientsParams::from_grads(total_loss.backward(), &self.model);
        self.model = self
            .optimizer
            .step(self.training.learning_rate, self.model.clone(), grads);

        Ok(Some(TrainLoss {
            policy: policy_scalar,
            value: value_scalar,
        }))
    }
}

impl<B: AutodiffBackend> Network for BurnNetwork<B> {
    fn action_size(&self) -> usize {
        self.model_config.actions
    }

    fn observation_size(&self) -> usize {
        self.model_config.input_size()
    }

    fn evaluate(&self, observations: &[f32], rows: usize) -> Result<Evaluation, NetworkError> {
        let expected = rows * self.observation_size();
        if observations.len() != expected {
            return Err(NetworkError::InputShape {
                expected,
                actual: observations.len(),
            });
        }
        let input = self.input_tensor::<B::InnerBackend>(observations, rows, &self.device);
        let (logits, value) = self.inference.forward(input);
        let policy = burn::tensor::activation::softmax(logits, 1);

        Ok(Evaluation {
            policy: to_vec(policy)?,
            value: to_vec(value.tanh())?,
        })
    }

    fn train(&mut self, shards: &[IterationShard], steps: usize) -> Result<TrainLoss, NetworkError> {
        let window: Vec<(&IterationShard, usize)> = shards
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| (s, s.len()))
            .collect();
        let total: usize = window.iter().map(|&(_, len)| len).sum();
        if total == 0 {
            return Err(NetworkError::EmptyWindow);
        }

        let mut sum = TrainLoss::default();
        let mut finite_steps = 0usize;
        for step in 0..steps {
            if let Some(loss) = self.train_step(&window, total)? {
                sum.policy += loss.policy;
                sum.value += loss.value;
                finite_steps += 1;
            }
            if step % 64 == 0 {
                debug!("train step {}/{}", step, steps);
            }
        }
        if finite_steps == 0 {
            return Err(NetworkError::NonFiniteLoss { step: steps });
        }

        self.inference = self.model.valid();
        Ok(TrainLoss {
            policy: sum.policy / finite_steps as f32,
            value: sum.value / finite_steps as f32,
        })
    }

    fn save(&self, dir: &Path) -> Result<(), NetworkError> {
        let recorder = DefaultRecorder::default();
        self.model
            .clone()
            .valid()
            .save_file(dir.join(WEIGHTS_FILE), &recorder)
            .map_err(|e| NetworkError::Record(format!("{e:?}")))
    }

    fn load(&mut self, dir: &Path) -> Result<(), NetworkError> {
        let recorder = DefaultRecorder::default();
        let model: PolicyValueNetwork<B> = self
            .model_config
            .init(&self.device)
            .load_file(dir.join(WEIGHTS_FILE), &recorder, &self.device)
            .map_err(|e| NetworkError::Record(format!("{e:?}")))?;
        self.inference = model.valid();
        self.model = model;
        self.optimizer = new_optimizer(&self.training);
        Ok(())
    }
}

fn new_optimizer<B: AutodiffBackend>(
    training: &TrainingConfig,
) -> OptimizerAdaptor<Adam, PolicyValueNetwork<B>, B> {
    AdamConfig::new()
        .with_grad_clipping(Some(GradientClippingConfig::Norm(training.max_grad_norm)))
        .init()
}

fn to_vec<BB: Backend, const D: usize>(tensor: Tensor<BB, D>) -> Result<Vec<f32>, NetworkError> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| NetworkError::Backend(format!("{e:?}")))
}

fn scalar<BB: Backend>(tensor: Tensor<BB, 1>) -> Result<f32, NetworkError> {
    to_vec(tensor)?
        .first()
        .copied()
        .ok_or_else(|| NetworkError::Backend("empty loss tensor".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::ConnectFour;
    use crate::training::Sample;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray<f32>>;

    fn small_training() -> TrainingConfig {
        TrainingConfig {
            train_batch_size: 4,
            train_steps_per_iteration: 2,
            ..Default::default()
        }
    }

    fn network() -> BurnNetwork<TestBackend> {
        BurnNetwork::<TestBackend>::for_game::<ConnectFour>(small_training(), Default::default())
            .with_seed(5)
    }

    fn shard_of_initial_positions(rows: usize) -> IterationShard {
        let game = ConnectFour::initial();
        let mut obs = vec![0.0; ConnectFour::OBSERVATION_SIZE];
        game.encode(&mut obs);
        let mut shard = IterationShard::new(ConnectFour::OBSERVATION_SIZE, ConnectFour::ACTION_SIZE);
        for _ in 0..rows {
            shard.push(&Sample {
                observation: obs.clone(),
                policy: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0],
                value: 0.5,
            });
        }
        shard
    }

    #[test]
    fn test_evaluate_shapes_and_ranges() {
        let net = network();
        let obs = vec![0.0; 3 * ConnectFour::OBSERVATION_SIZE];
        let eval = net.evaluate(&obs, 3).unwrap();
        assert_eq!(eval.policy.len(), 3 * 7);
        assert_eq!(eval.value.len(), 3);
        for row in eval.policy.chunks(7) {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-4);
        }
        assert!(eval.value.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn test_evaluate_rejects_wrong_input_len() {
        let net = network();
        let err = net.evaluate(&[0.0; 5], 1).unwrap_err();
        assert!(matches!(err, NetworkError::InputShape { .. }));
    }

    #[test]
    fn test_train_reports_finite_losses() {
        let mut net = network();
        let loss = net.train(&[shard_of_initial_positions(6)], 2).unwrap();
        assert!(loss.policy.is_finite() && loss.policy >= 0.0);
        assert!(loss.value.is_finite() && loss.value >= 0.0);
    }

    #[test]
    fn test_train_on_empty_window_fails() {
        let mut net = network();
        let empty = IterationShard::new(ConnectFour::OBSERVATION_SIZE, ConnectFour::ACTION_SIZE);
        assert!(matches!(net.train(&[empty], 1), Err(NetworkError::EmptyWindow)));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut trained = network();
        trained.train(&[shard_of_initial_positions(4)], 1).unwrap();
        trained.save(dir.path()).unwrap();
        assert!(dir.path().join("policy_value_network.mpk").exists());

        let mut restored = network();
        restored.load(dir.path()).unwrap();

        let obs = vec![0.0; ConnectFour::OBSERVATION_SIZE];
        let a = trained.evaluate(&obs, 1).unwrap();
        let b = restored.evaluate(&obs, 1).unwrap();
        for (x, y) in a.policy.iter().zip(&b.policy) {
            assert!((x - y).abs() < 1e-5);
        }
        assert!((a.value[0] - b.value[0]).abs() < 1e-5);
    }
}
