use std::path::{Path, PathBuf};
use std::time::Duration;

use log::warn;

use crate::error::ConfigError;

/// Top-level coach configuration, loadable from TOML.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoachConfig {
    pub run: RunConfig,
    pub selfplay: SelfPlayConfig,
    pub training: TrainingConfig,
    pub arena: ArenaConfig,
    pub gating: GatingConfig,
    pub expert_value_weight: ExpertValueWeightConfig,
}

/// Outer loop bounds and on-disk locations.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub run_name: String,
    /// Last iteration to run (inclusive).
    pub num_iters: usize,
    /// First iteration when `load_model` is off.
    pub start_iter: usize,
    /// Resume from the newest checkpoint found in `checkpoint_dir`.
    pub load_model: bool,
    pub checkpoint_dir: PathBuf,
    pub data_dir: PathBuf,
    pub metrics_dir: PathBuf,
    /// Base seed for worker RNGs; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            run_name: "connect4".to_string(),
            num_iters: 1000,
            start_iter: 1,
            load_model: true,
            checkpoint_dir: PathBuf::from("checkpoints"),
            data_dir: PathBuf::from("data"),
            metrics_dir: PathBuf::from("runs"),
            seed: None,
        }
    }
}

/// Self-play worker pool and search settings.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SelfPlayConfig {
    pub workers: usize,
    /// Rows per slot buffer, and the number of concurrent games per worker.
    pub process_batch_size: usize,
    pub games_per_iteration: usize,
    /// Games still running after this many plies are scored as draws.
    pub max_moves: usize,
    pub num_warmup_iters: usize,
    pub skip_self_play_iters: usize,
    pub symmetric_samples: bool,
    pub num_mcts_sims: usize,
    pub num_fast_sims: usize,
    pub num_warmup_sims: usize,
    pub prob_fast_sim: f32,
    pub temp_threshold: usize,
    pub temp: f32,
    pub cpuct: f32,
    pub root_dirichlet_alpha: f32,
    pub root_noise_frac: f32,
    /// Coordinator wake-up interval while no slot is ready.
    pub batch_poll_ms: u64,
}

impl Default for SelfPlayConfig {
    fn default() -> Self {
        SelfPlayConfig {
            workers: num_cpus::get(),
            process_batch_size: 128,
            games_per_iteration: 512,
            max_moves: 128,
            num_warmup_iters: 1,
            skip_self_play_iters: 0,
            symmetric_samples: true,
            num_mcts_sims: 50,
            num_fast_sims: 15,
            num_warmup_sims: 10,
            prob_fast_sim: 0.75,
            temp_threshold: 32,
            temp: 1.0,
            cpuct: 1.25,
            root_dirichlet_alpha: 1.0,
            root_noise_frac: 0.25,
            batch_poll_ms: 50,
        }
    }
}

impl SelfPlayConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.batch_poll_ms)
    }
}

/// Network training settings.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingConfig {
    pub train_batch_size: usize,
    pub train_steps_per_iteration: usize,
    /// Upper bound on how many past shards feed one training phase.
    pub num_iters_for_train_examples_history: usize,
    pub learning_rate: f64,
    pub max_grad_norm: f32,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            train_batch_size: 512,
            train_steps_per_iteration: 512,
            num_iters_for_train_examples_history: 10,
            learning_rate: 0.01,
            max_grad_norm: 1.0,
        }
    }
}

/// Head-to-head evaluation settings.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArenaConfig {
    pub compare_with_random: bool,
    pub arena_compare_random: usize,
    pub random_compare_freq: usize,
    pub compare_with_past: bool,
    pub arena_compare: usize,
    /// Also the distance back to the comparison checkpoint.
    pub past_compare_freq: usize,
    pub arena_temp: f32,
    pub arena_mcts: bool,
    pub arena_batched: bool,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        ArenaConfig {
            compare_with_random: true,
            arena_compare_random: 16,
            random_compare_freq: 1,
            compare_with_past: true,
            arena_compare: 128,
            past_compare_freq: 1,
            arena_temp: 0.1,
            arena_mcts: true,
            arena_batched: true,
        }
    }
}

/// Model gating settings.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatingConfig {
    pub model_gating: bool,
    /// Consecutive rejections allowed before a model is force-accepted. 0 disables gating.
    pub max_gating_iters: usize,
    pub min_next_model_winrate: f32,
}

impl Default for GatingConfig {
    fn default() -> Self {
        GatingConfig {
            model_gating: true,
            max_gating_iters: 3,
            min_next_model_winrate: 0.52,
        }
    }
}

/// Linear schedule blending search root values into value targets.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExpertValueWeightConfig {
    pub start: f32,
    pub end: f32,
    pub iterations: usize,
}

impl Default for ExpertValueWeightConfig {
    fn default() -> Self {
        ExpertValueWeightConfig {
            start: 0.0,
            end: 0.0,
            iterations: 35,
        }
    }
}

impl ExpertValueWeightConfig {
    /// Weight after `attempt` loop passes.
    pub fn at(&self, attempt: usize) -> f32 {
        let progress = attempt.min(self.iterations) as f32 / self.iterations as f32;
        progress * (self.end - self.start) + self.start
    }
}

impl CoachConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut config: CoachConfig = toml::from_str(&content)?;
        config.reconcile();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the file
    /// does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            warn!("config file '{}' not found, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Force settings that other settings depend on. Returns the corrections made.
    pub fn reconcile(&mut self) -> Vec<&'static str> {
        let mut fixed = Vec::new();
        if self.arena.arena_batched && !self.arena.arena_mcts {
            warn!("arena.arena_batched needs search-driven players, forcing arena.arena_mcts = true");
            self.arena.arena_mcts = true;
            fixed.push("arena.arena_mcts");
        }
        fixed
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sp = &self.selfplay;
        if self.run.num_iters == 0 {
            return Err(ConfigError::Validation("run.num_iters must be > 0".into()));
        }
        if self.run.start_iter == 0 {
            return Err(ConfigError::Validation("run.start_iter must be >= 1".into()));
        }
        if sp.workers == 0 {
            return Err(ConfigError::Validation("selfplay.workers must be > 0".into()));
        }
        if sp.process_batch_size == 0 {
            return Err(ConfigError::Validation(
                "selfplay.process_batch_size must be > 0".into(),
            ));
        }
        if sp.games_per_iteration == 0 {
            return Err(ConfigError::Validation(
                "selfplay.games_per_iteration must be > 0".into(),
            ));
        }
        if sp.max_moves == 0 {
            return Err(ConfigError::Validation("selfplay.max_moves must be > 0".into()));
        }
        if sp.num_mcts_sims == 0 || sp.num_fast_sims == 0 || sp.num_warmup_sims == 0 {
            return Err(ConfigError::Validation(
                "selfplay simulation counts must be >= 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&sp.prob_fast_sim) {
            return Err(ConfigError::Validation(
                "selfplay.prob_fast_sim must be in [0, 1]".into(),
            ));
        }
        if sp.temp < 0.0 {
            return Err(ConfigError::Validation("selfplay.temp must be >= 0".into()));
        }
        if sp.cpuct <= 0.0 {
            return Err(ConfigError::Validation("selfplay.cpuct must be > 0".into()));
        }
        if sp.root_dirichlet_alpha <= 0.0 {
            return Err(ConfigError::Validation(
                "selfplay.root_dirichlet_alpha must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&sp.root_noise_frac) {
            return Err(ConfigError::Validation(
                "selfplay.root_noise_frac must be in [0, 1]".into(),
            ));
        }
        if sp.batch_poll_ms == 0 {
            return Err(ConfigError::Validation(
                "selfplay.batch_poll_ms must be > 0".into(),
            ));
        }

        if self.training.train_batch_size == 0 {
            return Err(ConfigError::Validation(
                "training.train_batch_size must be > 0".into(),
            ));
        }
        if self.training.train_steps_per_iteration == 0 {
            return Err(ConfigError::Validation(
                "training.train_steps_per_iteration must be > 0".into(),
            ));
        }
        if self.training.num_iters_for_train_examples_history == 0 {
            return Err(ConfigError::Validation(
                "training.num_iters_for_train_examples_history must be >= 1".into(),
            ));
        }
        if self.training.learning_rate <= 0.0 {
            return Err(ConfigError::Validation(
                "training.learning_rate must be > 0".into(),
            ));
        }
        if self.training.max_grad_norm <= 0.0 {
            return Err(ConfigError::Validation(
                "training.max_grad_norm must be > 0".into(),
            ));
        }

        let arena = &self.arena;
        if arena.random_compare_freq == 0 || arena.past_compare_freq == 0 {
            return Err(ConfigError::Validation(
                "arena compare frequencies must be >= 1".into(),
            ));
        }
        if arena.compare_with_random && arena.arena_compare_random == 0 {
            return Err(ConfigError::Validation(
                "arena.arena_compare_random must be > 0 when compare_with_random is set".into(),
            ));
        }
        if arena.compare_with_past && arena.arena_compare == 0 {
            return Err(ConfigError::Validation(
                "arena.arena_compare must be > 0 when compare_with_past is set".into(),
            ));
        }
        if arena.arena_temp < 0.0 {
            return Err(ConfigError::Validation("arena.arena_temp must be >= 0".into()));
        }
        if arena.arena_batched && !arena.arena_mcts {
            return Err(ConfigError::Validation(
                "arena.arena_batched requires arena.arena_mcts".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.gating.min_next_model_winrate) {
            return Err(ConfigError::Validation(
                "gating.min_next_model_winrate must be in [0, 1]".into(),
            ));
        }
        if self.expert_value_weight.iterations == 0 {
            return Err(ConfigError::Validation(
                "expert_value_weight.iterations must be > 0".into(),
            ));
        }
        for (name, w) in [
            ("start", self.expert_value_weight.start),
            ("end", self.expert_value_weight.end),
        ] {
            if !(0.0..=1.0).contains(&w) {
                return Err(ConfigError::Validation(format!(
                    "expert_value_weight.{name} must be in [0, 1]"
                )));
            }
        }

        Ok(())
    }

    /// Generate a TOML string with all default values.
    pub fn default_toml() -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&CoachConfig::default())
    }
}
