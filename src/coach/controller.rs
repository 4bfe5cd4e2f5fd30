use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::ai::{Network, SearchSettings};
use crate::arena::{
    play_batched, play_games, ArenaResult, BatchedArenaSettings, MctsPlayer, NetworkPlayer, Player,
    RandomPlayer,
};
use crate::batching::derive_seed;
use crate::checkpoint::{CheckpointMetrics, CheckpointStore};
use crate::coach::state::{
    compare_due, gate_decision, past_iteration, train_window, GateDecision, IterationState, Phase,
};
use crate::config::CoachConfig;
use crate::error::{ArenaError, CoachError};
use crate::game::{Game, Outcome};
use crate::selfplay::{run_self_play, GameRecord, SelfPlaySettings};
use crate::training::{IterationShard, MetricsSink, ShardStore, TrainingUpdate};

// Salts separating the RNG streams drawn from one pass seed.
const SELFPLAY_STREAM: usize = 0;
const RANDOM_ARENA_STREAM: usize = 1;
const PAST_ARENA_STREAM: usize = 2;

/// Drives the outer loop: self-play, persist, train, evaluate, gate.
///
/// `network` is the live model; `past` is scratch space the past
/// comparison loads older checkpoints into.
pub struct IterationController<G: Game, N: Network> {
    config: CoachConfig,
    network: N,
    past: N,
    checkpoints: Box<dyn CheckpointStore>,
    shards: Box<dyn ShardStore>,
    metrics: Box<dyn MetricsSink>,
    state: IterationState,
    updates: Option<mpsc::Sender<TrainingUpdate>>,
    stop: Arc<AtomicBool>,
    _game: PhantomData<G>,
}

impl<G: Game, N: Network> IterationController<G, N> {
    pub fn new(
        config: CoachConfig,
        network: N,
        past: N,
        checkpoints: Box<dyn CheckpointStore>,
        shards: Box<dyn ShardStore>,
        metrics: Box<dyn MetricsSink>,
    ) -> Self {
        let state = IterationState::new(config.run.start_iter, config.expert_value_weight.start);
        IterationController {
            config,
            network,
            past,
            checkpoints,
            shards,
            metrics,
            state,
            updates: None,
            stop: Arc::new(AtomicBool::new(false)),
            _game: PhantomData,
        }
    }

    /// Send phase and progress updates to a dashboard.
    pub fn with_updates(mut self, tx: mpsc::Sender<TrainingUpdate>) -> Self {
        self.updates = Some(tx);
        self
    }

    /// Share a flag that ends [`learn`](Self::learn) after the current pass.
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn state(&self) -> &IterationState {
        &self.state
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn config(&self) -> &CoachConfig {
        &self.config
    }

    /// Find the iteration to start from, loading or seeding the live
    /// network to match. Returns the new `current_iter`.
    pub fn discover(&mut self) -> Result<usize, CoachError> {
        let start = if self.config.run.load_model {
            match self.checkpoints.latest()? {
                Some(latest) => {
                    self.checkpoints.load(latest, &mut self.network)?;
                    info!("resuming from checkpoint {latest}");
                    latest + 1
                }
                None => {
                    info!("no checkpoints found, saving the initial network as iteration 0");
                    self.checkpoints.save(0, &self.network, &CheckpointMetrics::default())?;
                    1
                }
            }
        } else {
            let start = self.config.run.start_iter;
            let seed = start - 1;
            if !self.checkpoints.exists(seed) {
                info!("saving the initial network as iteration {seed}");
                self.checkpoints.save(seed, &self.network, &CheckpointMetrics::default())?;
            }
            start
        };
        // Pass counter continues from the resumed iteration.
        self.state.current_iter = start;
        self.state.attempt = start;
        self.state.expert_value_weight = self.config.expert_value_weight.at(start - 1);
        Ok(start)
    }

    /// Run passes until `num_iters` is accepted or a stop is requested.
    pub fn learn(&mut self) -> Result<IterationState, CoachError> {
        info!(
            "training iterations {}..={} (batching can delay the first finished games)",
            self.state.current_iter, self.config.run.num_iters
        );
        let result = self.learn_inner();
        match &result {
            Ok(_) => self.notify(TrainingUpdate::Finished),
            Err(e) => self.notify(TrainingUpdate::Failed(e.to_string())),
        }
        result
    }

    fn learn_inner(&mut self) -> Result<IterationState, CoachError> {
        while self.state.current_iter <= self.config.run.num_iters {
            if self.stop.load(Ordering::SeqCst) {
                info!("stop requested, leaving before iteration {}", self.state.current_iter);
                break;
            }
            self.run_iteration()?;
        }
        self.set_phase(Phase::Idle);
        Ok(self.state.clone())
    }

    /// One loop pass at `current_iter`. On error nothing is advanced.
    pub fn run_iteration(&mut self) -> Result<GateDecision, CoachError> {
        let i = self.state.current_iter;
        let attempt = self.state.attempt;
        self.state.warmup = attempt <= self.config.selfplay.num_warmup_iters;
        let warmup = self.state.warmup;
        let pass_seed = self.config.run.seed.map(|s| derive_seed(s, attempt));
        info!("------ ITER {i} (pass {attempt}) ------");
        if warmup {
            info!("warmup: random policy and value");
        }
        self.notify(TrainingUpdate::IterationStarted {
            iteration: i,
            attempt,
            warmup,
        });

        if attempt > self.config.selfplay.skip_self_play_iters {
            self.self_play(i, attempt, pass_seed)?;
        }

        self.train(i)?;

        let arena = &self.config.arena;
        let random_due = arena.compare_with_random && compare_due(attempt, arena.random_compare_freq);
        let past_due = arena.compare_with_past && compare_due(attempt, arena.past_compare_freq);

        if !warmup && random_due {
            self.set_phase(Phase::EvaluateRandom);
            let result = self.compare_to_random(pass_seed)?;
            info!(
                "NEW/RANDOM WINS: {} / {} ; DRAWS: {}",
                result.wins[0],
                result.wins[1..].iter().sum::<usize>(),
                result.draws
            );
            self.record("win_rate/random", result.win_rate(0), i);
        }

        let past = past_iteration(i, self.config.arena.past_compare_freq);
        let mut win_rate = None;
        if !warmup && past_due {
            self.set_phase(Phase::EvaluatePast);
            let result = self.compare_to_past(past, pass_seed)?;
            info!(
                "NEW/PAST({past}) WINS: {} / {} ; DRAWS: {}",
                result.wins[0],
                result.wins[1..].iter().sum::<usize>(),
                result.draws
            );
            self.record("win_rate/past", result.win_rate(0), i);
            win_rate = Some(result.win_rate(0));
        }

        let decision = self.apply_gate(i, past, win_rate)?;
        let live = if decision.advances() { i } else { past };

        self.state.expert_value_weight = self.config.expert_value_weight.at(attempt);
        self.record("win_rate/model_version", live as f32, attempt);
        self.state.attempt += 1;
        self.set_phase(Phase::Idle);
        Ok(decision)
    }

    fn self_play(&mut self, i: usize, attempt: usize, pass_seed: Option<u64>) -> Result<(), CoachError> {
        self.set_phase(Phase::SelfPlay);
        let settings = SelfPlaySettings {
            config: self.config.selfplay.clone(),
            warmup: self.state.warmup,
            value_weight: self.state.expert_value_weight,
            seed: pass_seed.map(|s| derive_seed(s, SELFPLAY_STREAM)),
        };
        let total = settings.config.games_per_iteration;
        let updates = self.updates.as_ref();
        let output = run_self_play::<G, N, _>(&self.network, &settings, |completed| {
            if let Some(tx) = updates {
                let _ = tx.send(TrainingUpdate::SelfPlayProgress { completed, total });
            }
        })?;

        self.set_phase(Phase::Persist);
        let mut shard = IterationShard::new(G::OBSERVATION_SIZE, G::ACTION_SIZE);
        shard.extend(&output.samples);
        info!("saving {} samples for iteration {i}", shard.len());
        self.shards.write_shard(i, &shard)?;
        self.record_game_results(&output.records, attempt);
        Ok(())
    }

    /// Per-seat win rates of the self-play games, draws counted as half.
    fn record_game_results(&mut self, records: &[GameRecord], attempt: usize) {
        if records.is_empty() {
            return;
        }
        let games = records.len() as f32;
        let mut wins = vec![0usize; G::NUM_PLAYERS];
        let mut draws = 0usize;
        for record in records {
            match record.outcome {
                Outcome::Winner(seat) => wins[seat] += 1,
                Outcome::Draw => draws += 1,
            }
        }
        for (seat, w) in wins.iter().enumerate() {
            let rate = (*w as f32 + 0.5 * draws as f32) / games;
            self.record(&format!("win_rate/player{seat}"), rate, attempt);
        }
        self.record("win_rate/draws", draws as f32 / games, attempt);
    }

    fn train(&mut self, i: usize) -> Result<(), CoachError> {
        self.set_phase(Phase::Train);
        let window = train_window(i, self.config.training.num_iters_for_train_examples_history);
        debug!("training window {window:?}");
        let shards = window
            .map(|k| self.shards.read_shard(k))
            .collect::<Result<Vec<_>, _>>()?;
        let samples = shards.last().map(IterationShard::len).unwrap_or(0);

        let loss = self
            .network
            .train(&shards, self.config.training.train_steps_per_iteration)?;
        info!(
            "iteration {i}: policy loss {:.4}, value loss {:.4}",
            loss.policy, loss.value
        );
        self.record("loss/policy", loss.policy, i);
        self.record("loss/value", loss.value, i);
        self.record("loss/total", loss.total(), i);

        let metrics = CheckpointMetrics {
            loss: Some(loss),
            samples,
        };
        self.checkpoints.save(i, &self.network, &metrics)?;
        Ok(())
    }

    fn arena_search(&self) -> SearchSettings {
        SearchSettings {
            simulations: self.config.selfplay.num_mcts_sims,
            cpuct: self.config.selfplay.cpuct,
            root_noise: None,
        }
    }

    /// Live network against random movers. Always sequential; searched
    /// only when `arena_mcts` is set.
    fn compare_to_random(&self, pass_seed: Option<u64>) -> Result<ArenaResult, ArenaError> {
        let arena = &self.config.arena;
        let seed = pass_seed.map(|s| derive_seed(s, RANDOM_ARENA_STREAM));
        let mut candidate: Box<dyn Player<G> + '_> = if arena.arena_mcts {
            Box::new(MctsPlayer::<G, N>::new(
                &self.network,
                self.arena_search(),
                arena.arena_temp,
                seed,
            ))
        } else {
            Box::new(NetworkPlayer::new(&self.network))
        };
        let mut randoms: Vec<RandomPlayer> = (1..G::NUM_PLAYERS)
            .map(|k| RandomPlayer::new(seed.map(|s| derive_seed(s, k))))
            .collect();

        let mut players: Vec<&mut dyn Player<G>> = Vec::with_capacity(G::NUM_PLAYERS);
        players.push(candidate.as_mut());
        for r in randoms.iter_mut() {
            players.push(r);
        }
        info!("pitting against random ({} games)", arena.arena_compare_random);
        play_games(&mut players, arena.arena_compare_random, self.config.selfplay.max_moves)
    }

    /// Live network (player 0) against checkpoint `past` in every other seat.
    fn compare_to_past(&mut self, past: usize, pass_seed: Option<u64>) -> Result<ArenaResult, CoachError> {
        self.checkpoints.load(past, &mut self.past)?;
        info!("pitting against iteration {past}");

        let arena = &self.config.arena;
        let sp = &self.config.selfplay;
        let seed = pass_seed.map(|s| derive_seed(s, PAST_ARENA_STREAM));
        let result = if arena.arena_batched {
            let mut networks: Vec<&N> = Vec::with_capacity(G::NUM_PLAYERS);
            networks.push(&self.network);
            networks.extend((1..G::NUM_PLAYERS).map(|_| &self.past));
            let settings = BatchedArenaSettings {
                workers: sp.workers,
                games: arena.arena_compare,
                process_batch_size: sp.process_batch_size,
                max_moves: sp.max_moves,
                search: self.arena_search(),
                temp: arena.arena_temp,
                poll_interval: sp.poll_interval(),
                seed,
            };
            play_batched::<G, N>(&networks, &settings)?
        } else {
            let mut owned: Vec<Box<dyn Player<G> + '_>> = Vec::with_capacity(G::NUM_PLAYERS);
            for k in 0..G::NUM_PLAYERS {
                let network = if k == 0 { &self.network } else { &self.past };
                let player_seed = seed.map(|s| derive_seed(s, k));
                if arena.arena_mcts {
                    owned.push(Box::new(MctsPlayer::<G, N>::new(
                        network,
                        self.arena_search(),
                        arena.arena_temp,
                        player_seed,
                    )));
                } else {
                    owned.push(Box::new(NetworkPlayer::new(network)));
                }
            }
            let mut players: Vec<&mut dyn Player<G>> =
                owned.iter_mut().map(|p| p.as_mut() as &mut dyn Player<G>).collect();
            play_games(&mut players, arena.arena_compare, sp.max_moves)?
        };
        Ok(result)
    }

    /// Apply the gating decision for iteration `i` against checkpoint
    /// `past`. A rejection rolls the live network back to `past` before the
    /// rejected checkpoint is deleted.
    pub fn apply_gate(
        &mut self,
        i: usize,
        past: usize,
        win_rate: Option<f32>,
    ) -> Result<GateDecision, CoachError> {
        self.set_phase(Phase::Gate);
        let decision = gate_decision(&self.config.gating, win_rate, self.state.gating_counter);
        match decision {
            GateDecision::Rejected => {
                self.set_phase(Phase::Rollback);
                info!("staying on model version {past}");
                self.checkpoints.load(past, &mut self.network)?;
                self.checkpoints.delete(i)?;
                self.state.gating_counter += 1;
            }
            GateDecision::Forced | GateDecision::Accepted => {
                if decision == GateDecision::Forced {
                    warn!(
                        "iteration {i} is below the gating threshold after {} rejections, accepting anyway",
                        self.state.gating_counter
                    );
                    self.record("gating/forced", 1.0, i);
                }
                self.set_phase(Phase::Advance);
                self.state.gating_counter = 0;
                self.state.current_iter += 1;
            }
        }
        self.notify(TrainingUpdate::Gate { iteration: i, decision });
        Ok(decision)
    }

    fn record(&mut self, key: &str, value: f32, iteration: usize) {
        if let Err(e) = self.metrics.scalar(key, value, iteration) {
            warn!("failed to record {key}: {e}");
        }
    }

    fn set_phase(&self, phase: Phase) {
        debug!("iteration {}: {phase}", self.state.current_iter);
        self.notify(TrainingUpdate::Phase {
            iteration: self.state.current_iter,
            phase,
        });
    }

    fn notify(&self, update: TrainingUpdate) {
        if let Some(tx) = &self.updates {
            let _ = tx.send(update);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{Evaluation, TrainLoss, UniformNetwork};
    use crate::checkpoint::DirCheckpointStore;
    use crate::error::{NetworkError, ShardError};
    use crate::game::ConnectFour;
    use crate::training::{DirShardStore, MemoryMetricsSink, Sample};
    use std::path::Path;
    use tempfile::TempDir;

    fn uniform(generation: usize) -> UniformNetwork {
        let mut net = UniformNetwork::new(ConnectFour::OBSERVATION_SIZE, ConnectFour::ACTION_SIZE);
        net.generation = generation;
        net
    }

    fn small_config(dir: &Path) -> CoachConfig {
        let mut config = CoachConfig::default();
        config.run.num_iters = 3;
        config.run.checkpoint_dir = dir.join("checkpoints");
        config.run.data_dir = dir.join("data");
        config.run.seed = Some(5);
        config.selfplay.workers = 2;
        config.selfplay.process_batch_size = 2;
        config.selfplay.games_per_iteration = 4;
        config.selfplay.num_mcts_sims = 3;
        config.selfplay.num_fast_sims = 2;
        config.selfplay.num_warmup_sims = 2;
        config.selfplay.batch_poll_ms = 2;
        config.training.train_steps_per_iteration = 2;
        config.arena.arena_compare_random = 2;
        config.arena.arena_compare = 2;
        config.arena.arena_mcts = true;
        config.arena.arena_batched = true;
        config
    }

    struct Fixture {
        _dir: TempDir,
        checkpoints: DirCheckpointStore,
        metrics: MemoryMetricsSink,
        controller: IterationController<ConnectFour, UniformNetwork>,
    }

    fn fixture(edit: impl FnOnce(&mut CoachConfig)) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut config = small_config(dir.path());
        edit(&mut config);
        let checkpoints = DirCheckpointStore::new(&config.run.checkpoint_dir);
        let shards = DirShardStore::new(&config.run.data_dir).unwrap();
        let metrics = MemoryMetricsSink::new();
        let controller = IterationController::new(
            config,
            uniform(0),
            uniform(0),
            Box::new(checkpoints.clone()),
            Box::new(shards),
            Box::new(metrics.clone()),
        );
        Fixture {
            _dir: dir,
            checkpoints,
            metrics,
            controller,
        }
    }

    /// Checkpoints 0 and 1 exist and the live network is iteration 1.
    fn after_first_training(f: &mut Fixture) {
        f.checkpoints.save(0, &uniform(0), &CheckpointMetrics::default()).unwrap();
        f.checkpoints.save(1, &uniform(1), &CheckpointMetrics::default()).unwrap();
        f.controller.network = uniform(1);
        f.controller.state.current_iter = 1;
    }

    #[test]
    fn test_reject_rolls_back_and_deletes() {
        let mut f = fixture(|_| {});
        after_first_training(&mut f);

        let decision = f.controller.apply_gate(1, 0, Some(0.40)).unwrap();
        assert_eq!(decision, GateDecision::Rejected);
        assert_eq!(f.controller.network().generation, 0);
        assert!(!f.checkpoints.exists(1));
        assert!(f.checkpoints.exists(0));
        assert_eq!(f.controller.state().current_iter, 1);
        assert_eq!(f.controller.state().gating_counter, 1);
    }

    #[test]
    fn test_gating_bound_forces_acceptance() {
        let mut f = fixture(|_| {});
        after_first_training(&mut f);
        f.controller.state.gating_counter = 3;

        let decision = f.controller.apply_gate(1, 0, Some(0.40)).unwrap();
        assert_eq!(decision, GateDecision::Forced);
        assert_eq!(f.controller.network().generation, 1);
        assert!(f.checkpoints.exists(1));
        assert_eq!(f.controller.state().current_iter, 2);
        assert_eq!(f.controller.state().gating_counter, 0);
        assert_eq!(f.metrics.values("gating/forced"), vec![(1, 1.0)]);
    }

    #[test]
    fn test_acceptance_resets_counter() {
        for counter in [0, 1, 2] {
            let mut f = fixture(|_| {});
            after_first_training(&mut f);
            f.controller.state.gating_counter = counter;
            let decision = f.controller.apply_gate(1, 0, Some(0.75)).unwrap();
            assert_eq!(decision, GateDecision::Accepted);
            assert_eq!(f.controller.state().current_iter, 2);
            assert_eq!(f.controller.state().gating_counter, 0);
        }
    }

    #[test]
    fn test_counter_never_exceeds_bound() {
        let mut f = fixture(|c| c.gating.max_gating_iters = 2);
        after_first_training(&mut f);
        for _ in 0..6 {
            f.checkpoints.save(1, &uniform(1), &CheckpointMetrics::default()).unwrap();
            f.controller.apply_gate(1, 0, Some(0.1)).unwrap();
            assert!(f.controller.state().gating_counter <= 2);
        }
    }

    #[test]
    fn test_discover_fresh_directory_seeds_iteration_zero() {
        let mut f = fixture(|_| {});
        assert_eq!(f.controller.discover().unwrap(), 1);
        assert!(f.checkpoints.exists(0));
        assert_eq!(f.controller.state().current_iter, 1);
    }

    #[test]
    fn test_discover_resumes_from_latest() {
        let mut f = fixture(|_| {});
        for i in 0..3 {
            f.checkpoints.save(i, &uniform(10 + i), &CheckpointMetrics::default()).unwrap();
        }
        assert_eq!(f.controller.discover().unwrap(), 3);
        assert_eq!(f.controller.network().generation, 12);
    }

    fn write_shard(data_dir: &Path, iteration: usize, rows: usize) {
        let store = DirShardStore::new(data_dir).unwrap();
        let mut shard = IterationShard::new(ConnectFour::OBSERVATION_SIZE, ConnectFour::ACTION_SIZE);
        for r in 0..rows {
            let mut policy = vec![0.0; ConnectFour::ACTION_SIZE];
            policy[r % ConnectFour::ACTION_SIZE] = 1.0;
            shard.push(&Sample {
                observation: vec![0.0; ConnectFour::OBSERVATION_SIZE],
                policy,
                value: 1.0,
            });
        }
        store.write_shard(iteration, &shard).unwrap();
    }

    #[test]
    fn test_resumed_run_continues_pass_counter() {
        let mut f = fixture(|c| {
            c.run.num_iters = 10;
            c.expert_value_weight.start = 0.0;
            c.expert_value_weight.end = 1.0;
            c.expert_value_weight.iterations = 10;
        });
        for i in 0..=5 {
            f.checkpoints.save(i, &uniform(i), &CheckpointMetrics::default()).unwrap();
        }
        let data_dir = f.controller.config().run.data_dir.clone();
        for i in 1..=5 {
            write_shard(&data_dir, i, 3);
        }

        assert_eq!(f.controller.discover().unwrap(), 6);
        assert_eq!(f.controller.state().attempt, 6);
        assert!((f.controller.state().expert_value_weight - 0.5).abs() < 1e-6);

        f.controller.run_iteration().unwrap();
        assert!(!f.controller.state().warmup);
        assert_eq!(f.controller.state().attempt, 7);
        assert_eq!(f.metrics.values("win_rate/past").len(), 1);
        assert_eq!(f.metrics.values("win_rate/past")[0].0, 6);
        assert_eq!(f.metrics.values("win_rate/random").len(), 1);
        assert_eq!(f.metrics.values("win_rate/model_version")[0].0, 6);
        assert_eq!(f.metrics.values("win_rate/player0")[0].0, 6);
    }

    #[test]
    fn test_discover_without_load_model_uses_start_iter() {
        let mut f = fixture(|c| {
            c.run.load_model = false;
            c.run.start_iter = 4;
        });
        assert_eq!(f.controller.discover().unwrap(), 4);
        assert!(f.checkpoints.exists(3));
        assert!(!f.checkpoints.exists(0));
    }

    #[test]
    fn test_missing_shard_in_window_is_fatal() {
        let mut f = fixture(|c| c.selfplay.skip_self_play_iters = 1);
        f.controller.discover().unwrap();
        let err = f.controller.run_iteration().unwrap_err();
        assert!(matches!(err, CoachError::Shard(ShardError::Missing(1))), "{err}");
        assert_eq!(f.controller.state().current_iter, 1);
        assert_eq!(f.controller.state().attempt, 1);
        assert!(!f.checkpoints.exists(1));
    }

    struct Broken(UniformNetwork);

    impl Network for Broken {
        fn action_size(&self) -> usize {
            self.0.action_size()
        }

        fn observation_size(&self) -> usize {
            self.0.observation_size()
        }

        fn evaluate(&self, _observations: &[f32], _rows: usize) -> Result<Evaluation, NetworkError> {
            Err(NetworkError::Backend("device lost".into()))
        }

        fn train(&mut self, shards: &[IterationShard], steps: usize) -> Result<TrainLoss, NetworkError> {
            self.0.train(shards, steps)
        }

        fn save(&self, dir: &Path) -> Result<(), NetworkError> {
            self.0.save(dir)
        }

        fn load(&mut self, dir: &Path) -> Result<(), NetworkError> {
            self.0.load(dir)
        }
    }

    #[test]
    fn test_evaluation_failure_aborts_the_pass() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = small_config(dir.path());
        config.selfplay.num_warmup_iters = 0;
        let checkpoints = DirCheckpointStore::new(&config.run.checkpoint_dir);
        let shards = DirShardStore::new(&config.run.data_dir).unwrap();
        let shard_probe = DirShardStore::new(&config.run.data_dir).unwrap();
        let mut controller: IterationController<ConnectFour, Broken> = IterationController::new(
            config,
            Broken(uniform(0)),
            Broken(uniform(0)),
            Box::new(checkpoints.clone()),
            Box::new(shards),
            Box::new(MemoryMetricsSink::new()),
        );
        controller.discover().unwrap();

        let err = controller.run_iteration().unwrap_err();
        assert!(matches!(err, CoachError::Batch(_)), "{err}");
        assert!(!shard_probe.exists(1));
        assert!(!checkpoints.exists(1));
        assert_eq!(controller.state().current_iter, 1);
    }

    #[test]
    fn test_learn_runs_every_iteration() {
        let mut f = fixture(|c| c.gating.model_gating = false);
        let (tx, rx) = mpsc::channel();
        f.controller = f.controller.with_updates(tx);
        f.controller.discover().unwrap();

        let state = f.controller.learn().unwrap();
        assert_eq!(state.current_iter, 4);
        assert_eq!(state.attempt, 4);
        assert_eq!(f.controller.network().generation, 3);
        assert_eq!(f.checkpoints.list().unwrap(), vec![0, 1, 2, 3]);

        assert_eq!(f.metrics.values("loss/total").len(), 3);
        // Pass 1 is warmup, so no arena games.
        assert_eq!(
            f.metrics.values("win_rate/random").iter().map(|(i, _)| *i).collect::<Vec<_>>(),
            vec![2, 3]
        );
        assert_eq!(f.metrics.values("win_rate/past").len(), 2);
        assert_eq!(
            f.metrics.values("win_rate/model_version"),
            vec![(1, 1.0), (2, 2.0), (3, 3.0)]
        );
        assert_eq!(f.metrics.values("win_rate/player0").len(), 3);

        let updates: Vec<TrainingUpdate> = rx.try_iter().collect();
        assert_eq!(updates.last(), Some(&TrainingUpdate::Finished));
        assert!(updates.contains(&TrainingUpdate::SelfPlayProgress { completed: 4, total: 4 }));
        let gates = updates
            .iter()
            .filter(|u| matches!(u, TrainingUpdate::Gate { .. }))
            .count();
        assert_eq!(gates, 3);
    }

    #[test]
    fn test_learn_honours_stop_flag() {
        let mut f = fixture(|_| {});
        f.controller.discover().unwrap();
        f.controller.stop_flag().store(true, Ordering::SeqCst);
        let state = f.controller.learn().unwrap();
        assert_eq!(state.current_iter, 1);
        assert_eq!(state.attempt, 1);
        assert!(!f.checkpoints.exists(1));
    }

    #[test]
    fn test_sequential_past_comparison_without_search() {
        let mut f = fixture(|c| {
            c.arena.arena_batched = false;
            c.arena.arena_mcts = false;
            c.gating.model_gating = false;
            c.run.num_iters = 2;
        });
        f.controller.discover().unwrap();
        f.controller.learn().unwrap();
        assert_eq!(f.metrics.values("win_rate/past").len(), 1);
        let (_, rate) = f.metrics.values("win_rate/past")[0];
        assert!((0.0..=1.0).contains(&rate));
    }
}
