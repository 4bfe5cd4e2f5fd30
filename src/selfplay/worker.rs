use log::debug;
use rand::rngs::StdRng;
use rand::Rng;

use crate::ai::{Search, SearchSettings, SearchStep};
use crate::batching::SlotHandle;
use crate::error::BatchError;
use crate::game::{Game, Outcome};
use crate::selfplay::{EpisodeSink, GameRecord, SelfPlaySettings};
use crate::training::Sample;

/// Decision point waiting for the game result.
struct PendingSample {
    observation: Vec<f32>,
    policy: Vec<f32>,
    player: usize,
    root_value: f32,
}

/// One game in flight on a worker.
struct ActiveGame<G: Game> {
    game: G,
    search: Search<G>,
    /// Whether the current move's search produces a sample.
    recorded: bool,
    history: Vec<PendingSample>,
    /// Input row staged for the pending leaf.
    row: Option<usize>,
}

enum Drive {
    Staged,
    Finished(Outcome),
}

impl<G: Game> ActiveGame<G> {
    fn new(settings: &SelfPlaySettings, rng: &mut StdRng) -> Self {
        let mut active = ActiveGame {
            game: G::initial(),
            search: Search::new(),
            recorded: false,
            history: Vec::new(),
            row: None,
        };
        active.start_move(settings, rng);
        active
    }

    /// Begin the search for the next move: fast or full playout, or a
    /// shallow warmup search.
    fn start_move(&mut self, settings: &SelfPlaySettings, rng: &mut StdRng) {
        let cfg = &settings.config;
        let (simulations, full) = if settings.warmup {
            (cfg.num_warmup_sims, true)
        } else if rng.random::<f32>() < cfg.prob_fast_sim {
            (cfg.num_fast_sims, false)
        } else {
            (cfg.num_mcts_sims, true)
        };
        let root_noise = (full && !settings.warmup).then_some((cfg.root_dirichlet_alpha, cfg.root_noise_frac));
        self.recorded = full;
        self.search.start(
            &self.game,
            SearchSettings {
                simulations,
                cpuct: cfg.cpuct,
                root_noise,
            },
        );
    }

    /// Advance until the search needs a network evaluation or the game ends.
    fn drive(&mut self, id: usize, slot: &mut SlotHandle, settings: &SelfPlaySettings, rng: &mut StdRng) -> Result<Drive, BatchError> {
        // Moved here by a swap_remove after staging this round.
        if self.row.is_some() {
            return Ok(Drive::Staged);
        }
        let uniform = vec![1.0 / G::ACTION_SIZE as f32; G::ACTION_SIZE];
        loop {
            match self.search.advance() {
                SearchStep::NeedsEval if settings.warmup => {
                    self.search.resolve(&uniform, 0.0, rng);
                }
                SearchStep::NeedsEval => {
                    let buffers = slot.buffers_mut()?;
                    let (row, input) = buffers.stage().ok_or_else(|| BatchError::Game {
                        worker: id,
                        message: "slot buffer full".into(),
                    })?;
                    self.search.leaf().encode(input);
                    self.row = Some(row);
                    return Ok(Drive::Staged);
                }
                SearchStep::Done => {
                    if let Some(outcome) = self.commit_move(id, settings, rng)? {
                        return Ok(Drive::Finished(outcome));
                    }
                    self.start_move(settings, rng);
                }
            }
        }
    }

    /// Record the finished search, play the chosen move and report the
    /// outcome when the game is over.
    fn commit_move(&mut self, id: usize, settings: &SelfPlaySettings, rng: &mut StdRng) -> Result<Option<Outcome>, BatchError> {
        let cfg = &settings.config;
        if self.recorded {
            let mut observation = vec![0.0; G::OBSERVATION_SIZE];
            self.game.encode(&mut observation);
            self.history.push(PendingSample {
                observation,
                policy: self.search.policy(),
                player: self.game.current_player(),
                root_value: self.search.root_value(),
            });
        }

        let action = if settings.warmup {
            let legal = self.game.legal_actions();
            (!legal.is_empty()).then(|| legal[rng.random_range(0..legal.len())])
        } else {
            let temp = if self.game.ply() < cfg.temp_threshold { cfg.temp } else { 0.0 };
            self.search.choose(temp, rng)
        };
        let action = action.ok_or_else(|| BatchError::Game {
            worker: id,
            message: "no legal action in a running game".into(),
        })?;
        self.game.play(action).map_err(|e| BatchError::Game {
            worker: id,
            message: e.to_string(),
        })?;

        Ok(match self.game.outcome() {
            Some(outcome) => Some(outcome),
            None if self.game.ply() >= cfg.max_moves => Some(Outcome::Draw),
            None => None,
        })
    }

    /// Turn the recorded decision points into samples.
    fn finish(self, outcome: Outcome, settings: &SelfPlaySettings, sink: &EpisodeSink) -> GameRecord {
        let w = settings.value_weight;
        for pending in &self.history {
            let z = outcome.value_for(pending.player);
            let value = (1.0 - w) * z + w * pending.root_value;
            if settings.config.symmetric_samples {
                for (observation, policy) in self.game.symmetries(&pending.observation, &pending.policy) {
                    sink.sample(Sample {
                        observation,
                        policy,
                        value,
                    });
                }
            } else {
                sink.sample(Sample {
                    observation: pending.observation.clone(),
                    policy: pending.policy.clone(),
                    value,
                });
            }
        }
        GameRecord {
            outcome,
            length: self.game.ply(),
        }
    }
}

/// Play `quota` games on one worker thread, keeping up to
/// `process_batch_size` of them in flight and submitting one slot batch per
/// round. Returns the number of games played.
pub(crate) fn play_games<G: Game>(
    id: usize,
    quota: usize,
    slot: &mut SlotHandle,
    settings: &SelfPlaySettings,
    sink: &EpisodeSink,
    rng: &mut StdRng,
) -> Result<usize, BatchError> {
    let concurrent = settings.config.process_batch_size.min(quota);
    let mut games: Vec<ActiveGame<G>> = Vec::with_capacity(concurrent);
    let mut started = 0;
    let mut finished = 0;
    while games.len() < concurrent {
        games.push(ActiveGame::new(settings, rng));
        started += 1;
    }

    while !games.is_empty() {
        slot.buffers_mut()?.clear();

        let mut i = 0;
        while i < games.len() {
            match games[i].drive(id, slot, settings, rng)? {
                Drive::Staged => i += 1,
                Drive::Finished(outcome) => {
                    let game = if started < quota {
                        started += 1;
                        std::mem::replace(&mut games[i], ActiveGame::new(settings, rng))
                    } else {
                        games.swap_remove(i)
                    };
                    sink.result(game.finish(outcome, settings, sink));
                    slot.progress().game_completed();
                    finished += 1;
                }
            }
        }

        if games.is_empty() {
            break;
        }
        slot.submit()?;
        let buffers = slot.buffers()?;
        for game in games.iter_mut() {
            if let Some(row) = game.row.take() {
                game.search.resolve(buffers.policy_row(row), buffers.value_row(row), rng);
            }
        }
    }

    debug!("worker {} finished {} games", id, finished);
    Ok(finished)
}
