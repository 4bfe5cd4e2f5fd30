//! Self-play data generation: a scoped pool of workers, each running many
//! concurrent searched games, served by one [`InferenceBatcher`] on the
//! calling thread.

mod worker;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::ai::Network;
use crate::batching::{derive_seed, run_pool, split_games, BatchStats, InferenceBatcher, SlotSet};
use crate::config::SelfPlayConfig;
use crate::error::BatchError;
use crate::game::{Game, Outcome};
use crate::training::Sample;

/// Result of one finished self-play game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameRecord {
    pub outcome: Outcome,
    /// Plies played.
    pub length: usize,
}

/// Per-phase settings handed to every worker.
#[derive(Debug, Clone)]
pub struct SelfPlaySettings {
    pub config: SelfPlayConfig,
    /// Uniform local leaf resolution, random moves, no batching.
    pub warmup: bool,
    /// Weight of the search root value in value targets.
    pub value_weight: f32,
    pub seed: Option<u64>,
}

/// Worker-side ends of the sample and result sinks.
#[derive(Clone)]
pub struct EpisodeSink {
    samples: Sender<Sample>,
    results: Sender<GameRecord>,
}

impl EpisodeSink {
    /// New sink plus the receivers the controller drains.
    pub fn channel() -> (EpisodeSink, Receiver<Sample>, Receiver<GameRecord>) {
        let (samples, sample_rx) = unbounded();
        let (results, result_rx) = unbounded();
        (EpisodeSink { samples, results }, sample_rx, result_rx)
    }

    /// Returns `false` once the controller has dropped its receiver.
    pub fn sample(&self, sample: Sample) -> bool {
        if self.samples.send(sample).is_err() {
            debug!("sample receiver dropped, discarding sample");
            return false;
        }
        true
    }

    /// Returns `false` once the controller has dropped its receiver.
    pub fn result(&self, record: GameRecord) -> bool {
        if self.results.send(record).is_err() {
            debug!("result receiver dropped, discarding game record");
            return false;
        }
        true
    }
}

/// Everything one self-play phase produced.
#[derive(Debug)]
pub struct SelfPlayOutput {
    pub samples: Vec<Sample>,
    pub records: Vec<GameRecord>,
    pub stats: BatchStats,
}

/// Play `settings.config.games_per_iteration` games with `network` and
/// collect their samples and results.
///
/// `on_progress` receives the completed-game count as it changes.
pub fn run_self_play<G, N, P>(network: &N, settings: &SelfPlaySettings, on_progress: P) -> Result<SelfPlayOutput, BatchError>
where
    G: Game,
    N: Network + ?Sized,
    P: FnMut(usize),
{
    let cfg = &settings.config;
    let workers = cfg.workers.min(cfg.games_per_iteration).max(1);
    let quotas = split_games(cfg.games_per_iteration, workers);
    let (slots, handles) = SlotSet::new(
        workers,
        1,
        cfg.process_batch_size,
        G::OBSERVATION_SIZE,
        G::ACTION_SIZE,
    );
    let (sink, sample_rx, result_rx) = EpisodeSink::channel();
    let batcher = InferenceBatcher::new(cfg.poll_interval());

    info!(
        "self-play: {} games on {} workers (batch {}, warmup {})",
        cfg.games_per_iteration, workers, cfg.process_batch_size, settings.warmup
    );

    let (stats, games_per_worker) = run_pool(
        "selfplay",
        &batcher,
        slots,
        handles,
        |id, mut slots| {
            let mut rng = match settings.seed {
                Some(seed) => StdRng::seed_from_u64(derive_seed(seed, id)),
                None => StdRng::from_os_rng(),
            };
            let slot = slots
                .first_mut()
                .ok_or_else(|| BatchError::Game {
                    worker: id,
                    message: "no slot assigned".into(),
                })?;
            worker::play_games::<G>(id, quotas[id], slot, settings, &sink, &mut rng)
        },
        |_, observations, rows| network.evaluate(observations, rows),
        on_progress,
    )?;
    drop(sink);

    let samples: Vec<Sample> = sample_rx.try_iter().collect();
    let records: Vec<GameRecord> = result_rx.try_iter().collect();
    info!(
        "self-play done: {} games ({:?} per worker), {} samples, {} batches",
        records.len(),
        games_per_worker,
        samples.len(),
        stats.batches
    );
    Ok(SelfPlayOutput {
        samples,
        records,
        stats,
    })
}
