use std::time::Duration;

use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::ai::{Network, Search, SearchSettings, SearchStep};
use crate::arena::{seat_holder, ArenaResult, Tally};
use crate::batching::{derive_seed, run_pool, split_games, InferenceBatcher, SlotHandle, SlotSet};
use crate::error::{ArenaError, BatchError};
use crate::game::{Game, Outcome};

/// Settings for [`play_batched`].
#[derive(Debug, Clone)]
pub struct BatchedArenaSettings {
    pub workers: usize,
    pub games: usize,
    /// Slot capacity and concurrent games per worker.
    pub process_batch_size: usize,
    pub max_moves: usize,
    pub search: SearchSettings,
    pub temp: f32,
    pub poll_interval: Duration,
    pub seed: Option<u64>,
}

struct ArenaGame<G: Game> {
    index: usize,
    game: G,
    search: Search<G>,
    /// Network owning the player to move.
    route: usize,
    row: Option<usize>,
}

enum Drive {
    Staged,
    Finished(Outcome),
}

impl<G: Game> ArenaGame<G> {
    fn new(index: usize, settings: &BatchedArenaSettings) -> Self {
        let mut game = ArenaGame {
            index,
            game: G::initial(),
            search: Search::new(),
            route: 0,
            row: None,
        };
        game.start_move(settings);
        game
    }

    fn start_move(&mut self, settings: &BatchedArenaSettings) {
        self.route = seat_holder(self.game.current_player(), self.index, G::NUM_PLAYERS);
        self.search.start(&self.game, settings.search);
    }

    fn drive(
        &mut self,
        id: usize,
        slots: &mut [SlotHandle],
        settings: &BatchedArenaSettings,
        rng: &mut StdRng,
    ) -> Result<Drive, BatchError> {
        if self.row.is_some() {
            return Ok(Drive::Staged);
        }
        loop {
            match self.search.advance() {
                SearchStep::NeedsEval => {
                    let buffers = slots[self.route].buffers_mut()?;
                    let (row, input) = buffers.stage().ok_or_else(|| BatchError::Game {
                        worker: id,
                        message: "slot buffer full".into(),
                    })?;
                    self.search.leaf().encode(input);
                    self.row = Some(row);
                    return Ok(Drive::Staged);
                }
                SearchStep::Done => {
                    let action = self.search.choose(settings.temp, rng).ok_or_else(|| BatchError::Game {
                        worker: id,
                        message: "no legal action in a running game".into(),
                    })?;
                    self.game.play(action).map_err(|e| BatchError::Game {
                        worker: id,
                        message: e.to_string(),
                    })?;
                    if let Some(outcome) = self.game.outcome() {
                        return Ok(Drive::Finished(outcome));
                    }
                    if self.game.ply() >= settings.max_moves {
                        return Ok(Drive::Finished(Outcome::Draw));
                    }
                    self.start_move(settings);
                }
            }
        }
    }
}

/// Arena worker: games `first..first + quota`, one slot per network.
fn play_share<G: Game>(
    id: usize,
    first: usize,
    quota: usize,
    slots: &mut [SlotHandle],
    settings: &BatchedArenaSettings,
    rng: &mut StdRng,
) -> Result<Tally, BatchError> {
    let mut tally = Tally::new(G::NUM_PLAYERS);
    let concurrent = settings.process_batch_size.min(quota);
    let mut next = first;
    let end = first + quota;
    let mut games: Vec<ArenaGame<G>> = Vec::with_capacity(concurrent);
    while games.len() < concurrent {
        games.push(ArenaGame::new(next, settings));
        next += 1;
    }

    while !games.is_empty() {
        for slot in slots.iter_mut() {
            slot.buffers_mut()?.clear();
        }

        let mut i = 0;
        while i < games.len() {
            match games[i].drive(id, slots, settings, rng)? {
                Drive::Staged => i += 1,
                Drive::Finished(outcome) => {
                    tally.record(games[i].index, outcome);
                    if next < end {
                        games[i] = ArenaGame::new(next, settings);
                        next += 1;
                    } else {
                        games.swap_remove(i);
                    }
                }
            }
        }
        if games.is_empty() {
            break;
        }

        // Send every non-empty slot before waiting on any of them.
        for slot in slots.iter_mut() {
            if slot.buffers()?.rows() > 0 {
                slot.send()?;
            }
        }
        for slot in slots.iter_mut() {
            slot.wait()?;
        }
        for game in games.iter_mut() {
            if let Some(row) = game.row.take() {
                let buffers = slots[game.route].buffers()?;
                game.search.resolve(buffers.policy_row(row), buffers.value_row(row), rng);
            }
        }
    }
    Ok(tally)
}

/// Play `settings.games` searched games where player `i` is backed by
/// `networks[i]`, batching every network's leaves through one coordinator.
pub fn play_batched<G, N>(networks: &[&N], settings: &BatchedArenaSettings) -> Result<ArenaResult, ArenaError>
where
    G: Game,
    N: Network + ?Sized,
{
    let n = networks.len();
    if n != G::NUM_PLAYERS {
        return Err(ArenaError::PlayerCount {
            expected: G::NUM_PLAYERS,
            actual: n,
        });
    }
    if settings.games == 0 {
        return Ok(ArenaResult::from_tally(&Tally::new(n)));
    }

    let workers = settings.workers.min(settings.games).max(1);
    let quotas = split_games(settings.games, workers);
    let firsts: Vec<usize> = quotas
        .iter()
        .scan(0, |start, &q| {
            let first = *start;
            *start += q;
            Some(first)
        })
        .collect();
    let (slots, handles) = SlotSet::new(
        workers,
        n,
        settings.process_batch_size,
        G::OBSERVATION_SIZE,
        G::ACTION_SIZE,
    );
    let batcher = InferenceBatcher::new(settings.poll_interval);

    let (stats, tallies) = run_pool(
        "arena",
        &batcher,
        slots,
        handles,
        |id, mut slots| {
            let mut rng = match settings.seed {
                Some(seed) => StdRng::seed_from_u64(derive_seed(seed, id)),
                None => StdRng::from_os_rng(),
            };
            play_share::<G>(id, firsts[id], quotas[id], &mut slots, settings, &mut rng)
        },
        |route, observations, rows| networks[route].evaluate(observations, rows),
        |_| {},
    )?;

    let mut tally = Tally::new(n);
    for t in &tallies {
        tally.merge(t);
    }
    let result = ArenaResult::from_tally(&tally);
    info!(
        "batched arena: wins {:?}, draws {}, win rates {:?} ({} batches, per network {:?})",
        result.wins, result.draws, result.win_rates, stats.batches, stats.per_route
    );
    Ok(result)
}
