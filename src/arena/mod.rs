//! Head-to-head matches between players with rotating seats, sequentially
//! or with every network-driven search batched through the inference
//! coordinator.

mod batched;
mod player;

use log::info;

use crate::error::ArenaError;
use crate::game::{Game, Outcome};

pub use batched::{play_batched, BatchedArenaSettings};
pub use player::{MctsPlayer, NetworkPlayer, Player, RandomPlayer};

/// Win/draw tally of an arena run, indexed by player (not seat).
#[derive(Debug, Clone, PartialEq)]
pub struct ArenaResult {
    pub wins: Vec<usize>,
    pub draws: usize,
    /// `(wins[i] + draws / 2) / games` per player.
    pub win_rates: Vec<f32>,
}

impl ArenaResult {
    pub fn from_tally(tally: &Tally) -> Self {
        let games = tally.games();
        let win_rates = tally
            .wins
            .iter()
            .map(|&w| {
                if games == 0 {
                    0.0
                } else {
                    (w as f32 + 0.5 * tally.draws as f32) / games as f32
                }
            })
            .collect();
        ArenaResult {
            wins: tally.wins.clone(),
            draws: tally.draws,
            win_rates,
        }
    }

    pub fn games(&self) -> usize {
        self.wins.iter().sum::<usize>() + self.draws
    }

    pub fn win_rate(&self, player: usize) -> f32 {
        self.win_rates.get(player).copied().unwrap_or(0.0)
    }
}

/// Running counts while games are played.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    pub wins: Vec<usize>,
    pub draws: usize,
}

impl Tally {
    pub fn new(players: usize) -> Self {
        Tally {
            wins: vec![0; players],
            draws: 0,
        }
    }

    /// Credit game `index`'s outcome, given by seat, to the seated player.
    pub fn record(&mut self, index: usize, outcome: Outcome) {
        match outcome {
            Outcome::Winner(seat) => {
                let n = self.wins.len();
                self.wins[seat_holder(seat, index, n)] += 1;
            }
            Outcome::Draw => self.draws += 1,
        }
    }

    pub fn merge(&mut self, other: &Tally) {
        for (w, o) in self.wins.iter_mut().zip(&other.wins) {
            *w += o;
        }
        self.draws += other.draws;
    }

    pub fn games(&self) -> usize {
        self.wins.iter().sum::<usize>() + self.draws
    }
}

/// Player sitting in `seat` during game `index`.
pub fn seat_holder(seat: usize, index: usize, players: usize) -> usize {
    (seat + index) % players
}

/// Play `count` games between `players`, one per seat, rotating seats every
/// game. Games still running after `max_moves` plies are draws.
pub fn play_games<G: Game>(
    players: &mut [&mut dyn Player<G>],
    count: usize,
    max_moves: usize,
) -> Result<ArenaResult, ArenaError> {
    let n = players.len();
    if n != G::NUM_PLAYERS {
        return Err(ArenaError::PlayerCount {
            expected: G::NUM_PLAYERS,
            actual: n,
        });
    }

    let mut tally = Tally::new(n);
    for index in 0..count {
        for player in players.iter_mut() {
            player.reset();
        }
        let mut game = G::initial();
        let outcome = loop {
            if let Some(outcome) = game.outcome() {
                break outcome;
            }
            if game.ply() >= max_moves {
                break Outcome::Draw;
            }
            let who = seat_holder(game.current_player(), index, n);
            let action = players[who].select_action(&game)?;
            game.play(action)
                .map_err(|_| ArenaError::IllegalAction { player: who, action })?;
        };
        tally.record(index, outcome);
    }

    let result = ArenaResult::from_tally(&tally);
    let names: Vec<&str> = players.iter().map(|p| p.name()).collect();
    info!(
        "arena {:?}: wins {:?}, draws {}, win rates {:?}",
        names, result.wins, result.draws, result.win_rates
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::ConnectFour;

    /// Always plays the leftmost legal column.
    struct Leftmost;

    impl Player<ConnectFour> for Leftmost {
        fn select_action(&mut self, game: &ConnectFour) -> Result<usize, ArenaError> {
            game.legal_actions().first().copied().ok_or(ArenaError::NoLegalAction)
        }

        fn name(&self) -> &str {
            "Leftmost"
        }
    }

    struct Illegal;

    impl Player<ConnectFour> for Illegal {
        fn select_action(&mut self, _game: &ConnectFour) -> Result<usize, ArenaError> {
            Ok(99)
        }

        fn name(&self) -> &str {
            "Illegal"
        }
    }

    #[test]
    fn test_random_players_conserve_games() {
        let mut a = RandomPlayer::new(Some(1));
        let mut b = RandomPlayer::new(Some(2));
        let mut players: [&mut dyn Player<ConnectFour>; 2] = [&mut a, &mut b];
        let result = play_games(&mut players, 20, 128).unwrap();

        assert_eq!(result.wins.iter().sum::<usize>() + result.draws, 20);
        assert_eq!(result.games(), 20);
        let rate_sum: f32 = result.win_rates.iter().sum();
        assert!((rate_sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_seats_rotate_between_games() {
        // Leftmost against itself is always won by seat 0 on the bottom row.
        let mut a = Leftmost;
        let mut b = Leftmost;
        let mut players: [&mut dyn Player<ConnectFour>; 2] = [&mut a, &mut b];
        let result = play_games(&mut players, 4, 128).unwrap();
        assert_eq!(result.wins, vec![2, 2]);
        assert_eq!(result.draws, 0);
    }

    #[test]
    fn test_max_moves_truncates_to_draw() {
        let mut a = RandomPlayer::new(Some(5));
        let mut b = RandomPlayer::new(Some(6));
        let mut players: [&mut dyn Player<ConnectFour>; 2] = [&mut a, &mut b];
        let result = play_games(&mut players, 5, 2).unwrap();
        assert_eq!(result.draws, 5);
        assert_eq!(result.win_rates, vec![0.5, 0.5]);
    }

    #[test]
    fn test_wrong_player_count_is_rejected() {
        let mut a = Leftmost;
        let mut players: [&mut dyn Player<ConnectFour>; 1] = [&mut a];
        assert!(matches!(
            play_games(&mut players, 1, 10),
            Err(ArenaError::PlayerCount { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_illegal_action_is_reported() {
        let mut a = Illegal;
        let mut b = Leftmost;
        let mut players: [&mut dyn Player<ConnectFour>; 2] = [&mut a, &mut b];
        assert!(matches!(
            play_games(&mut players, 1, 10),
            Err(ArenaError::IllegalAction { player: 0, action: 99 })
        ));
    }

    #[test]
    fn test_tally_credits_seat_holder() {
        let mut tally = Tally::new(2);
        tally.record(0, Outcome::Winner(0));
        tally.record(1, Outcome::Winner(0));
        tally.record(2, Outcome::Draw);
        assert_eq!(tally.wins, vec![1, 1]);
        let result = ArenaResult::from_tally(&tally);
        assert!((result.win_rate(0) - 0.5).abs() < 1e-6);
    }
}
