//! Game rules seen by self-play and the arena: a [`Game`] trait over
//! turn-based, perfect-information games with player indices `0..NUM_PLAYERS`,
//! and the Connect Four implementation shipped with the crate.

mod connect_four;

pub use connect_four::{ConnectFour, COLS, ROWS};

/// Final result of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Winner(usize),
    Draw,
}

impl Outcome {
    /// Game result from `player`'s point of view: +1 win, -1 loss, 0 draw.
    pub fn value_for(self, player: usize) -> f32 {
        match self {
            Outcome::Winner(w) if w == player => 1.0,
            Outcome::Winner(_) => -1.0,
            Outcome::Draw => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoveError {
    #[error("action {0} is not legal")]
    IllegalAction(usize),
    #[error("game is already over")]
    GameOver,
}

/// Rules engine consumed by self-play workers and the arena.
pub trait Game: Clone + Send + 'static {
    const NUM_PLAYERS: usize;
    const ACTION_SIZE: usize;
    /// Observation planes as `[channels, rows, cols]`.
    const OBSERVATION_SHAPE: [usize; 3];
    const OBSERVATION_SIZE: usize =
        Self::OBSERVATION_SHAPE[0] * Self::OBSERVATION_SHAPE[1] * Self::OBSERVATION_SHAPE[2];

    fn initial() -> Self;

    /// Index of the player to move.
    fn current_player(&self) -> usize;

    /// Plies played so far.
    fn ply(&self) -> usize;

    fn legal_actions(&self) -> Vec<usize>;

    fn play(&mut self, action: usize) -> Result<(), MoveError>;

    fn outcome(&self) -> Option<Outcome>;

    fn is_terminal(&self) -> bool {
        self.outcome().is_some()
    }

    /// Write the observation for the player to move into `out`
    /// (`OBSERVATION_SIZE` values).
    fn encode(&self, out: &mut [f32]);

    /// Equivalent `(observation, policy)` pairs, the identity first.
    fn symmetries(&self, observation: &[f32], policy: &[f32]) -> Vec<(Vec<f32>, Vec<f32>)> {
        vec![(observation.to_vec(), policy.to_vec())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_value_for() {
        assert_eq!(Outcome::Winner(1).value_for(1), 1.0);
        assert_eq!(Outcome::Winner(1).value_for(0), -1.0);
        assert_eq!(Outcome::Draw.value_for(0), 0.0);
    }

    #[test]
    fn test_observation_size_is_derived() {
        assert_eq!(ConnectFour::OBSERVATION_SIZE, 3 * ROWS * COLS);
    }
}
