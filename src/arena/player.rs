use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::ai::{masked_priors, Network, Search, SearchSettings};
use crate::error::{ArenaError, NetworkError};
use crate::game::Game;

/// Anything that can pick a move in an arena game.
pub trait Player<G: Game> {
    /// Select an action for the player to move in `game`.
    fn select_action(&mut self, game: &G) -> Result<usize, ArenaError>;

    /// Return the player's display name.
    fn name(&self) -> &str;

    /// Called before each new game.
    fn reset(&mut self) {}
}

fn rng_from(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

/// A player that selects uniformly at random from legal actions.
pub struct RandomPlayer {
    rng: StdRng,
}

impl RandomPlayer {
    pub fn new(seed: Option<u64>) -> Self {
        RandomPlayer { rng: rng_from(seed) }
    }
}

impl<G: Game> Player<G> for RandomPlayer {
    fn select_action(&mut self, game: &G) -> Result<usize, ArenaError> {
        let actions = game.legal_actions();
        if actions.is_empty() {
            return Err(ArenaError::NoLegalAction);
        }
        Ok(actions[self.rng.random_range(0..actions.len())])
    }

    fn name(&self) -> &str {
        "Random"
    }
}

/// Plays the network's most probable legal action without search.
pub struct NetworkPlayer<'a, N: Network + ?Sized> {
    network: &'a N,
    observation: Vec<f32>,
    priors: Vec<f32>,
}

impl<'a, N: Network + ?Sized> NetworkPlayer<'a, N> {
    pub fn new(network: &'a N) -> Self {
        NetworkPlayer {
            network,
            observation: Vec::new(),
            priors: Vec::new(),
        }
    }
}

impl<G: Game, N: Network + ?Sized> Player<G> for NetworkPlayer<'_, N> {
    fn select_action(&mut self, game: &G) -> Result<usize, ArenaError> {
        let legal = game.legal_actions();
        self.observation.resize(G::OBSERVATION_SIZE, 0.0);
        self.priors.resize(G::ACTION_SIZE, 0.0);
        game.encode(&mut self.observation);

        let eval = self.network.evaluate(&self.observation, 1)?;
        masked_priors(&eval.policy, &legal, &mut self.priors);
        legal
            .iter()
            .copied()
            .max_by(|&a, &b| self.priors[a].total_cmp(&self.priors[b]))
            .ok_or(ArenaError::NoLegalAction)
    }

    fn name(&self) -> &str {
        "Network"
    }
}

/// Runs a full search per move, evaluating leaves one at a time.
pub struct MctsPlayer<'a, G: Game, N: Network + ?Sized> {
    network: &'a N,
    search: Search<G>,
    settings: SearchSettings,
    temp: f32,
    rng: StdRng,
}

impl<'a, G: Game, N: Network + ?Sized> MctsPlayer<'a, G, N> {
    pub fn new(network: &'a N, settings: SearchSettings, temp: f32, seed: Option<u64>) -> Self {
        MctsPlayer {
            network,
            search: Search::new(),
            settings,
            temp,
            rng: rng_from(seed),
        }
    }
}

impl<G: Game, N: Network + ?Sized> Player<G> for MctsPlayer<'_, G, N> {
    fn select_action(&mut self, game: &G) -> Result<usize, ArenaError> {
        let network = self.network;
        let mut observation = vec![0.0; G::OBSERVATION_SIZE];
        self.search.run(game, self.settings, &mut self.rng, |leaf| {
            leaf.encode(&mut observation);
            let eval = network.evaluate(&observation, 1)?;
            let value = eval.value.first().copied().unwrap_or(0.0);
            Ok::<_, NetworkError>((eval.policy, value))
        })?;
        self.search
            .choose(self.temp, &mut self.rng)
            .ok_or(ArenaError::NoLegalAction)
    }

    fn name(&self) -> &str {
        "MCTS"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::UniformNetwork;
    use crate::game::ConnectFour;

    #[test]
    fn test_random_player_selects_legal_action() {
        let mut player = RandomPlayer::new(Some(3));
        let mut game = ConnectFour::initial();
        for _ in 0..6 {
            game.play(0).unwrap();
        }
        for _ in 0..50 {
            let action = Player::<ConnectFour>::select_action(&mut player, &game).unwrap();
            assert_ne!(action, 0);
        }
    }

    #[test]
    fn test_network_player_picks_legal_argmax() {
        let net = UniformNetwork::new(ConnectFour::OBSERVATION_SIZE, ConnectFour::ACTION_SIZE);
        let mut player = NetworkPlayer::new(&net);
        let mut game = ConnectFour::initial();
        for _ in 0..6 {
            game.play(6).unwrap();
        }
        let action = Player::<ConnectFour>::select_action(&mut player, &game).unwrap();
        assert!(game.legal_actions().contains(&action));
    }

    #[test]
    fn test_mcts_player_takes_the_win() {
        let net = UniformNetwork::new(ConnectFour::OBSERVATION_SIZE, ConnectFour::ACTION_SIZE);
        let settings = SearchSettings {
            simulations: 200,
            cpuct: 1.25,
            root_noise: None,
        };
        let mut player = MctsPlayer::<ConnectFour, _>::new(&net, settings, 0.0, Some(1));
        let mut game = ConnectFour::initial();
        for m in [0, 6, 1, 6, 2, 5] {
            game.play(m).unwrap();
        }
        assert_eq!(player.select_action(&game).unwrap(), 3);
    }
}
