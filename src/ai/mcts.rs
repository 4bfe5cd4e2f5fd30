//! Arena-allocated PUCT tree search that can pause at every leaf needing a
//! network evaluation, so many searches can share one batched evaluation call.

use rand::Rng;
use rand_distr::{Distribution, Gamma};

use crate::ai::masked_priors;
use crate::game::Game;

/// Per-search parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchSettings {
    pub simulations: usize,
    pub cpuct: f32,
    /// Dirichlet `(alpha, fraction)` mixed into the root priors.
    pub root_noise: Option<(f32, f32)>,
}

/// What a search needs next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStep {
    /// [`Search::leaf`] must be evaluated and handed to [`Search::resolve`].
    NeedsEval,
    Done,
}

struct MctsNode<G> {
    state: G,
    visit_count: u32,
    /// Cumulative value from `perspective`'s point of view.
    value_sum: f32,
    prior: f32,
    /// Player whose results this node accumulates: the player who moved into
    /// it, or the player to move at the root.
    perspective: usize,
    /// `(action, node index)` pairs.
    children: Vec<(usize, usize)>,
    is_expanded: bool,
}

pub struct MctsTree<G: Game> {
    nodes: Vec<MctsNode<G>>,
}

impl<G: Game> MctsTree<G> {
    pub fn new() -> Self {
        MctsTree {
            nodes: Vec::with_capacity(512),
        }
    }

    /// Reset the tree and install a fresh root node.
    pub fn init(&mut self, root_state: G) {
        self.nodes.clear();
        let perspective = root_state.current_player();
        self.nodes.push(MctsNode {
            state: root_state,
            visit_count: 0,
            value_sum: 0.0,
            prior: 1.0,
            perspective,
            children: Vec::new(),
            is_expanded: false,
        });
    }

    /// Expand `node_idx`; `priors` covers the whole action space.
    fn expand(&mut self, node_idx: usize, priors: &[f32]) {
        let parent_state = self.nodes[node_idx].state.clone();
        let mover = parent_state.current_player();

        let mut children = Vec::new();
        for action in parent_state.legal_actions() {
            let mut child_state = parent_state.clone();
            if child_state.play(action).is_err() {
                continue;
            }
            children.push((action, self.nodes.len()));
            self.nodes.push(MctsNode {
                state: child_state,
                visit_count: 0,
                value_sum: 0.0,
                prior: priors[action],
                perspective: mover,
                children: Vec::new(),
                is_expanded: false,
            });
        }

        let node = &mut self.nodes[node_idx];
        node.children = children;
        node.is_expanded = true;
    }

    /// Child with the highest PUCT score. Child values are already from the
    /// mover's perspective.
    fn select_best_child(&self, node_idx: usize, cpuct: f32) -> Option<usize> {
        let node = &self.nodes[node_idx];
        let parent_visits_sqrt = (node.visit_count as f32).sqrt();

        let mut best = None;
        let mut best_score = f32::NEG_INFINITY;
        for &(_, ci) in &node.children {
            let child = &self.nodes[ci];
            let q = if child.visit_count == 0 {
                0.0
            } else {
                child.value_sum / child.visit_count as f32
            };
            let u = cpuct * child.prior * parent_visits_sqrt / (1.0 + child.visit_count as f32);
            let score = q + u;
            if score > best_score {
                best_score = score;
                best = Some(ci);
            }
        }
        best
    }

    /// Add `value` (from `player`'s point of view) to every node on `path`.
    ///
    /// Nodes recorded for another player receive `-value`, which is exact for
    /// two-player zero-sum games.
    fn backup(&mut self, path: &[usize], player: usize, value: f32) {
        for &idx in path.iter().rev() {
            let node = &mut self.nodes[idx];
            node.visit_count += 1;
            node.value_sum += if node.perspective == player { value } else { -value };
        }
    }

    /// Mix Dirichlet noise into the root's children priors.
    ///
    /// Dirichlet(alpha, ...) is sampled via Gamma(alpha, 1) variates + normalize.
    fn add_dirichlet_noise_to_root<R: Rng + ?Sized>(&mut self, alpha: f32, frac: f32, rng: &mut R) {
        let n = self.nodes[0].children.len();
        if n == 0 {
            return;
        }
        let Ok(gamma_dist) = Gamma::new(alpha as f64, 1.0) else {
            return;
        };

        let mut samples: Vec<f32> = (0..n).map(|_| gamma_dist.sample(rng) as f32).collect();
        let sum: f32 = samples.iter().sum();
        if sum > 0.0 {
            samples.iter_mut().for_each(|s| *s /= sum);
        } else {
            samples.iter_mut().for_each(|s| *s = 1.0 / n as f32);
        }

        let children = self.nodes[0].children.clone();
        for ((_, ci), noise) in children.into_iter().zip(samples) {
            let child = &mut self.nodes[ci];
            child.prior = (1.0 - frac) * child.prior + frac * noise;
        }
    }

    /// Root value from the perspective of the player to move.
    pub fn root_value(&self) -> f32 {
        let root = &self.nodes[0];
        if root.visit_count == 0 {
            0.0
        } else {
            root.value_sum / root.visit_count as f32
        }
    }

    /// Visit counts of the root's children, indexed by action.
    pub fn visit_counts(&self) -> Vec<u32> {
        let mut counts = vec![0u32; G::ACTION_SIZE];
        for &(action, ci) in &self.nodes[0].children {
            counts[action] = self.nodes[ci].visit_count;
        }
        counts
    }
}

impl<G: Game> Default for MctsTree<G> {
    fn default() -> Self {
        Self::new()
    }
}

/// One resumable search from a fixed root.
pub struct Search<G: Game> {
    tree: MctsTree<G>,
    settings: SearchSettings,
    completed: usize,
    pending: Vec<usize>,
    awaiting: bool,
    priors: Vec<f32>,
}

impl<G: Game> Search<G> {
    pub fn new() -> Self {
        Search {
            tree: MctsTree::new(),
            settings: SearchSettings {
                simulations: 1,
                cpuct: 1.0,
                root_noise: None,
            },
            completed: 0,
            pending: Vec::new(),
            awaiting: false,
            priors: vec![0.0; G::ACTION_SIZE],
        }
    }

    pub fn start(&mut self, root: &G, settings: SearchSettings) {
        self.tree.init(root.clone());
        self.settings = settings;
        self.completed = 0;
        self.pending.clear();
        self.awaiting = false;
    }

    /// Run simulations until one reaches an unexpanded leaf or the budget is spent.
    pub fn advance(&mut self) -> SearchStep {
        if self.awaiting {
            return SearchStep::NeedsEval;
        }
        while self.completed < self.settings.simulations {
            self.pending.clear();
            let mut current = 0;
            loop {
                self.pending.push(current);
                let node = &self.tree.nodes[current];
                if let Some(outcome) = node.state.outcome() {
                    let player = node.perspective;
                    let path = std::mem::take(&mut self.pending);
                    self.tree.backup(&path, player, outcome.value_for(player));
                    self.pending = path;
                    self.completed += 1;
                    break;
                }
                if !node.is_expanded {
                    self.awaiting = true;
                    return SearchStep::NeedsEval;
                }
                match self.tree.select_best_child(current, self.settings.cpuct) {
                    Some(child) => current = child,
                    None => {
                        // Expanded but no playable child: score as a draw.
                        let path = std::mem::take(&mut self.pending);
                        self.tree.backup(&path, 0, 0.0);
                        self.pending = path;
                        self.completed += 1;
                        break;
                    }
                }
            }
        }
        SearchStep::Done
    }

    /// Position waiting for evaluation after [`SearchStep::NeedsEval`].
    pub fn leaf(&self) -> &G {
        let idx = self.pending.last().copied().unwrap_or(0);
        &self.tree.nodes[idx].state
    }

    /// Expand the pending leaf with network output for it: `probs` over the
    /// whole action space, `value` for the player to move at the leaf.
    pub fn resolve<R: Rng + ?Sized>(&mut self, probs: &[f32], value: f32, rng: &mut R) {
        if !self.awaiting {
            return;
        }
        let leaf = self.pending.last().copied().unwrap_or(0);
        let state = &self.tree.nodes[leaf].state;
        let player = state.current_player();
        masked_priors(probs, &state.legal_actions(), &mut self.priors);

        let priors = std::mem::take(&mut self.priors);
        self.tree.expand(leaf, &priors);
        self.priors = priors;

        if leaf == 0 {
            if let Some((alpha, frac)) = self.settings.root_noise {
                self.tree.add_dirichlet_noise_to_root(alpha, frac, rng);
            }
        }

        let path = std::mem::take(&mut self.pending);
        self.tree.backup(&path, player, value);
        self.pending = path;
        self.completed += 1;
        self.awaiting = false;
    }

    /// Run the whole search, evaluating leaves one at a time with `eval`.
    pub fn run<R, E, F>(&mut self, root: &G, settings: SearchSettings, rng: &mut R, mut eval: F) -> Result<(), E>
    where
        R: Rng + ?Sized,
        F: FnMut(&G) -> Result<(Vec<f32>, f32), E>,
    {
        self.start(root, settings);
        while self.advance() == SearchStep::NeedsEval {
            let (probs, value) = eval(self.leaf())?;
            self.resolve(&probs, value, rng);
        }
        Ok(())
    }

    pub fn simulations_done(&self) -> usize {
        self.completed
    }

    /// Visit-count distribution over the root's actions.
    pub fn policy(&self) -> Vec<f32> {
        let counts = self.tree.visit_counts();
        let total: u32 = counts.iter().sum();
        let mut policy = vec![0.0f32; G::ACTION_SIZE];
        if total > 0 {
            for (p, &c) in policy.iter_mut().zip(&counts) {
                *p = c as f32 / total as f32;
            }
        } else {
            let legal = self.tree.nodes[0].state.legal_actions();
            for &a in &legal {
                policy[a] = 1.0 / legal.len() as f32;
            }
        }
        policy
    }

    pub fn root_value(&self) -> f32 {
        self.tree.root_value()
    }

    /// Pick a root action from visit counts at temperature `temp`.
    pub fn choose<R: Rng + ?Sized>(&self, temp: f32, rng: &mut R) -> Option<usize> {
        let legal = self.tree.nodes[0].state.legal_actions();
        sample_with_temperature(&self.tree.visit_counts(), &legal, temp, rng)
    }
}

impl<G: Game> Default for Search<G> {
    fn default() -> Self {
        Self::new()
    }
}

/// Sample an action from visit counts using the given temperature.
///
/// With temp -> 0 this becomes greedy (argmax); with temp = 1 it's proportional.
pub fn sample_with_temperature<R: Rng + ?Sized>(
    visit_counts: &[u32],
    legal: &[usize],
    temp: f32,
    rng: &mut R,
) -> Option<usize> {
    if legal.is_empty() {
        return None;
    }
    if temp < 1e-6 {
        return legal.iter().copied().max_by_key(|&a| visit_counts[a]);
    }

    let inv_temp = 1.0 / temp;
    let weights: Vec<f32> = legal
        .iter()
        .map(|&a| (visit_counts[a] as f32).powf(inv_temp))
        .collect();
    let sum: f32 = weights.iter().sum();
    if !sum.is_finite() || sum <= 0.0 {
        return Some(legal[rng.random_range(0..legal.len())]);
    }

    let r: f32 = rng.random_range(0.0..sum);
    let mut cumulative = 0.0f32;
    for (&a, w) in legal.iter().zip(&weights) {
        cumulative += w;
        if r < cumulative {
            return Some(a);
        }
    }
    legal.last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::ConnectFour;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn settings(simulations: usize) -> SearchSettings {
        SearchSettings {
            simulations,
            cpuct: 1.25,
            root_noise: None,
        }
    }

    fn uniform(_: &ConnectFour) -> Result<(Vec<f32>, f32), ()> {
        Ok((vec![1.0 / 7.0; 7], 0.0))
    }

    #[test]
    fn test_tree_expand_creates_legal_children() {
        let mut tree = MctsTree::<ConnectFour>::new();
        tree.init(ConnectFour::initial());
        tree.expand(0, &[1.0 / 7.0; 7]);

        assert!(tree.nodes[0].is_expanded);
        assert_eq!(tree.nodes[0].children.len(), 7);
        for &(_, ci) in &tree.nodes[0].children {
            let child = &tree.nodes[ci];
            assert!((child.prior - 1.0 / 7.0).abs() < 1e-6);
            assert_eq!(child.perspective, 0);
        }
    }

    #[test]
    fn test_backup_signs_follow_perspective() {
        let mut tree = MctsTree::<ConnectFour>::new();
        tree.init(ConnectFour::initial());
        tree.expand(0, &[1.0 / 7.0; 7]);
        let child = tree.nodes[0].children[0].1;
        tree.expand(child, &[1.0 / 7.0; 7]);
        let grandchild = tree.nodes[child].children[0].1;

        // Leaf evaluated +1 for player 0, who is to move at the grandchild.
        tree.backup(&[0, child, grandchild], 0, 1.0);

        assert!((tree.nodes[grandchild].value_sum - (-1.0)).abs() < 1e-6);
        assert!((tree.nodes[child].value_sum - 1.0).abs() < 1e-6);
        assert!((tree.nodes[0].value_sum - 1.0).abs() < 1e-6);
        assert_eq!(tree.nodes[0].visit_count, 1);
    }

    #[test]
    fn test_search_pauses_for_each_leaf() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut search = Search::<ConnectFour>::new();
        search.start(&ConnectFour::initial(), settings(10));

        let mut evals = 0;
        while search.advance() == SearchStep::NeedsEval {
            // Asking again without resolving returns the same request.
            assert_eq!(search.advance(), SearchStep::NeedsEval);
            search.resolve(&[1.0 / 7.0; 7], 0.0, &mut rng);
            evals += 1;
        }
        assert_eq!(evals, 10);
        assert_eq!(search.simulations_done(), 10);

        let policy = search.policy();
        assert!((policy.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        let total: u32 = search.tree.visit_counts().iter().sum();
        assert_eq!(total, 9);
    }

    #[test]
    fn test_search_finds_immediate_win() {
        let mut game = ConnectFour::initial();
        for m in [0, 6, 1, 6, 2, 5] {
            game.play(m).unwrap();
        }
        let mut rng = StdRng::seed_from_u64(1);
        let mut search = Search::<ConnectFour>::new();
        search
            .run(&game, settings(200), &mut rng, uniform)
            .unwrap();
        assert_eq!(search.choose(0.0, &mut rng), Some(3));
        assert!(search.root_value() > 0.0);
    }

    #[test]
    fn test_root_noise_keeps_priors_normalized() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut search = Search::<ConnectFour>::new();
        let noisy = SearchSettings {
            root_noise: Some((1.0, 0.25)),
            ..settings(1)
        };
        search.run(&ConnectFour::initial(), noisy, &mut rng, uniform).unwrap();
        let priors: f32 = search.tree.nodes[0]
            .children
            .iter()
            .map(|&(_, ci)| search.tree.nodes[ci].prior)
            .sum();
        assert!((priors - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_sample_with_temperature_greedy() {
        let mut rng = StdRng::seed_from_u64(0);
        let counts = [1, 9, 3, 0, 0, 0, 0];
        assert_eq!(sample_with_temperature(&counts, &[0, 1, 2], 0.0, &mut rng), Some(1));
        assert_eq!(sample_with_temperature(&counts, &[], 1.0, &mut rng), None);
    }

    #[test]
    fn test_sample_with_temperature_stays_legal() {
        let mut rng = StdRng::seed_from_u64(11);
        let counts = [5, 5, 5, 5, 5, 5, 5];
        for _ in 0..100 {
            let a = sample_with_temperature(&counts, &[2, 4], 1.0, &mut rng).unwrap();
            assert!(a == 2 || a == 4);
        }
    }
}
