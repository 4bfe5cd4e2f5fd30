use std::fmt;
use std::ops::RangeInclusive;

use crate::config::GatingConfig;

/// Where the controller is within one loop pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    SelfPlay,
    Persist,
    Train,
    EvaluateRandom,
    EvaluatePast,
    Gate,
    Advance,
    Rollback,
}

impl Phase {
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::SelfPlay => "self-play",
            Phase::Persist => "persist",
            Phase::Train => "train",
            Phase::EvaluateRandom => "vs random",
            Phase::EvaluatePast => "vs past",
            Phase::Gate => "gate",
            Phase::Advance => "advance",
            Phase::Rollback => "rollback",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of the gating step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Accepted,
    /// Below threshold, but the consecutive-rejection bound was reached.
    Forced,
    Rejected,
}

impl GateDecision {
    pub fn advances(&self) -> bool {
        !matches!(self, GateDecision::Rejected)
    }
}

impl fmt::Display for GateDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GateDecision::Accepted => "accepted",
            GateDecision::Forced => "forced",
            GateDecision::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Loop state carried across passes.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationState {
    /// Iteration number of the model being produced. Only advances on acceptance.
    pub current_iter: usize,
    /// Consecutive rejections so far.
    pub gating_counter: usize,
    pub warmup: bool,
    pub expert_value_weight: f32,
    /// Loop passes started, counting from 1; never rewinds.
    pub attempt: usize,
}

impl IterationState {
    pub fn new(current_iter: usize, expert_value_weight: f32) -> Self {
        IterationState {
            current_iter,
            gating_counter: 0,
            warmup: false,
            expert_value_weight,
            attempt: 1,
        }
    }
}

/// Gate on the past-comparison win rate. `None` (no comparison this pass)
/// always accepts.
pub fn gate_decision(cfg: &GatingConfig, win_rate: Option<f32>, gating_counter: usize) -> GateDecision {
    let Some(win_rate) = win_rate else {
        return GateDecision::Accepted;
    };
    if !cfg.model_gating || win_rate >= cfg.min_next_model_winrate || cfg.max_gating_iters == 0 {
        return GateDecision::Accepted;
    }
    if gating_counter < cfg.max_gating_iters {
        GateDecision::Rejected
    } else {
        GateDecision::Forced
    }
}

/// Shards that feed the training phase of iteration `i`.
pub fn train_window(iteration: usize, history: usize) -> RangeInclusive<usize> {
    let size = ((iteration + 4) / 2).max(4).min(history);
    iteration.saturating_sub(size).max(1)..=iteration
}

/// Checkpoint the past comparison plays against.
pub fn past_iteration(iteration: usize, past_compare_freq: usize) -> usize {
    iteration.saturating_sub(past_compare_freq)
}

/// Whether a comparison with period `freq` runs on pass `attempt`.
pub fn compare_due(attempt: usize, freq: usize) -> bool {
    freq > 0 && attempt.saturating_sub(1) % freq == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gating(max: usize) -> GatingConfig {
        GatingConfig {
            model_gating: true,
            max_gating_iters: max,
            min_next_model_winrate: 0.52,
        }
    }

    #[test]
    fn test_gate_rejects_below_threshold() {
        assert_eq!(gate_decision(&gating(3), Some(0.40), 0), GateDecision::Rejected);
        assert_eq!(gate_decision(&gating(3), Some(0.40), 2), GateDecision::Rejected);
    }

    #[test]
    fn test_gate_forces_at_bound() {
        assert_eq!(gate_decision(&gating(3), Some(0.40), 3), GateDecision::Forced);
    }

    #[test]
    fn test_gate_accepts_regardless_of_counter() {
        for counter in 0..5 {
            assert_eq!(gate_decision(&gating(3), Some(0.52), counter), GateDecision::Accepted);
            assert_eq!(gate_decision(&gating(3), Some(0.9), counter), GateDecision::Accepted);
        }
    }

    #[test]
    fn test_gate_disabled() {
        assert_eq!(gate_decision(&gating(0), Some(0.1), 0), GateDecision::Accepted);
        let mut cfg = gating(3);
        cfg.model_gating = false;
        assert_eq!(gate_decision(&cfg, Some(0.1), 0), GateDecision::Accepted);
        assert_eq!(gate_decision(&gating(3), None, 0), GateDecision::Accepted);
    }

    #[test]
    fn test_train_window() {
        assert_eq!(train_window(2, 10), 1..=2);
        assert_eq!(train_window(1, 10), 1..=1);
        assert_eq!(train_window(10, 10), 3..=10);
        assert_eq!(train_window(30, 10), 20..=30);
        assert_eq!(train_window(8, 2), 6..=8);
    }

    #[test]
    fn test_past_iteration_and_schedule() {
        assert_eq!(past_iteration(1, 1), 0);
        assert_eq!(past_iteration(5, 2), 3);
        assert_eq!(past_iteration(1, 4), 0);
        assert!(compare_due(1, 3));
        assert!(!compare_due(2, 3));
        assert!(compare_due(4, 3));
    }

    #[test]
    fn test_phase_labels() {
        assert_eq!(Phase::SelfPlay.to_string(), "self-play");
        assert!(GateDecision::Forced.advances());
        assert!(!GateDecision::Rejected.advances());
    }
}
