use std::collections::VecDeque;

use crate::coach::{GateDecision, Phase};
use crate::training::TrainingUpdate;

const MAX_HISTORY: usize = 500;

/// Status of the training run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainingStatus {
    Running,
    /// Quit requested; the controller stops after the current pass.
    Stopping,
    Finished,
    Failed(String),
}

/// Dashboard state holding history buffers and current values.
pub struct DashboardState {
    // History buffers: (iteration, value)
    pub random_history: VecDeque<(f64, f64)>,
    pub past_history: VecDeque<(f64, f64)>,
    pub loss_history: VecDeque<(f64, f64)>,
    pub policy_loss_history: VecDeque<(f64, f64)>,
    pub value_loss_history: VecDeque<(f64, f64)>,

    // Current values
    pub iteration: usize,
    pub total_iterations: usize,
    pub attempt: usize,
    pub warmup: bool,
    pub phase: Phase,
    pub games_completed: usize,
    pub games_total: usize,
    pub draw_rate: Option<f32>,
    pub model_version: Option<usize>,

    // Gating
    pub last_gate: Option<(usize, GateDecision)>,
    pub rejections: usize,
    pub forced: usize,

    pub status: TrainingStatus,
}

fn push_capped(history: &mut VecDeque<(f64, f64)>, point: (f64, f64)) {
    history.push_back(point);
    if history.len() > MAX_HISTORY {
        history.pop_front();
    }
}

impl DashboardState {
    pub fn new(total_iterations: usize) -> Self {
        DashboardState {
            random_history: VecDeque::new(),
            past_history: VecDeque::new(),
            loss_history: VecDeque::new(),
            policy_loss_history: VecDeque::new(),
            value_loss_history: VecDeque::new(),

            iteration: 0,
            total_iterations,
            attempt: 0,
            warmup: false,
            phase: Phase::Idle,
            games_completed: 0,
            games_total: 0,
            draw_rate: None,
            model_version: None,

            last_gate: None,
            rejections: 0,
            forced: 0,

            status: TrainingStatus::Running,
        }
    }

    /// Apply one update from the training thread.
    pub fn apply(&mut self, update: TrainingUpdate) {
        match update {
            TrainingUpdate::IterationStarted {
                iteration,
                attempt,
                warmup,
            } => {
                self.iteration = iteration;
                self.attempt = attempt;
                self.warmup = warmup;
                self.games_completed = 0;
            }
            TrainingUpdate::Phase { iteration, phase } => {
                self.iteration = iteration;
                self.phase = phase;
            }
            TrainingUpdate::SelfPlayProgress { completed, total } => {
                self.games_completed = completed;
                self.games_total = total;
            }
            TrainingUpdate::Metric {
                iteration,
                key,
                value,
            } => self.apply_metric(iteration, &key, value),
            TrainingUpdate::Gate { iteration, decision } => {
                match decision {
                    GateDecision::Rejected => self.rejections += 1,
                    GateDecision::Forced => self.forced += 1,
                    GateDecision::Accepted => {}
                }
                self.last_gate = Some((iteration, decision));
            }
            TrainingUpdate::Finished => self.status = TrainingStatus::Finished,
            TrainingUpdate::Failed(message) => self.status = TrainingStatus::Failed(message),
        }
    }

    fn apply_metric(&mut self, iteration: usize, key: &str, value: f32) {
        let point = (iteration as f64, value as f64);
        match key {
            "win_rate/random" => push_capped(&mut self.random_history, point),
            "win_rate/past" => push_capped(&mut self.past_history, point),
            "loss/total" => push_capped(&mut self.loss_history, point),
            "loss/policy" => push_capped(&mut self.policy_loss_history, point),
            "loss/value" => push_capped(&mut self.value_loss_history, point),
            "win_rate/draws" => self.draw_rate = Some(value),
            "win_rate/model_version" => self.model_version = Some(value as usize),
            _ => {}
        }
    }

    pub fn request_stop(&mut self) {
        if self.status == TrainingStatus::Running {
            self.status = TrainingStatus::Stopping;
        }
    }

    /// Self-play progress ratio [0.0, 1.0].
    pub fn selfplay_progress(&self) -> f64 {
        if self.games_total == 0 {
            return 0.0;
        }
        (self.games_completed as f64 / self.games_total as f64).min(1.0)
    }

    /// Iteration progress ratio [0.0, 1.0].
    pub fn progress(&self) -> f64 {
        if self.total_iterations == 0 {
            return 0.0;
        }
        (self.iteration.saturating_sub(1) as f64 / self.total_iterations as f64).min(1.0)
    }

    pub fn latest(history: &VecDeque<(f64, f64)>) -> Option<f64> {
        history.back().map(|&(_, v)| v)
    }
}
