use crate::coach::{GateDecision, Phase};

/// Updates sent from the training thread to the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingUpdate {
    IterationStarted {
        iteration: usize,
        attempt: usize,
        warmup: bool,
    },
    Phase {
        iteration: usize,
        phase: Phase,
    },
    SelfPlayProgress {
        completed: usize,
        total: usize,
    },
    Metric {
        iteration: usize,
        key: String,
        value: f32,
    },
    Gate {
        iteration: usize,
        decision: GateDecision,
    },
    Finished,
    Failed(String),
}
