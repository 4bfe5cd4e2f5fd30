//! The outer training loop and its model-gating state machine.

mod controller;
mod state;

pub use controller::IterationController;
pub use state::{
    compare_due, gate_decision, past_iteration, train_window, GateDecision, IterationState, Phase,
};
