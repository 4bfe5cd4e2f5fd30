//! Terminal UI: a live training dashboard with arena and loss charts,
//! self-play progress and gating status.

pub mod training_dashboard;
pub mod training_view;
