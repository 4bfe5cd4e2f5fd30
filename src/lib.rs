//! # selfplay-coach
//!
//! Iterative self-play training for board game agents. Many worker threads
//! run tree-search self-play at once while one coordinator batches their
//! network evaluations; each iteration then trains on recent data and gates
//! the new model behind an arena match against an earlier checkpoint.
//!
//! ## Modules
//!
//! - [`batching`] — Slot protocol, inference batcher, scoped worker pool
//! - [`selfplay`] — Self-play workers and episode sinks
//! - [`coach`] — Iteration controller and model gating
//! - [`arena`] — Head-to-head evaluation, sequential or batched
//! - [`ai`] — Network trait, batched PUCT search, burn network
//! - [`game`] — Game trait and Connect Four
//! - [`training`] — Sample shards and metrics sinks
//! - [`checkpoint`] — Network snapshots by iteration
//! - [`ui`] — Terminal training dashboard
//! - [`config`] — TOML configuration loading and validation
//! - [`error`] — Structured error types

#![recursion_limit = "256"]

pub mod ai;
pub mod arena;
pub mod batching;
pub mod checkpoint;
pub mod coach;
pub mod config;
pub mod error;
pub mod game;
pub mod selfplay;
pub mod training;
pub mod ui;
