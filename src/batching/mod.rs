//! Batched inference: workers stage observation rows into their own slot,
//! hand the slot to a single coordinator that evaluates it in one network
//! call, and block until the outputs come back.

mod batcher;
mod pool;
mod slot;

pub use batcher::{BatchStats, InferenceBatcher};
pub use pool::{derive_seed, run_pool, split_games};
pub use slot::{Progress, Ready, SlotBuffers, SlotHandle, SlotSet, WorkerFinishGuard};
