//! Versioned network snapshots, one directory per iteration.

mod metadata;
mod store;

pub use metadata::{CheckpointMetadata, CheckpointMetrics};
pub use store::{CheckpointStore, DirCheckpointStore};
