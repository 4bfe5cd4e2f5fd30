use serde::{Deserialize, Serialize};

use crate::ai::TrainLoss;

/// Metrics snapshot at checkpoint time. Arena win rates are produced after
/// the checkpoint is written and only go to the metrics sinks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetrics {
    /// Losses of the training phase that produced the checkpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss: Option<TrainLoss>,
    /// Samples in the shard generated for this iteration.
    #[serde(default)]
    pub samples: usize,
}

/// Top-level checkpoint metadata written to metadata.json.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub iteration: usize,
    pub timestamp: u64,
    pub metrics: CheckpointMetrics,
}
