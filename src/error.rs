use std::path::PathBuf;

/// Errors that can occur during checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint for iteration {0} not found")]
    NotFound(usize),

    #[error("failed to read metadata from {path}: {source}")]
    MetadataRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse metadata from {path}: {source}")]
    MetadataParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to save network: {0}")]
    ModelSave(#[source] NetworkError),

    #[error("failed to load network: {0}")]
    ModelLoad(#[source] NetworkError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while persisting or reading iteration shards.
#[derive(Debug, thiserror::Error)]
pub enum ShardError {
    #[error("shard for iteration {0} is missing")]
    Missing(usize),

    #[error("shard file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("shard arrays disagree on row count: {observations} observations, {policies} policies, {values} values")]
    RowMismatch {
        observations: usize,
        policies: usize,
        values: usize,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a network implementation.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("expected {expected} input values, got {actual}")]
    InputShape { expected: usize, actual: usize },

    #[error("no training samples in window")]
    EmptyWindow,

    #[error("non-finite loss after {step} steps")]
    NonFiniteLoss { step: usize },

    #[error("backend error: {0}")]
    Backend(String),

    #[error("record error: {0}")]
    Record(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by the batched inference protocol.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("evaluation of slot {slot} failed: {source}")]
    Evaluation {
        slot: usize,
        #[source]
        source: NetworkError,
    },

    #[error("slot {slot}: evaluation returned {actual} {what} values, expected {expected}")]
    ShapeMismatch {
        slot: usize,
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("slot {0} is already waiting on the coordinator")]
    SlotInFlight(usize),

    #[error("batch coordinator stopped before answering slot {0}")]
    Aborted(usize),

    #[error("worker {0} panicked")]
    WorkerPanicked(usize),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("game error in worker {worker}: {message}")]
    Game { worker: usize, message: String },
}

/// Errors raised while playing arena matches.
#[derive(Debug, thiserror::Error)]
pub enum ArenaError {
    #[error("arena needs one player per seat ({expected}), got {actual}")]
    PlayerCount { expected: usize, actual: usize },

    #[error("no legal action for the player to move")]
    NoLegalAction,

    #[error("player {player} selected illegal action {action}")]
    IllegalAction { player: usize, action: usize },

    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("batched arena failed: {0}")]
    Batch(#[from] BatchError),
}

/// Errors raised by a metrics sink. Never fatal to training.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("metrics sink closed")]
    Closed,

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    Validation(String),
}

/// Errors that abort the iteration loop.
#[derive(Debug, thiserror::Error)]
pub enum CoachError {
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("shard error: {0}")]
    Shard(#[from] ShardError),

    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("self-play failed: {0}")]
    Batch(#[from] BatchError),

    #[error("arena error: {0}")]
    Arena(#[from] ArenaError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_error_display() {
        let err = CheckpointError::NotFound(7);
        assert_eq!(err.to_string(), "checkpoint for iteration 7 not found");
    }

    #[test]
    fn test_batch_error_display() {
        let err = BatchError::ShapeMismatch {
            slot: 3,
            what: "policy",
            expected: 56,
            actual: 7,
        };
        assert_eq!(
            err.to_string(),
            "slot 3: evaluation returned 7 policy values, expected 56"
        );
    }

    #[test]
    fn test_coach_error_wraps_shard_error() {
        let err: CoachError = ShardError::Missing(2).into();
        assert_eq!(err.to_string(), "shard error: shard for iteration 2 is missing");
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Validation("selfplay.workers must be > 0".to_string());
        assert_eq!(
            err.to_string(),
            "config validation error: selfplay.workers must be > 0"
        );
    }
}
