//! Training data and telemetry: per-iteration sample shards, metrics sinks,
//! and dashboard message types for live TUI updates.

pub mod dashboard_msg;
pub mod metrics;
pub mod shard;

pub use dashboard_msg::TrainingUpdate;
pub use metrics::{
    ChannelMetricsSink, CsvMetricsSink, FanOutMetricsSink, LogMetricsSink, MemoryMetricsSink,
    MetricsSink,
};
pub use shard::{DirShardStore, IterationShard, Sample, ShardStore};
