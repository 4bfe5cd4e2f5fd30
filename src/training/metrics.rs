use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use log::{info, warn};

use crate::error::MetricsError;
use crate::training::dashboard_msg::TrainingUpdate;

/// Destination for scalar training metrics.
pub trait MetricsSink {
    fn scalar(&mut self, key: &str, value: f32, iteration: usize) -> Result<(), MetricsError>;
}

/// Appends `iteration,key,value` rows to `<dir>/<run_name>.csv`.
pub struct CsvMetricsSink {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl CsvMetricsSink {
    pub fn create(dir: &Path, run_name: &str) -> Result<Self, MetricsError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{run_name}.csv"));
        let fresh = !path.exists();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        // Header only for a new file; resumed runs keep appending rows.
        if fresh {
            writer.write_record(["iteration", "key", "value"])?;
            writer.flush()?;
        }
        Ok(CsvMetricsSink { path, writer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricsSink for CsvMetricsSink {
    fn scalar(&mut self, key: &str, value: f32, iteration: usize) -> Result<(), MetricsError> {
        self.writer
            .write_record([iteration.to_string(), key.to_string(), value.to_string()])?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Logs every scalar at info level.
#[derive(Debug, Default)]
pub struct LogMetricsSink;

impl MetricsSink for LogMetricsSink {
    fn scalar(&mut self, key: &str, value: f32, iteration: usize) -> Result<(), MetricsError> {
        info!("[iter {iteration}] {key} = {value:.4}");
        Ok(())
    }
}

/// Forwards scalars to the dashboard thread.
pub struct ChannelMetricsSink {
    tx: mpsc::Sender<TrainingUpdate>,
}

impl ChannelMetricsSink {
    pub fn new(tx: mpsc::Sender<TrainingUpdate>) -> Self {
        ChannelMetricsSink { tx }
    }
}

impl MetricsSink for ChannelMetricsSink {
    fn scalar(&mut self, key: &str, value: f32, iteration: usize) -> Result<(), MetricsError> {
        self.tx
            .send(TrainingUpdate::Metric {
                iteration,
                key: key.to_string(),
                value,
            })
            .map_err(|_| MetricsError::Closed)
    }
}

/// Keeps every scalar in memory; clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct MemoryMetricsSink {
    records: Arc<Mutex<Vec<(String, f32, usize)>>>,
}

impl MemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(key, value, iteration)` in the order they were recorded.
    pub fn records(&self) -> Vec<(String, f32, usize)> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Values recorded under `key`, with their iterations.
    pub fn values(&self, key: &str) -> Vec<(usize, f32)> {
        self.records()
            .into_iter()
            .filter(|(k, _, _)| k == key)
            .map(|(_, v, i)| (i, v))
            .collect()
    }
}

impl MetricsSink for MemoryMetricsSink {
    fn scalar(&mut self, key: &str, value: f32, iteration: usize) -> Result<(), MetricsError> {
        let mut records = self.records.lock().map_err(|_| MetricsError::Closed)?;
        records.push((key.to_string(), value, iteration));
        Ok(())
    }
}

/// Sends each scalar to every inner sink. A failing sink is logged and
/// skipped so the others still see the value.
#[derive(Default)]
pub struct FanOutMetricsSink {
    sinks: Vec<Box<dyn MetricsSink + Send>>,
}

impl FanOutMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl MetricsSink + Send + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl MetricsSink for FanOutMetricsSink {
    fn scalar(&mut self, key: &str, value: f32, iteration: usize) -> Result<(), MetricsError> {
        for sink in &mut self.sinks {
            if let Err(e) = sink.scalar(key, value, iteration) {
                warn!("metrics sink failed on {key}: {e}");
            }
        }
        Ok(())
    }
}
