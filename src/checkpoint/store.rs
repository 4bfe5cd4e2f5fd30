use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info};

use crate::ai::Network;
use crate::checkpoint::metadata::{CheckpointMetadata, CheckpointMetrics};
use crate::error::CheckpointError;

const METADATA_FILE: &str = "metadata.json";

/// Persistent network snapshots addressed by iteration number.
pub trait CheckpointStore {
    fn save(&self, iteration: usize, network: &dyn Network, metrics: &CheckpointMetrics) -> Result<(), CheckpointError>;

    fn load(&self, iteration: usize, network: &mut dyn Network) -> Result<(), CheckpointError>;

    fn exists(&self, iteration: usize) -> bool;

    fn delete(&self, iteration: usize) -> Result<(), CheckpointError>;

    /// Highest saved iteration, if any.
    fn latest(&self) -> Result<Option<usize>, CheckpointError>;
}

/// Checkpoints as `<dir>/iteration_NNNN/` holding the network files and
/// `metadata.json`. Each one is written to a `.tmp` sibling and renamed
/// into place.
#[derive(Debug, Clone)]
pub struct DirCheckpointStore {
    dir: PathBuf,
}

impl DirCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DirCheckpointStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, iteration: usize) -> PathBuf {
        self.dir.join(dir_name(iteration))
    }

    pub fn metadata(&self, iteration: usize) -> Result<CheckpointMetadata, CheckpointError> {
        let meta_path = self.path(iteration).join(METADATA_FILE);
        let meta_json = fs::read_to_string(&meta_path).map_err(|e| CheckpointError::MetadataRead {
            path: meta_path.clone(),
            source: e,
        })?;
        serde_json::from_str(&meta_json).map_err(|e| CheckpointError::MetadataParse {
            path: meta_path,
            source: e,
        })
    }

    /// Saved iterations, ascending.
    pub fn list(&self) -> Result<Vec<usize>, CheckpointError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut iterations = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() || !path.join(METADATA_FILE).exists() {
                continue;
            }
            let name = entry.file_name();
            if let Some(iteration) = parse_dir_name(&name.to_string_lossy()) {
                iterations.push(iteration);
            }
        }
        iterations.sort_unstable();
        Ok(iterations)
    }
}

fn dir_name(iteration: usize) -> String {
    format!("iteration_{:04}", iteration)
}

fn parse_dir_name(name: &str) -> Option<usize> {
    name.strip_prefix("iteration_")?.parse().ok()
}

impl CheckpointStore for DirCheckpointStore {
    fn save(&self, iteration: usize, network: &dyn Network, metrics: &CheckpointMetrics) -> Result<(), CheckpointError> {
        let final_dir = self.path(iteration);
        let tmp_dir = self.dir.join(format!("{}.tmp", dir_name(iteration)));
        if tmp_dir.exists() {
            fs::remove_dir_all(&tmp_dir)?;
        }
        fs::create_dir_all(&tmp_dir)?;

        network.save(&tmp_dir).map_err(CheckpointError::ModelSave)?;

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let metadata = CheckpointMetadata {
            iteration,
            timestamp,
            metrics: metrics.clone(),
        };
        fs::write(tmp_dir.join(METADATA_FILE), serde_json::to_string_pretty(&metadata)?)?;

        // Atomic rename
        if final_dir.exists() {
            fs::remove_dir_all(&final_dir)?;
        }
        fs::rename(&tmp_dir, &final_dir)?;
        info!("saved checkpoint {}", final_dir.display());
        Ok(())
    }

    fn load(&self, iteration: usize, network: &mut dyn Network) -> Result<(), CheckpointError> {
        if !self.exists(iteration) {
            return Err(CheckpointError::NotFound(iteration));
        }
        network
            .load(&self.path(iteration))
            .map_err(CheckpointError::ModelLoad)?;
        debug!("loaded checkpoint {}", iteration);
        Ok(())
    }

    fn exists(&self, iteration: usize) -> bool {
        self.path(iteration).join(METADATA_FILE).exists()
    }

    fn delete(&self, iteration: usize) -> Result<(), CheckpointError> {
        let path = self.path(iteration);
        if !path.exists() {
            return Err(CheckpointError::NotFound(iteration));
        }
        fs::remove_dir_all(&path)?;
        info!("deleted checkpoint {}", path.display());
        Ok(())
    }

    fn latest(&self) -> Result<Option<usize>, CheckpointError> {
        Ok(self.list()?.last().copied())
    }
}
