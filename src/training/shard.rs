use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info};

use crate::error::ShardError;

const MAGIC: &[u8; 4] = b"SPSH";
/// Magic tag plus the `rows` and `width` fields.
const HEADER_LEN: u64 = 4 + 8 + 8;

/// One training sample: observation, policy target, value target.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub observation: Vec<f32>,
    pub policy: Vec<f32>,
    pub value: f32,
}

/// All samples of one iteration as three row-aligned arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationShard {
    observations: Vec<f32>,
    policies: Vec<f32>,
    values: Vec<f32>,
    observation_size: usize,
    action_size: usize,
}

impl IterationShard {
    pub fn new(observation_size: usize, action_size: usize) -> Self {
        IterationShard {
            observations: Vec::new(),
            policies: Vec::new(),
            values: Vec::new(),
            observation_size,
            action_size,
        }
    }

    /// Build a shard from flat arrays, checking that they describe the same rows.
    pub fn from_parts(
        observations: Vec<f32>,
        observation_size: usize,
        policies: Vec<f32>,
        action_size: usize,
        values: Vec<f32>,
    ) -> Result<Self, ShardError> {
        let obs_rows = observations.len() / observation_size.max(1);
        let policy_rows = policies.len() / action_size.max(1);
        if obs_rows != values.len()
            || policy_rows != values.len()
            || observations.len() % observation_size.max(1) != 0
            || policies.len() % action_size.max(1) != 0
        {
            return Err(ShardError::RowMismatch {
                observations: obs_rows,
                policies: policy_rows,
                values: values.len(),
            });
        }
        Ok(IterationShard {
            observations,
            policies,
            values,
            observation_size,
            action_size,
        })
    }

    pub fn push(&mut self, sample: &Sample) {
        debug_assert_eq!(sample.observation.len(), self.observation_size);
        debug_assert_eq!(sample.policy.len(), self.action_size);
        self.observations.extend_from_slice(&sample.observation);
        self.policies.extend_from_slice(&sample.policy);
        self.values.push(sample.value);
    }

    pub fn extend<'a>(&mut self, samples: impl IntoIterator<Item = &'a Sample>) {
        for sample in samples {
            self.push(sample);
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn observation_size(&self) -> usize {
        self.observation_size
    }

    pub fn action_size(&self) -> usize {
        self.action_size
    }

    pub fn observation(&self, row: usize) -> &[f32] {
        let n = self.observation_size;
        &self.observations[row * n..(row + 1) * n]
    }

    pub fn policy(&self, row: usize) -> &[f32] {
        let n = self.action_size;
        &self.policies[row * n..(row + 1) * n]
    }

    pub fn value(&self, row: usize) -> f32 {
        self.values[row]
    }
}

/// Persistence for iteration shards.
pub trait ShardStore {
    fn write_shard(&self, iteration: usize, shard: &IterationShard) -> Result<(), ShardError>;
    fn read_shard(&self, iteration: usize) -> Result<IterationShard, ShardError>;
    fn exists(&self, iteration: usize) -> bool;
}

/// Stores each shard as three binary files (`data`, `policy`, `value`) under one directory.
pub struct DirShardStore {
    dir: PathBuf,
}

impl DirShardStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, ShardError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(DirShardStore { dir })
    }

    fn path(&self, iteration: usize, part: &str) -> PathBuf {
        self.dir.join(format!("iteration_{:04}-{}.bin", iteration, part))
    }
}

impl ShardStore for DirShardStore {
    fn write_shard(&self, iteration: usize, shard: &IterationShard) -> Result<(), ShardError> {
        let parts: [(&str, &[f32], usize); 3] = [
            ("data", shard.observations.as_slice(), shard.observation_size),
            ("policy", shard.policies.as_slice(), shard.action_size),
            ("value", shard.values.as_slice(), 1),
        ];
        for (part, values, width) in parts {
            write_array(&self.path(iteration, part), shard.len(), width, values)?;
        }
        info!(
            "wrote shard {} ({} samples) to {}",
            iteration,
            shard.len(),
            self.dir.display()
        );
        Ok(())
    }

    fn read_shard(&self, iteration: usize) -> Result<IterationShard, ShardError> {
        if !self.exists(iteration) {
            return Err(ShardError::Missing(iteration));
        }
        let (obs_rows, obs_width, observations) = read_array(&self.path(iteration, "data"))?;
        let (policy_rows, action_width, policies) = read_array(&self.path(iteration, "policy"))?;
        let (value_rows, _, values) = read_array(&self.path(iteration, "value"))?;
        if obs_rows != policy_rows || obs_rows != value_rows {
            return Err(ShardError::RowMismatch {
                observations: obs_rows,
                policies: policy_rows,
                values: value_rows,
            });
        }
        debug!("read shard {} ({} samples)", iteration, obs_rows);
        IterationShard::from_parts(observations, obs_width, policies, action_width, values)
    }

    fn exists(&self, iteration: usize) -> bool {
        ["data", "policy", "value"]
            .iter()
            .all(|part| self.path(iteration, part).is_file())
    }
}

/// Writes `MAGIC | rows: u64 | width: u64 | rows * width f32`, all little-endian.
fn write_array(path: &Path, rows: usize, width: usize, values: &[f32]) -> Result<(), ShardError> {
    let tmp = path.with_extension("bin.tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        writer.write_all(MAGIC)?;
        writer.write_u64::<LittleEndian>(rows as u64)?;
        writer.write_u64::<LittleEndian>(width as u64)?;
        for &v in values {
            writer.write_f32::<LittleEndian>(v)?;
        }
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_array(path: &Path) -> Result<(usize, usize, Vec<f32>), ShardError> {
    let corrupt = |reason: &str| ShardError::Corrupt {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(corrupt("bad magic"));
    }
    let rows = reader.read_u64::<LittleEndian>()? as usize;
    let width = reader.read_u64::<LittleEndian>()? as usize;
    let count = rows
        .checked_mul(width)
        .ok_or_else(|| corrupt("header overflows"))?;
    // Validate the header against the file before allocating for it.
    let payload = (count as u64)
        .checked_mul(4)
        .ok_or_else(|| corrupt("header overflows"))?;
    if file_len.checked_sub(HEADER_LEN) != Some(payload) {
        return Err(corrupt("payload length does not match header"));
    }
    let mut values = vec![0.0f32; count];
    reader
        .read_f32_into::<LittleEndian>(&mut values)
        .map_err(|_| corrupt("truncated payload"))?;
    Ok((rows, width, values))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(tag: f32) -> Sample {
        Sample {
            observation: vec![tag, tag + 0.5, -tag],
            policy: vec![0.25, 0.75],
            value: tag / 10.0,
        }
    }

    #[test]
    fn test_shard_roundtrip_preserves_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirShardStore::new(dir.path()).unwrap();
        let samples: Vec<Sample> = (0..5).map(|i| sample(i as f32)).collect();
        let mut shard = IterationShard::new(3, 2);
        shard.extend(&samples);

        store.write_shard(3, &shard).unwrap();
        assert!(store.exists(3));
        let back = store.read_shard(3).unwrap();

        assert_eq!(back.len(), 5);
        assert_eq!(back, shard);
        for (row, s) in samples.iter().enumerate() {
            assert_eq!(back.observation(row), s.observation.as_slice());
            assert_eq!(back.policy(row), s.policy.as_slice());
            assert_eq!(back.value(row), s.value);
        }
    }

    #[test]
    fn test_empty_shard_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirShardStore::new(dir.path()).unwrap();
        store.write_shard(1, &IterationShard::new(4, 7)).unwrap();
        let back = store.read_shard(1).unwrap();
        assert!(back.is_empty());
        assert_eq!(back.observation_size(), 4);
        assert_eq!(back.action_size(), 7);
    }

    #[test]
    fn test_missing_shard_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirShardStore::new(dir.path()).unwrap();
        assert!(!store.exists(9));
        assert!(matches!(store.read_shard(9), Err(ShardError::Missing(9))));
    }

    #[test]
    fn test_corrupt_magic_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirShardStore::new(dir.path()).unwrap();
        let mut shard = IterationShard::new(3, 2);
        shard.push(&sample(1.0));
        store.write_shard(2, &shard).unwrap();
        fs::write(store.path(2, "policy"), b"nope").unwrap();
        assert!(matches!(
            store.read_shard(2),
            Err(ShardError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_oversized_header_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirShardStore::new(dir.path()).unwrap();
        let mut shard = IterationShard::new(3, 2);
        shard.push(&sample(1.0));
        store.write_shard(4, &shard).unwrap();

        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.write_u64::<LittleEndian>(1 << 40).unwrap();
        bytes.write_u64::<LittleEndian>(1).unwrap();
        bytes.write_f32::<LittleEndian>(0.5).unwrap();
        fs::write(store.path(4, "value"), bytes).unwrap();

        assert!(matches!(
            store.read_shard(4),
            Err(ShardError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_from_parts_rejects_mismatch() {
        let err = IterationShard::from_parts(vec![0.0; 6], 3, vec![0.5; 2], 2, vec![0.0, 1.0])
            .unwrap_err();
        assert!(matches!(err, ShardError::RowMismatch { .. }));
    }
}
