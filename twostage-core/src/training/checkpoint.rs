//! Checkpoint persistence for training runs.

use crate::error::TrainError;
use crate::persistence;
use crate::training::mode::TrainingMode;
use crate::training::params::{ParameterLayout, ParameterStore};
use crate::training::stats::TrainingStats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// A saved weight buffer with the metadata needed to warm-start from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub run_id: String,
    pub experiment: String,
    pub iteration: usize,
    pub mode: TrainingMode,
    pub layout: ParameterLayout,
    /// Stored as base64 little-endian bytes so non-finite values survive.
    #[serde(with = "le_weights")]
    pub weights: Vec<f32>,
    #[serde(default)]
    pub stats: Option<TrainingStats>,
    /// SHA-256 of the little-endian weight bytes.
    pub digest: String,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Read and verify a checkpoint file.
    pub fn load(path: &Path) -> Result<Self, TrainError> {
        let checkpoint: Checkpoint = persistence::read_json(path)?.ok_or_else(|| {
            TrainError::checkpoint(format!("{} does not exist", path.display()))
        })?;
        let digest = weights_digest(&checkpoint.weights);
        if digest != checkpoint.digest {
            return Err(TrainError::checkpoint(format!(
                "{} is corrupt: digest {} does not match recorded {}",
                path.display(),
                digest,
                checkpoint.digest
            )));
        }
        Ok(checkpoint)
    }

    /// Load `path` unless it is absent or empty, which means "no warm start".
    pub fn load_optional(path: Option<&Path>) -> Result<Option<Self>, TrainError> {
        match path {
            Some(p) if !p.as_os_str().is_empty() => Self::load(p).map(Some),
            _ => Ok(None),
        }
    }

    pub fn into_store(self) -> Result<(ParameterStore, Option<TrainingStats>), TrainError> {
        let store = ParameterStore::from_parts(self.layout, self.weights)
            .map_err(|e| TrainError::checkpoint(e.to_string()))?;
        Ok((store, self.stats))
    }
}

pub fn weights_digest(weights: &[f32]) -> String {
    let mut hasher = Sha256::new();
    for w in weights {
        hasher.update(w.to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}

mod le_weights {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(weights: &[f32], serializer: S) -> Result<S::Ok, S::Error> {
        let bytes: Vec<u8> = weights.iter().flat_map(|w| w.to_le_bytes()).collect();
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f32>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = STANDARD.decode(encoded.as_bytes()).map_err(D::Error::custom)?;
        if bytes.len() % 4 != 0 {
            return Err(D::Error::custom(format!(
                "weight payload of {} bytes is not a whole number of f32s",
                bytes.len()
            )));
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }
}

/// Writes `<dir>/<experiment>_<iteration>.json` checkpoints.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    experiment: String,
}

impl CheckpointStore {
    pub fn new(dir: PathBuf, experiment: impl Into<String>) -> Self {
        Self {
            dir,
            experiment: experiment.into(),
        }
    }

    pub fn path_for(&self, iteration: usize) -> PathBuf {
        self.dir
            .join(format!("{}_{:06}.json", self.experiment, iteration))
    }

    pub fn save(
        &self,
        run_id: &str,
        iteration: usize,
        mode: TrainingMode,
        store: &ParameterStore,
        stats: &TrainingStats,
    ) -> Result<PathBuf, TrainError> {
        let checkpoint = Checkpoint {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            experiment: self.experiment.clone(),
            iteration,
            mode,
            layout: store.layout().clone(),
            weights: store.weights().to_vec(),
            stats: Some(stats.clone()),
            digest: weights_digest(store.weights()),
            created_at: Utc::now(),
        };
        let path = self.path_for(iteration);
        persistence::write_json_atomic(&path, &checkpoint)?;
        tracing::info!(iteration, path = %path.display(), "Checkpoint saved");
        Ok(path)
    }

    /// Checkpoints of this experiment on disk, by ascending iteration.
    pub fn list(&self) -> Result<Vec<(usize, PathBuf)>, TrainError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let prefix = format!("{}_", self.experiment);
        let mut found = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let iteration = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix(&prefix))
                .and_then(|n| n.strip_suffix(".json"))
                .and_then(|n| n.parse::<usize>().ok());
            if let Some(iteration) = iteration {
                found.push((iteration, path));
            }
        }
        found.sort_by_key(|(iteration, _)| *iteration);
        Ok(found)
    }

    pub fn latest(&self) -> Result<Option<PathBuf>, TrainError> {
        Ok(self.list()?.pop().map(|(_, path)| path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::stats::LossBreakdown;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use tempfile::TempDir;

    fn sample_stats() -> TrainingStats {
        let mut stats = TrainingStats::new();
        stats.record(&LossBreakdown {
            pnet_cls: 0.5,
            pnet_reg: 0.1,
            cnet_cls: 1.0,
            cnet_reg: 0.2,
        });
        stats
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let ckpts = CheckpointStore::new(dir.path().to_path_buf(), "voc");
        let store = ParameterStore::new(vec![0.25, -0.5], vec![1.5]);

        let path = ckpts
            .save("run-1", 1000, TrainingMode::Both, &store, &sample_stats())
            .unwrap();
        assert_eq!(path, dir.path().join("voc_001000.json"));

        let loaded = Checkpoint::load(&path).unwrap();
        assert_eq!(loaded.iteration, 1000);
        assert_eq!(loaded.mode, TrainingMode::Both);
        let (restored, stats) = loaded.into_store().unwrap();
        assert_eq!(restored, store);
        assert_eq!(stats, Some(sample_stats()));
    }

    #[test]
    fn test_tampered_weights_rejected() {
        let dir = TempDir::new().unwrap();
        let ckpts = CheckpointStore::new(dir.path().to_path_buf(), "voc");
        let store = ParameterStore::new(vec![0.25], vec![1.5]);
        let path = ckpts
            .save("run-1", 5, TrainingMode::OnlyPnet, &store, &TrainingStats::new())
            .unwrap();

        let mut raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let forged: Vec<u8> = 9.0f32.to_le_bytes().to_vec();
        raw["weights"] = serde_json::json!(STANDARD.encode(forged));
        std::fs::write(&path, serde_json::to_string(&raw).unwrap()).unwrap();

        assert!(matches!(Checkpoint::load(&path), Err(TrainError::Checkpoint(_))));
    }

    #[test]
    fn test_diverged_weights_round_trip() {
        let dir = TempDir::new().unwrap();
        let ckpts = CheckpointStore::new(dir.path().to_path_buf(), "voc");
        let store = ParameterStore::new(vec![f32::NAN, 1.0], vec![f32::NEG_INFINITY]);
        let path = ckpts
            .save("run-1", 7, TrainingMode::Both, &store, &TrainingStats::new())
            .unwrap();

        let (restored, _) = Checkpoint::load(&path).unwrap().into_store().unwrap();
        let bits: Vec<u32> = restored.weights().iter().map(|w| w.to_bits()).collect();
        let expected: Vec<u32> = store.weights().iter().map(|w| w.to_bits()).collect();
        assert_eq!(bits, expected);
    }

    #[test]
    fn test_infinite_loss_history_round_trips() {
        let dir = TempDir::new().unwrap();
        let ckpts = CheckpointStore::new(dir.path().to_path_buf(), "voc");
        let mut stats = sample_stats();
        stats.record(&LossBreakdown {
            pnet_cls: f64::INFINITY,
            pnet_reg: f64::NAN,
            cnet_cls: f64::NEG_INFINITY,
            cnet_reg: 0.3,
        });
        let path = ckpts
            .save("run-1", 8, TrainingMode::Both, &ParameterStore::zeros(1, 1), &stats)
            .unwrap();

        let loaded = Checkpoint::load(&path).unwrap().stats.unwrap();
        let last = loaded.last().unwrap();
        assert_eq!(last.pnet_cls, f64::INFINITY);
        assert!(last.pnet_reg.is_nan());
        assert_eq!(last.cnet_cls, f64::NEG_INFINITY);
        assert_eq!(last.cnet_reg, 0.3);
        assert_eq!(loaded.pnet_cls[0], 0.5);
    }

    #[test]
    fn test_truncated_weight_payload_rejected() {
        let dir = TempDir::new().unwrap();
        let ckpts = CheckpointStore::new(dir.path().to_path_buf(), "voc");
        let store = ParameterStore::zeros(1, 1);
        let path = ckpts
            .save("r", 1, TrainingMode::Both, &store, &TrainingStats::new())
            .unwrap();

        let mut raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        raw["weights"] = serde_json::json!(STANDARD.encode([0u8; 6]));
        std::fs::write(&path, serde_json::to_string(&raw).unwrap()).unwrap();

        assert!(matches!(Checkpoint::load(&path), Err(TrainError::Serde(_))));
    }

    #[test]
    fn test_missing_or_empty_path_is_no_warm_start() {
        assert!(Checkpoint::load_optional(None).unwrap().is_none());
        assert!(Checkpoint::load_optional(Some(Path::new(""))).unwrap().is_none());
    }

    #[test]
    fn test_nonexistent_file_is_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(Checkpoint::load_optional(Some(&missing)).is_err());
    }

    #[test]
    fn test_list_and_latest() {
        let dir = TempDir::new().unwrap();
        let ckpts = CheckpointStore::new(dir.path().to_path_buf(), "voc");
        let store = ParameterStore::zeros(1, 1);
        for iteration in [200, 50, 1000] {
            ckpts
                .save("r", iteration, TrainingMode::Both, &store, &TrainingStats::new())
                .unwrap();
        }
        std::fs::write(dir.path().join("other_000010.json"), "{}").unwrap();

        let iterations: Vec<usize> = ckpts.list().unwrap().into_iter().map(|(i, _)| i).collect();
        assert_eq!(iterations, vec![50, 200, 1000]);
        assert_eq!(ckpts.latest().unwrap(), Some(dir.path().join("voc_001000.json")));
    }
}
