//! Durable file helpers shared by checkpoints, summaries and reports.
//!
//! Every write goes to a `.partial` sibling which is synced and then renamed
//! over the target, so an interrupted run leaves the previous file intact.

use crate::error::TrainError;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

/// Replace `path` with `data`, creating parent directories as needed.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<(), TrainError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let partial = partial_path(path);
    {
        let mut file = File::create(&partial)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    std::fs::rename(&partial, path)?;
    Ok(())
}

/// Serialize `data` as pretty JSON and replace `path` with it.
pub fn write_json_atomic<T: serde::Serialize>(path: &Path, data: &T) -> Result<(), TrainError> {
    let json = serde_json::to_vec_pretty(data)?;
    write_atomic(path, &json)
}

/// Read a JSON document. A missing file is `Ok(None)`.
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, TrainError> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = std::fs::read(path)?;
    Ok(Some(serde_json::from_slice(&bytes)?))
}
