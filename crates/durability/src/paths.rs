//! Checkpoint file naming
//!
//! One file per (time step, partition), named `ckpt-SSSSSS-pPPPP.rd`.

use std::path::{Path, PathBuf};

/// File extension of checkpoint files
pub const CHECKPOINT_EXTENSION: &str = "rd";

const PREFIX: &str = "ckpt-";

/// A checkpoint file found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointFile {
    /// Time step the checkpoint was taken at
    pub step: u64,
    /// Partition that wrote it
    pub partition: u32,
    /// Full path
    pub path: PathBuf,
}

/// Generate checkpoint file path
///
/// Step and partition are zero-padded to 6 and 4 digits; larger values
/// simply widen the name.
pub fn checkpoint_path(dir: &Path, step: u64, partition: u32) -> PathBuf {
    dir.join(format!(
        "{}{:06}-p{:04}.{}",
        PREFIX, step, partition, CHECKPOINT_EXTENSION
    ))
}

/// Parse `(step, partition)` from a file name
///
/// Returns None if the file name doesn't match the expected format.
pub fn parse_checkpoint_name(file_name: &str) -> Option<(u64, u32)> {
    let stem = file_name
        .strip_prefix(PREFIX)?
        .strip_suffix(CHECKPOINT_EXTENSION)?
        .strip_suffix('.')?;
    let (step, partition) = stem.split_once("-p")?;
    if step.is_empty() || !step.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if partition.is_empty() || !partition.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((step.parse().ok()?, partition.parse().ok()?))
}

/// List all checkpoint files in a directory, sorted by step then partition
pub fn list_checkpoints(dir: &Path) -> std::io::Result<Vec<CheckpointFile>> {
    let mut checkpoints = Vec::new();

    if !dir.exists() {
        return Ok(checkpoints);
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().to_string();
        if let Some((step, partition)) = parse_checkpoint_name(&file_name) {
            checkpoints.push(CheckpointFile {
                step,
                partition,
                path: entry.path(),
            });
        }
    }

    checkpoints.sort_by_key(|c| (c.step, c.partition));
    Ok(checkpoints)
}

/// Find the latest checkpoint a partition wrote
pub fn find_latest_checkpoint(
    dir: &Path,
    partition: u32,
) -> std::io::Result<Option<CheckpointFile>> {
    let checkpoints = list_checkpoints(dir)?;
    Ok(checkpoints.into_iter().rev().find(|c| c.partition == partition))
}
