//! Checkpoint writing and restore
//!
//! This crate handles everything that touches the checkpoint stream:
//!
//! - Binary checkpoint format (header, canaries, per-value metadata)
//! - Writer: slot set to stream, slot order then declaration order
//! - Reader: header decode, name-based restore, filter and retain
//! - Late restore of individual values after the eager pass
//! - Checkpoint file naming and discovery

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config; // Partition count and mismatch policy
pub mod error; // CheckpointError
pub mod format; // Binary on-disk format (header, value metadata, index)
pub mod late_restore; // On-demand restore from a retained reader
pub mod paths; // ckpt-SSSSSS-pPPPP.rd naming and discovery
pub mod reader; // Header decode and restore state machine
pub mod writer; // Slot set serialization

pub use config::{CheckpointConfig, ConfigError};
pub use error::{CheckpointError, CheckpointResult};
pub use format::{
    CheckpointHeader, HeaderEntry, HeaderIndex, ValueMeta, CHECKPOINT_FORMAT_VERSION,
    CHECKPOINT_MAGIC,
};
pub use late_restore::LateRestorer;
pub use paths::{
    checkpoint_path, find_latest_checkpoint, list_checkpoints, parse_checkpoint_name,
    CheckpointFile, CHECKPOINT_EXTENSION,
};
pub use reader::{
    CheckpointReader, CheckpointSource, ReaderStatus, RestoreOutcome, RestoreReport,
};
pub use writer::{CheckpointWriter, FileWriteInfo, WriteInfo};
