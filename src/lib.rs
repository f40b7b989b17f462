//! Restartable - named, typed checkpoint data for simulation codes
//!
//! Values are declared by name into per-partition slots, written to a
//! binary checkpoint stream, and restored by name on restart. Restore
//! tolerates values added or removed between runs, rejects type changes,
//! and can defer individual values to a later, on-demand restore.
//!
//! # Quick Start
//!
//! ```ignore
//! use restartable::{CheckpointConfig, CheckpointReader, CheckpointWriter, SlotSet};
//! use std::collections::HashSet;
//!
//! let mut slots = SlotSet::single();
//! let step = slots.slot_mut(0)?.declare_data("step", 0u64)?;
//!
//! let writer = CheckpointWriter::new(CheckpointConfig::default())?;
//! writer.write_to_file(&path, &mut slots)?;
//!
//! let mut reader = CheckpointReader::new(CheckpointConfig::default())?;
//! reader.restore_file(&path, &mut slots, false, &HashSet::<String>::new())?;
//! ```
//!
//! # Architecture
//!
//! - `restartable-core`: value traits, typed storage, slot registry
//! - `restartable-durability`: checkpoint format, writer, reader, late restore

pub use restartable_core::{
    basic_type_fingerprint, read_len, write_len, DataError, DataHandle, DataIo, Msgpack,
    RestartableData, RestartableValue, SlotMap, SlotSet, TypeIdentity, ValueEntry,
};
pub use restartable_durability::{
    checkpoint_path, find_latest_checkpoint, list_checkpoints, parse_checkpoint_name,
    CheckpointConfig, CheckpointError, CheckpointFile, CheckpointHeader, CheckpointReader,
    CheckpointResult, CheckpointSource, CheckpointWriter, ConfigError, FileWriteInfo,
    HeaderEntry, HeaderIndex, LateRestorer, ReaderStatus, RestoreOutcome, RestoreReport,
    ValueMeta, WriteInfo, CHECKPOINT_EXTENSION, CHECKPOINT_FORMAT_VERSION, CHECKPOINT_MAGIC,
};
