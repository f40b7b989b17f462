//! Checkpoint writer
//!
//! Walks the slot set in slot order and each slot in declaration order,
//! emitting the header followed by every value's raw `store()` bytes.
//!
//! Values are stored into per-value buffers first so the header can record
//! exact byte sizes before any data is emitted. The write is a single
//! forward pass over the sink; a failure part-way leaves the output invalid
//! as a whole.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use restartable_core::SlotSet;

use crate::config::CheckpointConfig;
use crate::error::{CheckpointError, CheckpointResult};
use crate::format::{CheckpointHeader, ValueMeta};

/// Checkpoint writer
#[derive(Debug, Clone)]
pub struct CheckpointWriter {
    config: CheckpointConfig,
}

impl CheckpointWriter {
    /// Create a writer for this process's partition count
    pub fn new(config: CheckpointConfig) -> CheckpointResult<Self> {
        config.validate()?;
        Ok(CheckpointWriter { config })
    }

    /// Writer configuration
    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    /// Write all slots to `out`
    ///
    /// On success every written value's `stored()` flag is set; `loaded()`
    /// flags are left alone.
    pub fn write(&self, slots: &mut SlotSet, out: &mut dyn Write) -> CheckpointResult<WriteInfo> {
        let mut metas = Vec::with_capacity(slots.len());
        let mut buffers = Vec::with_capacity(slots.len());

        for slot_map in slots.iter() {
            let slot = slot_map.slot();
            let mut slot_metas = Vec::with_capacity(slot_map.len());
            let mut slot_buffers = Vec::with_capacity(slot_map.len());
            for entry in slot_map.iter() {
                let mut buf = Vec::new();
                entry
                    .store(&mut buf)
                    .map_err(|source| CheckpointError::Store {
                        name: entry.name().to_string(),
                        slot,
                        source,
                    })?;
                debug!(
                    target: "restartable::checkpoint",
                    slot,
                    name = entry.name(),
                    bytes = buf.len(),
                    "Stored value"
                );
                slot_metas.push(ValueMeta::new(
                    entry.name(),
                    buf.len() as u64,
                    entry.type_identity(),
                ));
                slot_buffers.push(buf);
            }
            metas.push(slot_metas);
            buffers.push(slot_buffers);
        }

        let header = CheckpointHeader::new(self.config.partition_count, metas);
        header.encode(out)?;
        for buf in buffers.iter().flatten() {
            out.write_all(buf)?;
        }
        out.flush()?;

        for slot_map in slots.iter_mut() {
            for entry in slot_map.iter_mut() {
                entry.mark_stored();
            }
        }

        let info = WriteInfo {
            slot_count: header.slots.len(),
            value_count: header.value_count(),
            header_len: header.encoded_len(),
            data_len: header.data_len(),
        };
        info!(
            target: "restartable::checkpoint",
            slots = info.slot_count,
            values = info.value_count,
            bytes = info.total_len(),
            "Checkpoint written"
        );
        Ok(info)
    }

    /// Write all slots into a new buffer
    pub fn write_to_vec(&self, slots: &mut SlotSet) -> CheckpointResult<Vec<u8>> {
        let mut out = Vec::new();
        self.write(slots, &mut out)?;
        Ok(out)
    }

    /// Write all slots to a file, replacing any existing file
    ///
    /// The file is fsynced before returning. There is no atomic-rename step:
    /// a crash mid-write leaves a file that fails to decode.
    pub fn write_to_file(
        &self,
        path: &Path,
        slots: &mut SlotSet,
    ) -> CheckpointResult<FileWriteInfo> {
        let file = File::create(path)?;
        let mut out = BufWriter::new(file);
        let info = self.write(slots, &mut out)?;
        let file = out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        Ok(FileWriteInfo {
            path: path.to_path_buf(),
            info,
        })
    }
}

/// Information about a written checkpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteInfo {
    /// Number of slots written
    pub slot_count: usize,
    /// Number of values written across all slots
    pub value_count: usize,
    /// Header length in bytes (start of the data region)
    pub header_len: u64,
    /// Data region length in bytes
    pub data_len: u64,
}

impl WriteInfo {
    /// Total stream length
    pub fn total_len(&self) -> u64 {
        self.header_len + self.data_len
    }
}

/// Information about a checkpoint written to a file
#[derive(Debug, Clone)]
pub struct FileWriteInfo {
    /// Path of the checkpoint file
    pub path: PathBuf,
    /// Stream statistics
    pub info: WriteInfo,
}
