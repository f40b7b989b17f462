//! Checkpoint error types
//!
//! Every variant is fatal for the operation that raised it. Messages carry
//! the value name, slot, and expected vs actual values so a failure can be
//! diagnosed without opening the stream in a hex editor.

use std::io;

use restartable_core::{DataError, TypeIdentity};

use crate::config::ConfigError;

/// Result type alias for checkpoint operations
pub type CheckpointResult<T> = std::result::Result<T, CheckpointError>;

/// Errors raised while writing, decoding, or restoring a checkpoint
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Stream does not start with the checkpoint magic
    #[error("Invalid magic bytes: expected {expected:?}, got {actual:?}")]
    InvalidMagic {
        /// Expected magic bytes
        expected: [u8; 2],
        /// Magic bytes found
        actual: [u8; 2],
    },

    /// Format version differs from this build's
    #[error("Unsupported checkpoint version {version}, this build reads version {expected}")]
    UnsupportedVersion {
        /// Version found in the stream
        version: u32,
        /// Version this build reads and writes
        expected: u32,
    },

    /// Basic type fingerprint differs (incompatible writer build)
    #[error("Fingerprint mismatch: checkpoint has {stored:#018x}, this build has {expected:#018x}")]
    FingerprintMismatch {
        /// Fingerprint in the stream
        stored: u64,
        /// Fingerprint of this build
        expected: u64,
    },

    /// Checkpoint was written with a different partition count
    #[error("Partition count mismatch: checkpoint written with {stored} partitions, running with {current}")]
    PartitionMismatch {
        /// Partition count at write time
        stored: u32,
        /// Partition count of this process
        current: u32,
    },

    /// Caller's slot set does not match the checkpoint's slot count
    #[error("Slot count mismatch: checkpoint has {stored} slots, caller declared {declared}")]
    SlotCountMismatch {
        /// Slots in the checkpoint
        stored: usize,
        /// Slots in the caller's slot set
        declared: usize,
    },

    /// Metadata block length disagrees with the recorded block size
    #[error("Header block size mismatch: recorded {recorded} bytes, parsed {parsed}")]
    HeaderBlockSizeMismatch {
        /// Size recorded in the header
        recorded: u64,
        /// Bytes the metadata actually occupied
        parsed: u64,
    },

    /// Stream ended inside the header
    #[error("Checkpoint truncated while reading {section}")]
    Truncated {
        /// What was being read
        section: &'static str,
    },

    /// Stream is shorter than the header says the data region is
    #[error("Checkpoint data truncated: header describes {needed} bytes, stream has {available}")]
    DataTruncated {
        /// Total stream length implied by the header
        needed: u64,
        /// Actual stream length
        available: u64,
    },

    /// A name or type name in the header is not valid UTF-8
    #[error("Invalid UTF-8 in header {field}")]
    InvalidUtf8 {
        /// Which header field
        field: &'static str,
    },

    /// Header is structurally inconsistent
    #[error("Corrupt checkpoint header: {detail}")]
    Corrupt {
        /// Description of the inconsistency
        detail: String,
    },

    /// Stored type differs from the declared value's type
    #[error("Type mismatch for '{name}' in slot {slot}: checkpoint stores {stored}, declared as {declared}")]
    TypeMismatch {
        /// Value name
        name: String,
        /// Slot index
        slot: usize,
        /// Type identity recorded in the checkpoint
        stored: TypeIdentity,
        /// Type identity of the declared value
        declared: TypeIdentity,
    },

    /// `load` consumed fewer bytes than were recorded
    #[error("Size mismatch for '{name}' in slot {slot}: recorded {expected} bytes, load consumed {consumed}")]
    SizeMismatch {
        /// Value name
        name: String,
        /// Slot index
        slot: usize,
        /// Recorded byte size
        expected: u64,
        /// Bytes consumed by load
        consumed: u64,
    },

    /// `load` tried to read past its recorded bytes
    #[error("Load of '{name}' in slot {slot} read past its {expected} recorded bytes")]
    Overrun {
        /// Value name
        name: String,
        /// Slot index
        slot: usize,
        /// Recorded byte size
        expected: u64,
    },

    /// A value's `load` failed
    #[error("Failed to load '{name}' in slot {slot}: {source}")]
    Load {
        /// Value name
        name: String,
        /// Slot index
        slot: usize,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// A value's `store` failed
    #[error("Failed to store '{name}' in slot {slot}: {source}")]
    Store {
        /// Value name
        name: String,
        /// Slot index
        slot: usize,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Late restore of a name the checkpoint does not contain
    #[error("'{name}' is not in slot {slot} of the checkpoint")]
    NotInCheckpoint {
        /// Value name
        name: String,
        /// Slot index
        slot: usize,
    },

    /// Restore requested before `open` or after `clear`
    #[error("Checkpoint reader is not opened")]
    NotOpened,

    /// `open` called on a reader that already holds a stream
    #[error("Checkpoint reader is already open; call clear() first")]
    AlreadyOpen,

    /// Reader hit a fatal error earlier and must be cleared
    #[error("Checkpoint reader is in an error state ({reason}); call clear() first")]
    Poisoned {
        /// Message of the error that poisoned the reader
        reason: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// Declaration or typed-access error
    #[error(transparent)]
    Data(#[from] DataError),

    /// I/O error on the checkpoint stream
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mismatch_names_both_types() {
        let err = CheckpointError::TypeMismatch {
            name: "alpha".to_string(),
            slot: 0,
            stored: TypeIdentity::of::<i32>(),
            declared: TypeIdentity::of::<String>(),
        };
        let msg = err.to_string();
        assert!(msg.contains("alpha"));
        assert!(msg.contains("i32"));
        assert!(msg.contains("String"));
    }

    #[test]
    fn test_partition_mismatch_display() {
        let err = CheckpointError::PartitionMismatch {
            stored: 4,
            current: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("4 partitions"));
        assert!(msg.contains("running with 2"));
    }

    #[test]
    fn test_size_mismatch_display() {
        let err = CheckpointError::SizeMismatch {
            name: "beta".to_string(),
            slot: 1,
            expected: 13,
            consumed: 8,
        };
        let msg = err.to_string();
        assert!(msg.contains("recorded 13"));
        assert!(msg.contains("consumed 8"));
    }

    #[test]
    fn test_data_error_is_transparent() {
        let err: CheckpointError = DataError::SlotOutOfRange { slot: 3, count: 1 }.into();
        assert_eq!(err.to_string(), "Slot 3 out of range (slot count 1)");
    }
}
