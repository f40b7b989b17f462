//! On-disk byte format for checkpoints.
//!
//! Keeping serialization separate from operational logic (how checkpoints
//! are written and restored) makes format evolution easier to manage.
//!
//! # Module Structure
//!
//! - `header`: magic, version, canaries, per-value metadata and the
//!   decoded name index

pub mod header;

pub use header::{
    CheckpointHeader, HeaderEntry, HeaderIndex, ValueMeta, CHECKPOINT_FORMAT_VERSION,
    CHECKPOINT_MAGIC, PREAMBLE_SIZE, VALUE_META_FIXED_SIZE,
};
