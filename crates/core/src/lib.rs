//! Core types and traits for restartable data
//!
//! This crate defines what a checkpoint is made of, independent of how it
//! is laid out on disk:
//! - TypeIdentity: hash + name carried with every stored value
//! - RestartableValue: the store/load capability of one named value
//! - DataIo: byte codec for concrete Rust types, plus the Msgpack adapter
//! - RestartableData / DataHandle: the stock value and its owner handle
//! - SlotMap / SlotSet: declaration-ordered values per slot
//! - DataError: declaration and typed-access errors

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod data_io;
pub mod error;
pub mod slot;
pub mod types;
pub mod value;

pub use data_io::{read_len, write_len, DataIo, Msgpack};
pub use error::{DataError, Result};
pub use slot::{SlotMap, SlotSet, ValueEntry};
pub use types::{basic_type_fingerprint, TypeIdentity};
pub use value::{DataHandle, RestartableData, RestartableValue};
