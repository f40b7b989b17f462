//! Error types for restartable data declaration and typed access
//!
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use thiserror::Error;

use crate::types::TypeIdentity;

/// Result type alias for declaration and typed access
pub type Result<T> = std::result::Result<T, DataError>;

/// Errors raised while declaring or accessing restartable values
#[derive(Debug, Error)]
pub enum DataError {
    /// A value with this name was already declared in the slot
    #[error("Restartable value '{name}' was already declared in slot {slot}")]
    DuplicateDeclaration {
        /// Value name
        name: String,
        /// Slot index
        slot: usize,
    },

    /// A value with this name exists in the slot with another type
    #[error("Restartable value '{name}' in slot {slot} has type {existing}, requested {requested}")]
    ConflictingType {
        /// Value name
        name: String,
        /// Slot index
        slot: usize,
        /// Type of the registered value
        existing: TypeIdentity,
        /// Type of the new registration
        requested: TypeIdentity,
    },

    /// Typed access with a type the value does not hold
    #[error("Restartable value '{name}' does not hold {requested}")]
    WrongType {
        /// Value name
        name: String,
        /// Requested type
        requested: TypeIdentity,
    },

    /// No value of this name in the slot
    #[error("No restartable value named '{name}' in slot {slot}")]
    NotFound {
        /// Value name
        name: String,
        /// Slot index
        slot: usize,
    },

    /// Slot index outside the slot set
    #[error("Slot {slot} out of range (slot count {count})")]
    SlotOutOfRange {
        /// Requested slot
        slot: usize,
        /// Number of slots
        count: usize,
    },
}
