//! The restartable value abstraction
//!
//! Every value that can go into a checkpoint implements [`RestartableValue`]:
//! it reports its [`TypeIdentity`] and knows how to store and load its own
//! bytes. The checkpoint subsystem never creates or destroys the underlying
//! state, it only reads and writes through this trait.
//!
//! [`RestartableData<T>`] is the stock implementation for any `T: DataIo`.
//! The data sits behind a shared lock so the subsystem that declared it keeps
//! a [`DataHandle<T>`] while the slot map owns the value itself.

use std::any::Any;
use std::fmt;
use std::io::{self, Read, Write};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::data_io::DataIo;
use crate::types::TypeIdentity;

/// A named value's checkpoint capability
///
/// The name lives in the owning slot map, not here.
pub trait RestartableValue: Any {
    /// Identity of the stored type
    fn type_identity(&self) -> TypeIdentity;

    /// Serialize the current in-memory state
    ///
    /// Must produce the same byte length for the same logical value.
    fn store(&self, w: &mut dyn Write) -> io::Result<()>;

    /// Replace the in-memory state from the reader
    ///
    /// Must consume exactly the bytes `store` produced. The checkpoint
    /// reader checks this after the call.
    fn load(&mut self, r: &mut dyn Read) -> io::Result<()>;

    /// Upcast for typed access
    fn as_any(&self) -> &dyn Any;
}

/// Restartable value backed by a [`DataIo`] type
pub struct RestartableData<T> {
    data: Arc<RwLock<T>>,
}

impl<T> RestartableData<T> {
    /// Wrap an initial value
    pub fn new(value: T) -> Self {
        RestartableData {
            data: Arc::new(RwLock::new(value)),
        }
    }

    /// Handle sharing the same storage
    pub fn handle(&self) -> DataHandle<T> {
        DataHandle {
            data: Arc::clone(&self.data),
        }
    }
}

impl<T: Default> Default for RestartableData<T> {
    fn default() -> Self {
        RestartableData::new(T::default())
    }
}

impl<T: DataIo + 'static> RestartableValue for RestartableData<T> {
    fn type_identity(&self) -> TypeIdentity {
        TypeIdentity::of::<T>()
    }

    fn store(&self, w: &mut dyn Write) -> io::Result<()> {
        self.data.read().data_store(w)
    }

    fn load(&mut self, r: &mut dyn Read) -> io::Result<()> {
        self.data.write().data_load(r)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T: fmt::Debug> fmt::Debug for RestartableData<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestartableData")
            .field("data", &*self.data.read())
            .finish()
    }
}

/// Owner-side access to a [`RestartableData`] value
pub struct DataHandle<T> {
    data: Arc<RwLock<T>>,
}

impl<T> DataHandle<T> {
    /// Shared read access
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.data.read()
    }

    /// Exclusive write access
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.data.write()
    }

    /// Replace the value
    pub fn set(&self, value: T) {
        *self.data.write() = value;
    }

    /// Whether two handles share storage
    pub fn ptr_eq(&self, other: &DataHandle<T>) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl<T: Clone> DataHandle<T> {
    /// Clone out the current value
    pub fn get(&self) -> T {
        self.data.read().clone()
    }
}

impl<T: Default> DataHandle<T> {
    /// Move the current value out, leaving `T::default()` behind
    pub fn take(&self) -> T {
        std::mem::take(&mut *self.data.write())
    }
}

impl<T> Clone for DataHandle<T> {
    fn clone(&self) -> Self {
        DataHandle {
            data: Arc::clone(&self.data),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for DataHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DataHandle").field(&*self.data.read()).finish()
    }
}
