//! Slot maps: ordered, name-keyed restartable values for one partition
//!
//! Iteration order is declaration order, never sorted. The checkpoint
//! writer lays values out on disk in this order, so it is part of the
//! format contract. Lookups by name go through a side index.

use std::collections::HashSet;
use std::fmt;
use std::io::{self, Read, Write};

use rustc_hash::FxHashMap;

use crate::data_io::DataIo;
use crate::error::{DataError, Result};
use crate::types::TypeIdentity;
use crate::value::{DataHandle, RestartableData, RestartableValue};

/// One registered value and its lifecycle flags
pub struct ValueEntry {
    name: String,
    value: Box<dyn RestartableValue>,
    declared: bool,
    recoverable: bool,
    loaded: bool,
    stored: bool,
}

impl ValueEntry {
    fn new(name: String, value: Box<dyn RestartableValue>, declared: bool) -> Self {
        ValueEntry {
            name,
            value,
            declared,
            recoverable: false,
            loaded: false,
            stored: false,
        }
    }

    /// Value name, unique within its slot
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identity of the stored type
    pub fn type_identity(&self) -> TypeIdentity {
        self.value.type_identity()
    }

    /// Whether an owner declared (rather than only requested) this value
    pub fn declared(&self) -> bool {
        self.declared
    }

    /// Whether the value is only restored when recovering, not on restart
    pub fn recoverable(&self) -> bool {
        self.recoverable
    }

    /// Whether the value was restored from a checkpoint
    pub fn loaded(&self) -> bool {
        self.loaded
    }

    /// Whether the value was written to a checkpoint
    pub fn stored(&self) -> bool {
        self.stored
    }

    /// Record a successful restore
    pub fn mark_loaded(&mut self) {
        self.loaded = true;
    }

    /// Record a successful write
    pub fn mark_stored(&mut self) {
        self.stored = true;
    }

    /// Serialize through the value's `store`
    pub fn store(&self, w: &mut dyn Write) -> io::Result<()> {
        self.value.store(w)
    }

    /// Deserialize through the value's `load`
    ///
    /// Does not touch the `loaded` flag; the reader sets it after checking
    /// the consumed size.
    pub fn load(&mut self, r: &mut dyn Read) -> io::Result<()> {
        self.value.load(r)
    }

    /// The underlying value
    pub fn value(&self) -> &dyn RestartableValue {
        self.value.as_ref()
    }

    /// The underlying value, mutably
    pub fn value_mut(&mut self) -> &mut dyn RestartableValue {
        self.value.as_mut()
    }

    /// Typed handle, if this entry is a `RestartableData<T>`
    pub fn handle<T: DataIo + 'static>(&self) -> Option<DataHandle<T>> {
        self.value
            .as_any()
            .downcast_ref::<RestartableData<T>>()
            .map(RestartableData::handle)
    }
}

impl fmt::Debug for ValueEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueEntry")
            .field("name", &self.name)
            .field("type", &self.value.type_identity().name)
            .field("declared", &self.declared)
            .field("recoverable", &self.recoverable)
            .field("loaded", &self.loaded)
            .field("stored", &self.stored)
            .finish()
    }
}

/// Restartable values of one slot, in declaration order
#[derive(Debug)]
pub struct SlotMap {
    slot: usize,
    entries: Vec<ValueEntry>,
    index: FxHashMap<String, usize>,
}

impl SlotMap {
    /// Create an empty map for the given slot index
    pub fn new(slot: usize) -> Self {
        SlotMap {
            slot,
            entries: Vec::new(),
            index: FxHashMap::default(),
        }
    }

    /// Slot index of this map
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Register a value under `name`
    ///
    /// If no value has that name it is appended. Otherwise the existing
    /// entry is returned, provided its type matches and this is not a
    /// second declaration. `declare = false` is a request: the owner may
    /// declare the same name later and will receive this entry.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        value: Box<dyn RestartableValue>,
        declare: bool,
    ) -> Result<&mut ValueEntry> {
        let name = name.into();
        if let Some(&pos) = self.index.get(&name) {
            let entry = &mut self.entries[pos];
            if declare && entry.declared {
                return Err(DataError::DuplicateDeclaration {
                    name,
                    slot: self.slot,
                });
            }
            let existing = entry.type_identity();
            let requested = value.type_identity();
            if existing != requested {
                return Err(DataError::ConflictingType {
                    name,
                    slot: self.slot,
                    existing,
                    requested,
                });
            }
            entry.declared |= declare;
            return Ok(entry);
        }

        let pos = self.entries.len();
        self.index.insert(name.clone(), pos);
        self.entries.push(ValueEntry::new(name, value, declare));
        Ok(&mut self.entries[pos])
    }

    /// Declare a value; a second declaration of the same name fails
    pub fn declare(
        &mut self,
        name: impl Into<String>,
        value: Box<dyn RestartableValue>,
    ) -> Result<&mut ValueEntry> {
        self.register(name, value, true)
    }

    /// Declare a `RestartableData<T>` and return the owner's handle
    ///
    /// If the name was only requested so far, `init` is discarded and the
    /// handle shares the already registered storage.
    pub fn declare_data<T: DataIo + 'static>(
        &mut self,
        name: impl Into<String>,
        init: T,
    ) -> Result<DataHandle<T>> {
        let entry = self.register(name, Box::new(RestartableData::new(init)), true)?;
        typed_handle(entry)
    }

    /// Declare a value restored only when recovering the same run
    ///
    /// A restart (a new run started from an old checkpoint) skips
    /// recoverable values; pass [`SlotSet::recoverable_names`] as the
    /// restore filter to get that behaviour.
    pub fn declare_recoverable(
        &mut self,
        name: impl Into<String>,
        value: Box<dyn RestartableValue>,
    ) -> Result<&mut ValueEntry> {
        let entry = self.register(name, value, true)?;
        entry.recoverable = true;
        Ok(entry)
    }

    /// Declare a recoverable `RestartableData<T>` and return the owner's handle
    pub fn declare_recoverable_data<T: DataIo + 'static>(
        &mut self,
        name: impl Into<String>,
        init: T,
    ) -> Result<DataHandle<T>> {
        let entry = self.declare_recoverable(name, Box::new(RestartableData::new(init)))?;
        typed_handle(entry)
    }

    /// Names of this slot's recoverable values, in declaration order
    pub fn recoverable_names(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|entry| entry.recoverable)
            .map(|entry| entry.name.as_str())
    }

    /// Request a `RestartableData<T>` without declaring it
    ///
    /// Creates a default-valued entry when absent.
    pub fn get_data<T: DataIo + Default + 'static>(
        &mut self,
        name: impl Into<String>,
    ) -> Result<DataHandle<T>> {
        let entry = self.register(name, Box::new(RestartableData::new(T::default())), false)?;
        typed_handle(entry)
    }

    /// Look up an entry by name
    pub fn get(&self, name: &str) -> Option<&ValueEntry> {
        self.index.get(name).map(|&pos| &self.entries[pos])
    }

    /// Look up an entry by name, mutably
    pub fn get_mut(&mut self, name: &str) -> Option<&mut ValueEntry> {
        match self.index.get(name) {
            Some(&pos) => Some(&mut self.entries[pos]),
            None => None,
        }
    }

    /// Whether a value with this name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Entries in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &ValueEntry> {
        self.entries.iter()
    }

    /// Entries in declaration order, mutably
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ValueEntry> {
        self.entries.iter_mut()
    }

    /// Names in declaration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Number of registered values
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no values are registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn typed_handle<T: DataIo + 'static>(entry: &ValueEntry) -> Result<DataHandle<T>> {
    entry.handle::<T>().ok_or_else(|| DataError::WrongType {
        name: entry.name.clone(),
        requested: TypeIdentity::of::<T>(),
    })
}

/// All slot maps of a process, one per slot
#[derive(Debug)]
pub struct SlotSet {
    slots: Vec<SlotMap>,
}

impl SlotSet {
    /// Create `count` empty slots
    pub fn new(count: usize) -> Self {
        SlotSet {
            slots: (0..count).map(SlotMap::new).collect(),
        }
    }

    /// A set with a single slot
    pub fn single() -> Self {
        SlotSet::new(1)
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the set has no slots
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot by index
    pub fn slot(&self, slot: usize) -> Result<&SlotMap> {
        let count = self.slots.len();
        self.slots
            .get(slot)
            .ok_or(DataError::SlotOutOfRange { slot, count })
    }

    /// Slot by index, mutably
    pub fn slot_mut(&mut self, slot: usize) -> Result<&mut SlotMap> {
        let count = self.slots.len();
        self.slots
            .get_mut(slot)
            .ok_or(DataError::SlotOutOfRange { slot, count })
    }

    /// Slots in index order
    pub fn iter(&self) -> impl Iterator<Item = &SlotMap> {
        self.slots.iter()
    }

    /// Slots in index order, mutably
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SlotMap> {
        self.slots.iter_mut()
    }

    /// Total values across all slots
    pub fn value_count(&self) -> usize {
        self.slots.iter().map(SlotMap::len).sum()
    }

    /// Recoverable names across all slots
    ///
    /// The restore filter for a restart: recoverable values keep their
    /// freshly declared state, everything else is restored.
    pub fn recoverable_names(&self) -> HashSet<String> {
        self.slots
            .iter()
            .flat_map(|slot| slot.recoverable_names())
            .map(str::to_string)
            .collect()
    }
}
