//! Late restore
//!
//! Restores individual values after the eager restore pass, from a reader
//! that was kept open (`retain = true`). Each call seeks to the value's
//! recorded offset, so values can be restored in any order and any number
//! of times.

use restartable_core::{DataError, DataIo, RestartableData, SlotSet, TypeIdentity, ValueEntry};
use tracing::debug;

use crate::error::{CheckpointError, CheckpointResult};
use crate::reader::{CheckpointReader, ReaderStatus};

/// Restores values on demand from an open checkpoint reader
#[derive(Debug)]
pub struct LateRestorer {
    reader: CheckpointReader,
}

impl LateRestorer {
    /// Take ownership of an open reader
    ///
    /// Fails with `NotOpened` unless the header has been decoded.
    pub fn new(reader: CheckpointReader) -> CheckpointResult<Self> {
        match reader.status() {
            ReaderStatus::HeaderDecoded => Ok(LateRestorer { reader }),
            _ => Err(CheckpointError::NotOpened),
        }
    }

    /// Whether `slot` stores `name` with a type compatible with `type_identity`
    pub fn is_restorable(&self, name: &str, type_identity: &TypeIdentity, slot: usize) -> bool {
        self.reader.is_restorable(name, type_identity, slot)
    }

    /// Typed form of [`is_restorable`](Self::is_restorable)
    pub fn is_restorable_as<T: 'static>(&self, name: &str, slot: usize) -> bool {
        self.is_restorable(name, &TypeIdentity::of::<T>(), slot)
    }

    /// Construct a `T` and load it from the checkpoint
    pub fn restore<T: DataIo + Default + 'static>(
        &mut self,
        name: &str,
        slot: usize,
    ) -> CheckpointResult<T> {
        let mut value = RestartableData::new(T::default());
        self.reader.restore_named(slot, name, &mut value)?;
        debug!(target: "restartable::checkpoint", slot, name, "Late restore");
        Ok(value.handle().take())
    }

    /// Load a declared value in place and mark it loaded
    pub fn restore_into<'a>(
        &mut self,
        name: &str,
        slot: usize,
        slots: &'a mut SlotSet,
    ) -> CheckpointResult<&'a mut ValueEntry> {
        let entry = slots
            .slot_mut(slot)?
            .get_mut(name)
            .ok_or_else(|| DataError::NotFound {
                name: name.to_string(),
                slot,
            })?;
        self.reader.restore_named(slot, name, entry.value_mut())?;
        entry.mark_loaded();
        debug!(
            target: "restartable::checkpoint",
            slot,
            name,
            "Late restore into declared value"
        );
        Ok(entry)
    }

    /// The underlying reader
    pub fn reader(&self) -> &CheckpointReader {
        &self.reader
    }

    /// Give the reader back, still open
    pub fn into_reader(self) -> CheckpointReader {
        self.reader
    }

    /// Release the stream and index
    pub fn finish(mut self) -> CheckpointReader {
        self.reader.clear();
        self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CheckpointConfig;
    use crate::writer::CheckpointWriter;
    use std::collections::HashSet;
    use std::io::Cursor;

    fn open_reader() -> CheckpointReader {
        let mut slots = SlotSet::new(2);
        slots.slot_mut(0).unwrap().declare_data("alpha", 42i32).unwrap();
        slots
            .slot_mut(1)
            .unwrap()
            .declare_data("alpha", vec![1u16, 2, 3])
            .unwrap();
        let bytes = CheckpointWriter::new(CheckpointConfig::default())
            .unwrap()
            .write_to_vec(&mut slots)
            .unwrap();

        let mut reader = CheckpointReader::new(CheckpointConfig::default()).unwrap();
        reader.open(Cursor::new(bytes)).unwrap();
        reader
    }

    #[test]
    fn test_requires_open_reader() {
        let reader = CheckpointReader::new(CheckpointConfig::default()).unwrap();
        assert!(matches!(
            LateRestorer::new(reader),
            Err(CheckpointError::NotOpened)
        ));
    }

    #[test]
    fn test_restore_by_slot() {
        let mut late = LateRestorer::new(open_reader()).unwrap();
        assert_eq!(late.restore::<i32>("alpha", 0).unwrap(), 42);
        assert_eq!(late.restore::<Vec<u16>>("alpha", 1).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_restore_same_name_twice() {
        let mut late = LateRestorer::new(open_reader()).unwrap();
        assert_eq!(late.restore::<i32>("alpha", 0).unwrap(), 42);
        assert_eq!(late.restore::<i32>("alpha", 0).unwrap(), 42);
    }

    #[test]
    fn test_restorable_checks() {
        let late = LateRestorer::new(open_reader()).unwrap();
        assert!(late.is_restorable_as::<i32>("alpha", 0));
        assert!(late.is_restorable_as::<Vec<u16>>("alpha", 1));
        assert!(!late.is_restorable_as::<i64>("alpha", 0));
        assert!(!late.is_restorable_as::<i32>("beta", 0));
    }

    #[test]
    fn test_absent_name_keeps_restorer_usable() {
        let mut late = LateRestorer::new(open_reader()).unwrap();
        let err = late.restore::<i32>("beta", 0).unwrap_err();
        assert!(matches!(err, CheckpointError::NotInCheckpoint { .. }));
        assert_eq!(late.restore::<i32>("alpha", 0).unwrap(), 42);
    }

    #[test]
    fn test_wrong_type_fails() {
        let mut late = LateRestorer::new(open_reader()).unwrap();
        let err = late.restore::<f32>("alpha", 0).unwrap_err();
        assert!(matches!(err, CheckpointError::TypeMismatch { .. }));
        assert_eq!(late.reader().status(), ReaderStatus::Failed);
    }

    #[test]
    fn test_restore_into_after_filtered_pass() {
        let mut reader = open_reader();
        let mut slots = SlotSet::new(2);
        let alpha = slots.slot_mut(0).unwrap().declare_data("alpha", 0i32).unwrap();

        let filter: HashSet<String> = ["alpha".to_string()].into_iter().collect();
        reader.restore(&mut slots, true, &filter).unwrap();
        assert_eq!(alpha.get(), 0);

        let mut late = LateRestorer::new(reader).unwrap();
        let entry = late.restore_into("alpha", 0, &mut slots).unwrap();
        assert!(entry.loaded());
        assert_eq!(alpha.get(), 42);

        let reader = late.finish();
        assert_eq!(reader.status(), ReaderStatus::Closed);
    }

    #[test]
    fn test_restore_into_undeclared() {
        let mut late = LateRestorer::new(open_reader()).unwrap();
        let mut slots = SlotSet::new(2);
        let err = late.restore_into("alpha", 0, &mut slots).unwrap_err();
        assert!(matches!(err, CheckpointError::Data(_)));
        assert!(late.reader().is_open());
    }
}
