//! Checkpoint reader
//!
//! Decodes the header eagerly and reads value bytes lazily, on request.
//!
//! # States
//!
//! ```text
//! Unopened --open--> HeaderDecoded --restore(retain)--> HeaderDecoded
//!                        |                                  |
//!                        +--clear / restore(!retain)--> Closed
//! any fatal error --> Failed --clear--> Unopened
//! ```
//!
//! Restore looks values up by name, so the caller's declaration order does
//! not matter. Names the checkpoint lacks are skipped; names the caller never
//! declares are never read.

use std::collections::HashSet;
use std::fs::File;
use std::hash::BuildHasher;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use tracing::{debug, info};

use restartable_core::{RestartableValue, SlotSet, TypeIdentity, ValueEntry};

use crate::config::CheckpointConfig;
use crate::error::{CheckpointError, CheckpointResult};
use crate::format::{CheckpointHeader, HeaderEntry, HeaderIndex};

/// A seekable byte source a reader can own
pub trait CheckpointSource: Read + Seek + Send {}

impl<T: Read + Seek + Send> CheckpointSource for T {}

/// Observable reader state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderStatus {
    /// No stream supplied yet
    Unopened,
    /// Header decoded; restores may be issued
    HeaderDecoded,
    /// A fatal error occurred; only `clear` is allowed
    Failed,
    /// Stream and index released
    Closed,
}

enum ReaderState {
    Unopened,
    Open {
        stream: Box<dyn CheckpointSource>,
        index: HeaderIndex,
    },
    Failed {
        reason: String,
    },
    Closed,
}

/// What happened to one declared value during a restore pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// Loaded from the checkpoint
    Restored,
    /// In the checkpoint but excluded by the filter
    SkippedFiltered,
    /// Not in the checkpoint
    SkippedAbsent,
}

/// Per-value outcomes of a restore pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    outcomes: Vec<(usize, String, RestoreOutcome)>,
}

impl RestoreReport {
    fn record(&mut self, slot: usize, name: &str, outcome: RestoreOutcome) {
        self.outcomes.push((slot, name.to_string(), outcome));
    }

    /// Outcome for a declared value
    pub fn outcome(&self, slot: usize, name: &str) -> Option<RestoreOutcome> {
        self.outcomes
            .iter()
            .find(|(s, n, _)| *s == slot && n == name)
            .map(|(_, _, outcome)| *outcome)
    }

    /// All outcomes, in slot then declaration order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str, RestoreOutcome)> {
        self.outcomes
            .iter()
            .map(|(slot, name, outcome)| (*slot, name.as_str(), *outcome))
    }

    /// Number of values with the given outcome
    pub fn count(&self, outcome: RestoreOutcome) -> usize {
        self.outcomes.iter().filter(|(_, _, o)| *o == outcome).count()
    }

    /// Number of values loaded
    pub fn restored(&self) -> usize {
        self.count(RestoreOutcome::Restored)
    }
}

/// Checkpoint reader
pub struct CheckpointReader {
    config: CheckpointConfig,
    state: ReaderState,
}

impl CheckpointReader {
    /// Create an unopened reader
    pub fn new(config: CheckpointConfig) -> CheckpointResult<Self> {
        config.validate()?;
        Ok(CheckpointReader {
            config,
            state: ReaderState::Unopened,
        })
    }

    /// Reader configuration
    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    /// Whether a partition count mismatch fails `open`
    ///
    /// Takes effect on the next `open`.
    pub fn set_error_on_partition_mismatch(&mut self, error: bool) {
        self.config.error_on_partition_mismatch = error;
    }

    /// Current state
    pub fn status(&self) -> ReaderStatus {
        match self.state {
            ReaderState::Unopened => ReaderStatus::Unopened,
            ReaderState::Open { .. } => ReaderStatus::HeaderDecoded,
            ReaderState::Failed { .. } => ReaderStatus::Failed,
            ReaderState::Closed => ReaderStatus::Closed,
        }
    }

    /// Whether the header is decoded and restores may be issued
    pub fn is_open(&self) -> bool {
        matches!(self.state, ReaderState::Open { .. })
    }

    /// Decoded header index, while open
    pub fn index(&self) -> Option<&HeaderIndex> {
        match &self.state {
            ReaderState::Open { index, .. } => Some(index),
            _ => None,
        }
    }

    /// Supply a stream and decode its header
    ///
    /// Validates magic, version, fingerprint and partition count, and that
    /// the stream is long enough for every value the header lists. Opening
    /// a reader that already holds a stream is a fatal error like any other.
    pub fn open<S: CheckpointSource + 'static>(
        &mut self,
        stream: S,
    ) -> CheckpointResult<&HeaderIndex> {
        if self.is_open() {
            let err = CheckpointError::AlreadyOpen;
            self.fail(&err);
            return Err(err);
        }
        match &self.state {
            ReaderState::Failed { reason } => {
                return Err(CheckpointError::Poisoned {
                    reason: reason.clone(),
                })
            }
            ReaderState::Open { .. } | ReaderState::Unopened | ReaderState::Closed => {}
        }

        let mut stream: Box<dyn CheckpointSource> = Box::new(stream);
        let index = match decode_index(stream.as_mut(), &self.config) {
            Ok(index) => index,
            Err(e) => {
                self.fail(&e);
                return Err(e);
            }
        };

        info!(
            target: "restartable::checkpoint",
            slots = index.slot_count(),
            partitions = index.partition_count(),
            bytes = index.total_len(),
            "Checkpoint header decoded"
        );

        self.state = ReaderState::Open { stream, index };
        self.open_index()
    }

    /// Open a checkpoint file
    pub fn open_file(&mut self, path: &Path) -> CheckpointResult<&HeaderIndex> {
        let file = File::open(path)?;
        self.open(BufReader::new(file))
    }

    /// Restore every declared value the checkpoint contains
    ///
    /// Values named in `filter` are skipped even when present, so an eager
    /// pass followed by late restores never loads a name twice. With
    /// `retain = false` the reader is cleared afterwards; with `retain =
    /// true` it stays open for further restores.
    ///
    /// Any fatal error aborts the pass and leaves the reader failed.
    pub fn restore<S: BuildHasher>(
        &mut self,
        slots: &mut SlotSet,
        retain: bool,
        filter: &HashSet<String, S>,
    ) -> CheckpointResult<RestoreReport> {
        let report = self.guard(|stream, index| restore_slots(stream, index, slots, filter))?;
        if !retain {
            self.clear();
        }
        Ok(report)
    }

    /// Open a checkpoint file and restore from it
    pub fn restore_file<S: BuildHasher>(
        &mut self,
        path: &Path,
        slots: &mut SlotSet,
        retain: bool,
        filter: &HashSet<String, S>,
    ) -> CheckpointResult<RestoreReport> {
        self.open_file(path)?;
        self.restore(slots, retain, filter)
    }

    /// Restore a single declared value by name
    ///
    /// Returns `SkippedAbsent` when the checkpoint lacks the name. The
    /// reader stays open.
    pub fn restore_entry(
        &mut self,
        slot: usize,
        entry: &mut ValueEntry,
    ) -> CheckpointResult<RestoreOutcome> {
        self.guard(|stream, index| {
            let Some(header_entry) = index.entry(slot, entry.name()) else {
                return Ok(RestoreOutcome::SkippedAbsent);
            };
            let name = entry.name().to_string();
            load_value(stream, header_entry, slot, &name, entry.value_mut())?;
            entry.mark_loaded();
            Ok(RestoreOutcome::Restored)
        })
    }

    /// Restore one named value into `value`
    ///
    /// Fails with `NotInCheckpoint` when the name is absent; that error
    /// does not poison the reader since nothing was read.
    pub fn restore_named(
        &mut self,
        slot: usize,
        name: &str,
        value: &mut dyn RestartableValue,
    ) -> CheckpointResult<()> {
        let contains = self.open_index()?.contains(slot, name);
        if !contains {
            return Err(CheckpointError::NotInCheckpoint {
                name: name.to_string(),
                slot,
            });
        }
        self.guard(|stream, index| match index.entry(slot, name) {
            Some(header_entry) => load_value(stream, header_entry, slot, name, value),
            None => Ok(()),
        })
    }

    /// Whether `slot` has `name` stored with a type compatible with `type_identity`
    pub fn is_restorable(&self, name: &str, type_identity: &TypeIdentity, slot: usize) -> bool {
        self.index()
            .and_then(|index| index.entry(slot, name))
            .map_or(false, |entry| type_identity.matches(&entry.type_identity))
    }

    /// Release the stream and index
    ///
    /// The only operation permitted after a failure. A failed reader
    /// returns to `Unopened`; an open one becomes `Closed`.
    pub fn clear(&mut self) {
        self.state = match self.state {
            ReaderState::Failed { .. } | ReaderState::Unopened => ReaderState::Unopened,
            ReaderState::Open { .. } | ReaderState::Closed => ReaderState::Closed,
        };
    }

    fn open_index(&self) -> CheckpointResult<&HeaderIndex> {
        match &self.state {
            ReaderState::Open { index, .. } => Ok(index),
            ReaderState::Failed { reason } => Err(CheckpointError::Poisoned {
                reason: reason.clone(),
            }),
            ReaderState::Unopened | ReaderState::Closed => Err(CheckpointError::NotOpened),
        }
    }

    fn fail(&mut self, err: &CheckpointError) {
        self.state = ReaderState::Failed {
            reason: err.to_string(),
        };
    }

    /// Run `op` against the open stream, moving to `Failed` if it errors
    fn guard<T>(
        &mut self,
        op: impl FnOnce(&mut dyn CheckpointSource, &HeaderIndex) -> CheckpointResult<T>,
    ) -> CheckpointResult<T> {
        let result = match &mut self.state {
            ReaderState::Open { stream, index } => op(stream.as_mut(), index),
            ReaderState::Failed { reason } => {
                return Err(CheckpointError::Poisoned {
                    reason: reason.clone(),
                })
            }
            ReaderState::Unopened | ReaderState::Closed => return Err(CheckpointError::NotOpened),
        };
        if let Err(e) = &result {
            self.fail(e);
        }
        result
    }
}

impl std::fmt::Debug for CheckpointReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointReader")
            .field("config", &self.config)
            .field("status", &self.status())
            .finish()
    }
}

fn decode_index(
    stream: &mut dyn CheckpointSource,
    config: &CheckpointConfig,
) -> CheckpointResult<HeaderIndex> {
    stream.seek(SeekFrom::Start(0))?;
    let header = CheckpointHeader::decode(&mut &mut *stream)?;
    header.validate(config)?;
    let index = header.index()?;

    let available = stream.seek(SeekFrom::End(0))?;
    if available < index.total_len() {
        return Err(CheckpointError::DataTruncated {
            needed: index.total_len(),
            available,
        });
    }
    Ok(index)
}

fn restore_slots<S: BuildHasher>(
    stream: &mut dyn CheckpointSource,
    index: &HeaderIndex,
    slots: &mut SlotSet,
    filter: &HashSet<String, S>,
) -> CheckpointResult<RestoreReport> {
    if slots.len() != index.slot_count() {
        return Err(CheckpointError::SlotCountMismatch {
            stored: index.slot_count(),
            declared: slots.len(),
        });
    }

    let mut report = RestoreReport::default();
    for slot_map in slots.iter_mut() {
        let slot = slot_map.slot();
        for entry in slot_map.iter_mut() {
            let outcome = match index.entry(slot, entry.name()) {
                None => RestoreOutcome::SkippedAbsent,
                Some(_) if filter.contains(entry.name()) => RestoreOutcome::SkippedFiltered,
                Some(header_entry) => {
                    let name = entry.name().to_string();
                    load_value(stream, header_entry, slot, &name, entry.value_mut())?;
                    entry.mark_loaded();
                    RestoreOutcome::Restored
                }
            };
            debug!(
                target: "restartable::checkpoint",
                slot,
                name = entry.name(),
                ?outcome,
                "Restore"
            );
            report.record(slot, entry.name(), outcome);
        }
    }
    Ok(report)
}

/// Type-check, seek, load, and verify the consumed size of one value
fn load_value(
    stream: &mut dyn CheckpointSource,
    header_entry: &HeaderEntry,
    slot: usize,
    name: &str,
    value: &mut dyn RestartableValue,
) -> CheckpointResult<()> {
    let declared = value.type_identity();
    if !declared.matches(&header_entry.type_identity) {
        return Err(CheckpointError::TypeMismatch {
            name: name.to_string(),
            slot,
            stored: header_entry.type_identity.clone(),
            declared,
        });
    }

    stream.seek(SeekFrom::Start(header_entry.byte_offset))?;
    let expected = header_entry.byte_size;
    let mut limited = (&mut *stream).take(expected);

    if let Err(source) = value.load(&mut limited) {
        if source.kind() == std::io::ErrorKind::UnexpectedEof && limited.limit() == 0 {
            return Err(CheckpointError::Overrun {
                name: name.to_string(),
                slot,
                expected,
            });
        }
        return Err(CheckpointError::Load {
            name: name.to_string(),
            slot,
            source,
        });
    }

    let consumed = expected - limited.limit();
    if consumed != expected {
        return Err(CheckpointError::SizeMismatch {
            name: name.to_string(),
            slot,
            expected,
            consumed,
        });
    }
    Ok(())
}
