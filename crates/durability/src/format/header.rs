//! Checkpoint header format
//!
//! The header is self-describing: it names every value, its byte size and
//! its type, so a reader can locate and validate any value without touching
//! the data of the others.
//!
//! # File Structure
//!
//! ```text
//! +--------------------------+ 0
//! | Magic "RD"               | 2 bytes
//! | Format version           | u32
//! | Fingerprint              | u64
//! | Partition count          | u32
//! | Slot count (S)           | u32
//! +--------------------------+ 22
//! | Value count per slot     | u32 x S
//! | Header block size        | u64
//! +--------------------------+
//! | Value metadata           | per slot, per value, declaration order:
//! |                          |   name_len(u32) + name
//! |                          |   byte_size(u64) + type_hash(u64)
//! |                          |   type_name_len(u32) + type_name
//! +--------------------------+ header_len
//! | Slot 0 data              | concatenated store() output
//! | Slot 1 data              |
//! | ...                      |
//! +--------------------------+
//! ```
//!
//! All integers are little-endian. Value offsets are not stored; they are
//! derived from `header_len` and the byte sizes in declaration order.

use std::io::{self, Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rustc_hash::FxHashMap;
use tracing::warn;

use restartable_core::{basic_type_fingerprint, TypeIdentity};

use crate::config::CheckpointConfig;
use crate::error::{CheckpointError, CheckpointResult};

/// Magic bytes: "RD"
pub const CHECKPOINT_MAGIC: [u8; 2] = *b"RD";

/// Checkpoint format version; readers accept only this exact version
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// Fixed preamble: magic(2) + version(4) + fingerprint(8) + partitions(4) + slots(4)
pub const PREAMBLE_SIZE: u64 = 22;

/// Fixed part of one value's metadata: name_len(4) + byte_size(8) + hash(8) + type_name_len(4)
pub const VALUE_META_FIXED_SIZE: u64 = 24;

/// Cap on preallocation driven by counts read from the stream
const MAX_PREALLOC: usize = 1024;

/// Metadata for one stored value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueMeta {
    /// Value name
    pub name: String,
    /// Size of the value's data in bytes
    pub byte_size: u64,
    /// Stored type
    pub type_identity: TypeIdentity,
}

impl ValueMeta {
    /// Create value metadata
    pub fn new(name: impl Into<String>, byte_size: u64, type_identity: TypeIdentity) -> Self {
        ValueMeta {
            name: name.into(),
            byte_size,
            type_identity,
        }
    }

    /// Encoded size of this metadata record
    pub fn encoded_len(&self) -> u64 {
        VALUE_META_FIXED_SIZE + self.name.len() as u64 + self.type_identity.name.len() as u64
    }
}

/// Decoded checkpoint header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointHeader {
    /// Format version
    pub format_version: u32,
    /// Basic type fingerprint of the writing build
    pub fingerprint: u64,
    /// Partition count at write time
    pub partition_count: u32,
    /// Per slot, per value metadata in declaration order
    pub slots: Vec<Vec<ValueMeta>>,
}

impl CheckpointHeader {
    /// Header for the current format and build
    pub fn new(partition_count: u32, slots: Vec<Vec<ValueMeta>>) -> Self {
        CheckpointHeader {
            format_version: CHECKPOINT_FORMAT_VERSION,
            fingerprint: basic_type_fingerprint(),
            partition_count,
            slots,
        }
    }

    /// Total length of the value metadata block
    pub fn header_block_size(&self) -> u64 {
        self.slots
            .iter()
            .flatten()
            .map(ValueMeta::encoded_len)
            .sum()
    }

    /// Encoded length of the whole header; the data region starts here
    pub fn encoded_len(&self) -> u64 {
        PREAMBLE_SIZE + 4 * self.slots.len() as u64 + 8 + self.header_block_size()
    }

    /// Total length of all slots' data
    pub fn data_len(&self) -> u64 {
        self.slots.iter().flatten().map(|m| m.byte_size).sum()
    }

    /// Number of values across all slots
    pub fn value_count(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }

    /// Serialize the header
    pub fn encode(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_all(&CHECKPOINT_MAGIC)?;
        w.write_u32::<LittleEndian>(self.format_version)?;
        w.write_u64::<LittleEndian>(self.fingerprint)?;
        w.write_u32::<LittleEndian>(self.partition_count)?;
        w.write_u32::<LittleEndian>(to_u32(self.slots.len(), "slot count")?)?;
        for values in &self.slots {
            w.write_u32::<LittleEndian>(to_u32(values.len(), "value count")?)?;
        }
        w.write_u64::<LittleEndian>(self.header_block_size())?;
        for meta in self.slots.iter().flatten() {
            write_str(w, &meta.name)?;
            w.write_u64::<LittleEndian>(meta.byte_size)?;
            w.write_u64::<LittleEndian>(meta.type_identity.hash)?;
            write_str(w, &meta.type_identity.name)?;
        }
        Ok(())
    }

    /// Parse the header from the start of a stream
    ///
    /// Fails on wrong magic or version before reading further. Leaves the
    /// reader positioned at the start of the data region.
    pub fn decode(r: &mut dyn Read) -> CheckpointResult<Self> {
        let mut magic = [0u8; 2];
        r.read_exact(&mut magic).map_err(truncated("magic"))?;
        if magic != CHECKPOINT_MAGIC {
            return Err(CheckpointError::InvalidMagic {
                expected: CHECKPOINT_MAGIC,
                actual: magic,
            });
        }

        let format_version = r.read_u32::<LittleEndian>().map_err(truncated("format version"))?;
        if format_version != CHECKPOINT_FORMAT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                version: format_version,
                expected: CHECKPOINT_FORMAT_VERSION,
            });
        }

        let fingerprint = r.read_u64::<LittleEndian>().map_err(truncated("fingerprint"))?;
        let partition_count = r
            .read_u32::<LittleEndian>()
            .map_err(truncated("partition count"))?;
        let slot_count = r.read_u32::<LittleEndian>().map_err(truncated("slot count"))? as usize;

        let mut value_counts = Vec::with_capacity(slot_count.min(MAX_PREALLOC));
        for _ in 0..slot_count {
            let count = r.read_u32::<LittleEndian>().map_err(truncated("value counts"))?;
            value_counts.push(count as usize);
        }

        let block_size = r
            .read_u64::<LittleEndian>()
            .map_err(truncated("header block size"))?;
        let mut block = Vec::new();
        r.take(block_size)
            .read_to_end(&mut block)
            .map_err(CheckpointError::Io)?;
        if (block.len() as u64) < block_size {
            return Err(CheckpointError::Truncated {
                section: "value metadata",
            });
        }

        let mut cursor = Cursor::new(block.as_slice());
        let mut slots = Vec::with_capacity(value_counts.len());
        for count in value_counts {
            let mut values = Vec::with_capacity(count.min(MAX_PREALLOC));
            for _ in 0..count {
                values.push(read_value_meta(&mut cursor, block_size)?);
            }
            slots.push(values);
        }

        let parsed = cursor.position();
        if parsed != block_size {
            return Err(CheckpointError::HeaderBlockSizeMismatch {
                recorded: block_size,
                parsed,
            });
        }

        Ok(CheckpointHeader {
            format_version,
            fingerprint,
            partition_count,
            slots,
        })
    }

    /// Check the build canaries against this process
    ///
    /// A partition count mismatch is downgraded to a warning when the
    /// config opts out of the check.
    pub fn validate(&self, config: &CheckpointConfig) -> CheckpointResult<()> {
        let expected = basic_type_fingerprint();
        if self.fingerprint != expected {
            return Err(CheckpointError::FingerprintMismatch {
                stored: self.fingerprint,
                expected,
            });
        }

        if self.partition_count != config.partition_count {
            if config.error_on_partition_mismatch {
                return Err(CheckpointError::PartitionMismatch {
                    stored: self.partition_count,
                    current: config.partition_count,
                });
            }
            warn!(
                target: "restartable::checkpoint",
                stored = self.partition_count,
                current = config.partition_count,
                "Partition count mismatch ignored by configuration"
            );
        }
        Ok(())
    }

    /// Build the name index with derived offsets
    pub fn index(&self) -> CheckpointResult<HeaderIndex> {
        let mut offset = self.encoded_len();
        let mut slots = Vec::with_capacity(self.slots.len());

        for (slot, values) in self.slots.iter().enumerate() {
            let mut index = SlotIndex::default();
            for meta in values {
                let entry = HeaderEntry {
                    byte_offset: offset,
                    byte_size: meta.byte_size,
                    type_identity: meta.type_identity.clone(),
                };
                offset = offset.checked_add(meta.byte_size).ok_or_else(|| {
                    CheckpointError::Corrupt {
                        detail: format!("size of '{}' in slot {} overflows", meta.name, slot),
                    }
                })?;
                if index.by_name.contains_key(&meta.name) {
                    return Err(CheckpointError::Corrupt {
                        detail: format!("duplicate value '{}' in slot {}", meta.name, slot),
                    });
                }
                index.by_name.insert(meta.name.clone(), index.entries.len());
                index.entries.push((meta.name.clone(), entry));
            }
            slots.push(index);
        }

        Ok(HeaderIndex {
            slots,
            partition_count: self.partition_count,
            fingerprint: self.fingerprint,
            total_len: offset,
        })
    }
}

/// Location and type of one value in the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderEntry {
    /// Absolute position from the start of the stream
    pub byte_offset: u64,
    /// Length of the value's data
    pub byte_size: u64,
    /// Stored type
    pub type_identity: TypeIdentity,
}

#[derive(Debug, Default, Clone)]
struct SlotIndex {
    entries: Vec<(String, HeaderEntry)>,
    by_name: FxHashMap<String, usize>,
}

/// Decoded header: slot -> name -> entry
///
/// Immutable once built; the reader keeps it between restores.
#[derive(Debug, Clone)]
pub struct HeaderIndex {
    slots: Vec<SlotIndex>,
    partition_count: u32,
    fingerprint: u64,
    total_len: u64,
}

impl HeaderIndex {
    /// Number of slots in the checkpoint
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Partition count at write time
    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    /// Fingerprint of the writing build
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    /// Stream length the header implies
    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    /// Entry for `name` in `slot`
    pub fn entry(&self, slot: usize, name: &str) -> Option<&HeaderEntry> {
        let index = self.slots.get(slot)?;
        index.by_name.get(name).map(|&pos| &index.entries[pos].1)
    }

    /// Whether `slot` has a value named `name`
    pub fn contains(&self, slot: usize, name: &str) -> bool {
        self.entry(slot, name).is_some()
    }

    /// Stored names of a slot, in write order
    pub fn names(&self, slot: usize) -> impl Iterator<Item = &str> {
        self.slots
            .get(slot)
            .into_iter()
            .flat_map(|index| index.entries.iter().map(|(name, _)| name.as_str()))
    }

    /// Number of values stored for a slot
    pub fn value_count(&self, slot: usize) -> usize {
        self.slots.get(slot).map_or(0, |index| index.entries.len())
    }
}

fn truncated(section: &'static str) -> impl Fn(io::Error) -> CheckpointError {
    move |e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            CheckpointError::Truncated { section }
        } else {
            CheckpointError::Io(e)
        }
    }
}

fn overrun(block_size: u64) -> CheckpointError {
    CheckpointError::Corrupt {
        detail: format!(
            "value metadata overruns the recorded block size of {} bytes",
            block_size
        ),
    }
}

fn to_u32(len: usize, what: &str) -> io::Result<u32> {
    u32::try_from(len).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} {} does not fit the header", what, len),
        )
    })
}

fn write_str(w: &mut dyn Write, s: &str) -> io::Result<()> {
    w.write_u32::<LittleEndian>(to_u32(s.len(), "string length")?)?;
    w.write_all(s.as_bytes())
}

fn read_str(
    cursor: &mut Cursor<&[u8]>,
    block_size: u64,
    field: &'static str,
) -> CheckpointResult<String> {
    let len = cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| overrun(block_size))? as usize;
    let start = cursor.position() as usize;
    let bytes = cursor.get_ref();
    if start + len > bytes.len() {
        return Err(overrun(block_size));
    }
    let s = std::str::from_utf8(&bytes[start..start + len])
        .map_err(|_| CheckpointError::InvalidUtf8 { field })?
        .to_string();
    cursor.set_position((start + len) as u64);
    Ok(s)
}

fn read_value_meta(cursor: &mut Cursor<&[u8]>, block_size: u64) -> CheckpointResult<ValueMeta> {
    let name = read_str(cursor, block_size, "value name")?;
    let byte_size = cursor
        .read_u64::<LittleEndian>()
        .map_err(|_| overrun(block_size))?;
    let type_hash = cursor
        .read_u64::<LittleEndian>()
        .map_err(|_| overrun(block_size))?;
    let type_name = read_str(cursor, block_size, "type name")?;
    Ok(ValueMeta {
        name,
        byte_size,
        type_identity: TypeIdentity::new(type_hash, type_name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> CheckpointHeader {
        CheckpointHeader::new(
            2,
            vec![
                vec![
                    ValueMeta::new("alpha", 4, TypeIdentity::of::<i32>()),
                    ValueMeta::new("beta", 13, TypeIdentity::of::<String>()),
                ],
                vec![ValueMeta::new("gamma", 8, TypeIdentity::of::<f64>())],
            ],
        )
    }

    fn encoded(header: &CheckpointHeader) -> Vec<u8> {
        let mut buf = Vec::new();
        header.encode(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_preamble_layout() {
        let bytes = encoded(&sample_header());
        assert_eq!(&bytes[0..2], b"RD");
        assert_eq!(
            u32::from_le_bytes(bytes[2..6].try_into().unwrap()),
            CHECKPOINT_FORMAT_VERSION
        );
        assert_eq!(
            u64::from_le_bytes(bytes[6..14].try_into().unwrap()),
            basic_type_fingerprint()
        );
        assert_eq!(u32::from_le_bytes(bytes[14..18].try_into().unwrap()), 2);
        assert_eq!(u32::from_le_bytes(bytes[18..22].try_into().unwrap()), 2);
        // Per-slot value counts
        assert_eq!(u32::from_le_bytes(bytes[22..26].try_into().unwrap()), 2);
        assert_eq!(u32::from_le_bytes(bytes[26..30].try_into().unwrap()), 1);
    }

    #[test]
    fn test_encoded_len_matches_bytes() {
        let header = sample_header();
        let bytes = encoded(&header);
        assert_eq!(bytes.len() as u64, header.encoded_len());
        let block = u64::from_le_bytes(bytes[30..38].try_into().unwrap());
        assert_eq!(block, header.header_block_size());
    }

    #[test]
    fn test_decode_restores_metadata() {
        let header = sample_header();
        let decoded = CheckpointHeader::decode(&mut Cursor::new(encoded(&header))).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_offsets_are_derived_in_declaration_order() {
        let header = sample_header();
        let index = header.index().unwrap();
        let data_start = header.encoded_len();

        let alpha = index.entry(0, "alpha").unwrap();
        let beta = index.entry(0, "beta").unwrap();
        let gamma = index.entry(1, "gamma").unwrap();

        assert_eq!(alpha.byte_offset, data_start);
        assert_eq!(beta.byte_offset, alpha.byte_offset + alpha.byte_size);
        assert_eq!(gamma.byte_offset, beta.byte_offset + beta.byte_size);
        assert_eq!(index.total_len(), data_start + 4 + 13 + 8);
    }

    #[test]
    fn test_index_lookup() {
        let index = sample_header().index().unwrap();
        assert_eq!(index.slot_count(), 2);
        assert!(index.contains(0, "beta"));
        assert!(!index.contains(1, "beta"));
        assert!(!index.contains(7, "beta"));
        assert_eq!(index.names(0).collect::<Vec<_>>(), vec!["alpha", "beta"]);
        assert_eq!(index.value_count(1), 1);
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = encoded(&sample_header());
        bytes[0] = b'X';
        let err = CheckpointHeader::decode(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(
            err,
            CheckpointError::InvalidMagic { actual, .. } if actual == *b"XD"
        ));
    }

    #[test]
    fn test_version_must_match_exactly() {
        for version in [0u32, CHECKPOINT_FORMAT_VERSION + 1] {
            let mut bytes = encoded(&sample_header());
            bytes[2..6].copy_from_slice(&version.to_le_bytes());
            let err = CheckpointHeader::decode(&mut Cursor::new(bytes)).unwrap_err();
            assert!(matches!(
                err,
                CheckpointError::UnsupportedVersion { version: v, .. } if v == version
            ));
        }
    }

    #[test]
    fn test_truncated_preamble() {
        let bytes = encoded(&sample_header());
        let err = CheckpointHeader::decode(&mut Cursor::new(&bytes[..10])).unwrap_err();
        assert!(matches!(err, CheckpointError::Truncated { section: "fingerprint" }));
    }

    #[test]
    fn test_truncated_metadata_block() {
        let bytes = encoded(&sample_header());
        let cut = bytes.len() - 3;
        let err = CheckpointHeader::decode(&mut Cursor::new(&bytes[..cut])).unwrap_err();
        assert!(matches!(err, CheckpointError::Truncated { section: "value metadata" }));
    }

    #[test]
    fn test_block_size_too_large_detected() {
        let header = sample_header();
        let mut bytes = encoded(&header);
        let recorded = header.header_block_size() + 4;
        bytes[30..38].copy_from_slice(&recorded.to_le_bytes());
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        let err = CheckpointHeader::decode(&mut Cursor::new(bytes)).unwrap_err();
        match err {
            CheckpointError::HeaderBlockSizeMismatch {
                recorded: r,
                parsed,
            } => {
                assert_eq!(r, recorded);
                assert_eq!(parsed, header.header_block_size());
            }
            other => panic!("Expected HeaderBlockSizeMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_block_size_too_small_detected() {
        let header = sample_header();
        let mut bytes = encoded(&header);
        let recorded = header.header_block_size() - 4;
        bytes[30..38].copy_from_slice(&recorded.to_le_bytes());
        let err = CheckpointHeader::decode(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupt { .. }));
    }

    #[test]
    fn test_invalid_utf8_name() {
        let meta = ValueMeta::new("ab", 0, TypeIdentity::of::<u8>());
        let header = CheckpointHeader::new(1, vec![vec![meta]]);
        let mut bytes = encoded(&header);
        // Slot count 1: value count at 22..26, block size at 26..34, name_len at 34..38
        bytes[38] = 0xff;
        let err = CheckpointHeader::decode(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, CheckpointError::InvalidUtf8 { field: "value name" }));
    }

    #[test]
    fn test_validate_fingerprint() {
        let mut header = sample_header();
        header.fingerprint ^= 1;
        let err = header
            .validate(&CheckpointConfig::for_partitions(2))
            .unwrap_err();
        assert!(matches!(err, CheckpointError::FingerprintMismatch { .. }));
    }

    #[test]
    fn test_validate_partition_count() {
        let header = sample_header();
        assert!(header.validate(&CheckpointConfig::for_partitions(2)).is_ok());

        let err = header
            .validate(&CheckpointConfig::for_partitions(3))
            .unwrap_err();
        assert!(matches!(
            err,
            CheckpointError::PartitionMismatch { stored: 2, current: 3 }
        ));

        let lenient = CheckpointConfig::for_partitions(3).with_error_on_partition_mismatch(false);
        assert!(header.validate(&lenient).is_ok());
    }

    #[test]
    fn test_duplicate_names_rejected_by_index() {
        let header = CheckpointHeader::new(
            1,
            vec![vec![
                ValueMeta::new("x", 1, TypeIdentity::of::<u8>()),
                ValueMeta::new("x", 1, TypeIdentity::of::<u8>()),
            ]],
        );
        assert!(matches!(header.index(), Err(CheckpointError::Corrupt { .. })));
    }

    #[test]
    fn test_empty_header() {
        let header = CheckpointHeader::new(1, vec![]);
        let bytes = encoded(&header);
        assert_eq!(bytes.len() as u64, PREAMBLE_SIZE + 8);
        let decoded = CheckpointHeader::decode(&mut Cursor::new(bytes)).unwrap();
        assert!(decoded.slots.is_empty());
    }
}
