//! Byte-level codec for concrete restartable types
//!
//! [`DataIo`] is the per-type store/load pair a [`RestartableData`] uses to
//! move its payload in and out of a checkpoint.
//!
//! # Binary Format
//!
//! - All integers and floats are little-endian.
//! - `usize`/`isize` are widened to 8 bytes.
//! - `bool` is one byte (0 or 1).
//! - Strings and collections are prefixed with a u64 element count.
//! - `Option<T>` is a presence byte followed by the value if present.
//!
//! Loading consumes exactly the bytes storing produced, so the checkpoint
//! reader can verify the recorded size after every load.
//!
//! [`RestartableData`]: crate::value::RestartableData

use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Preallocation cap when reading a length prefix from untrusted bytes
const MAX_PREALLOC: usize = 4096;

/// Symmetric store/load for a concrete type
pub trait DataIo {
    /// Serialize `self` into the writer
    fn data_store(&self, w: &mut dyn Write) -> io::Result<()>;

    /// Deserialize from the reader, replacing `self`
    fn data_load(&mut self, r: &mut dyn Read) -> io::Result<()>;
}

fn invalid_data(detail: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, detail.into())
}

/// Write a u64 length prefix
pub fn write_len(w: &mut dyn Write, len: usize) -> io::Result<()> {
    w.write_u64::<LittleEndian>(len as u64)
}

/// Read a u64 length prefix
pub fn read_len(r: &mut dyn Read) -> io::Result<usize> {
    let len = r.read_u64::<LittleEndian>()?;
    usize::try_from(len).map_err(|_| invalid_data(format!("length {} does not fit usize", len)))
}

macro_rules! impl_data_io_le {
    ($($t:ty => $write:ident, $read:ident;)*) => {
        $(
            impl DataIo for $t {
                fn data_store(&self, w: &mut dyn Write) -> io::Result<()> {
                    w.$write::<LittleEndian>(*self)
                }

                fn data_load(&mut self, r: &mut dyn Read) -> io::Result<()> {
                    *self = r.$read::<LittleEndian>()?;
                    Ok(())
                }
            }
        )*
    };
}

impl_data_io_le! {
    u16 => write_u16, read_u16;
    u32 => write_u32, read_u32;
    u64 => write_u64, read_u64;
    u128 => write_u128, read_u128;
    i16 => write_i16, read_i16;
    i32 => write_i32, read_i32;
    i64 => write_i64, read_i64;
    i128 => write_i128, read_i128;
    f32 => write_f32, read_f32;
    f64 => write_f64, read_f64;
}

impl DataIo for u8 {
    fn data_store(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_u8(*self)
    }

    fn data_load(&mut self, r: &mut dyn Read) -> io::Result<()> {
        *self = r.read_u8()?;
        Ok(())
    }
}

impl DataIo for i8 {
    fn data_store(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_i8(*self)
    }

    fn data_load(&mut self, r: &mut dyn Read) -> io::Result<()> {
        *self = r.read_i8()?;
        Ok(())
    }
}

impl DataIo for usize {
    fn data_store(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_u64::<LittleEndian>(*self as u64)
    }

    fn data_load(&mut self, r: &mut dyn Read) -> io::Result<()> {
        let raw = r.read_u64::<LittleEndian>()?;
        *self = usize::try_from(raw)
            .map_err(|_| invalid_data(format!("{} does not fit usize", raw)))?;
        Ok(())
    }
}

impl DataIo for isize {
    fn data_store(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_i64::<LittleEndian>(*self as i64)
    }

    fn data_load(&mut self, r: &mut dyn Read) -> io::Result<()> {
        let raw = r.read_i64::<LittleEndian>()?;
        *self = isize::try_from(raw)
            .map_err(|_| invalid_data(format!("{} does not fit isize", raw)))?;
        Ok(())
    }
}

impl DataIo for bool {
    fn data_store(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_u8(u8::from(*self))
    }

    fn data_load(&mut self, r: &mut dyn Read) -> io::Result<()> {
        *self = match r.read_u8()? {
            0 => false,
            1 => true,
            other => return Err(invalid_data(format!("invalid bool byte {:#04x}", other))),
        };
        Ok(())
    }
}

impl DataIo for char {
    fn data_store(&self, w: &mut dyn Write) -> io::Result<()> {
        w.write_u32::<LittleEndian>(u32::from(*self))
    }

    fn data_load(&mut self, r: &mut dyn Read) -> io::Result<()> {
        let raw = r.read_u32::<LittleEndian>()?;
        *self = char::from_u32(raw)
            .ok_or_else(|| invalid_data(format!("invalid char {:#x}", raw)))?;
        Ok(())
    }
}

impl DataIo for String {
    fn data_store(&self, w: &mut dyn Write) -> io::Result<()> {
        write_len(w, self.len())?;
        w.write_all(self.as_bytes())
    }

    fn data_load(&mut self, r: &mut dyn Read) -> io::Result<()> {
        let len = read_len(r)?;
        let mut bytes = Vec::with_capacity(len.min(MAX_PREALLOC));
        r.take(len as u64).read_to_end(&mut bytes)?;
        if bytes.len() != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("string truncated: expected {} bytes, got {}", len, bytes.len()),
            ));
        }
        *self = String::from_utf8(bytes).map_err(|e| invalid_data(e.to_string()))?;
        Ok(())
    }
}

impl<T: DataIo + Default> DataIo for Vec<T> {
    fn data_store(&self, w: &mut dyn Write) -> io::Result<()> {
        write_len(w, self.len())?;
        for item in self {
            item.data_store(w)?;
        }
        Ok(())
    }

    fn data_load(&mut self, r: &mut dyn Read) -> io::Result<()> {
        let len = read_len(r)?;
        self.clear();
        self.reserve(len.min(MAX_PREALLOC));
        for _ in 0..len {
            let mut item = T::default();
            item.data_load(r)?;
            self.push(item);
        }
        Ok(())
    }
}

impl<T: DataIo + Default> DataIo for Option<T> {
    fn data_store(&self, w: &mut dyn Write) -> io::Result<()> {
        match self {
            Some(value) => {
                w.write_u8(1)?;
                value.data_store(w)
            }
            None => w.write_u8(0),
        }
    }

    fn data_load(&mut self, r: &mut dyn Read) -> io::Result<()> {
        let mut present = false;
        present.data_load(r)?;
        *self = if present {
            let mut value = T::default();
            value.data_load(r)?;
            Some(value)
        } else {
            None
        };
        Ok(())
    }
}

impl<T: DataIo, const N: usize> DataIo for [T; N] {
    fn data_store(&self, w: &mut dyn Write) -> io::Result<()> {
        for item in self {
            item.data_store(w)?;
        }
        Ok(())
    }

    fn data_load(&mut self, r: &mut dyn Read) -> io::Result<()> {
        for item in self.iter_mut() {
            item.data_load(r)?;
        }
        Ok(())
    }
}

impl<A: DataIo, B: DataIo> DataIo for (A, B) {
    fn data_store(&self, w: &mut dyn Write) -> io::Result<()> {
        self.0.data_store(w)?;
        self.1.data_store(w)
    }

    fn data_load(&mut self, r: &mut dyn Read) -> io::Result<()> {
        self.0.data_load(r)?;
        self.1.data_load(r)
    }
}

impl<A: DataIo, B: DataIo, C: DataIo> DataIo for (A, B, C) {
    fn data_store(&self, w: &mut dyn Write) -> io::Result<()> {
        self.0.data_store(w)?;
        self.1.data_store(w)?;
        self.2.data_store(w)
    }

    fn data_load(&mut self, r: &mut dyn Read) -> io::Result<()> {
        self.0.data_load(r)?;
        self.1.data_load(r)?;
        self.2.data_load(r)
    }
}

impl<K, V> DataIo for BTreeMap<K, V>
where
    K: DataIo + Default + Ord,
    V: DataIo + Default,
{
    fn data_store(&self, w: &mut dyn Write) -> io::Result<()> {
        write_len(w, self.len())?;
        for (key, value) in self {
            key.data_store(w)?;
            value.data_store(w)?;
        }
        Ok(())
    }

    fn data_load(&mut self, r: &mut dyn Read) -> io::Result<()> {
        let len = read_len(r)?;
        self.clear();
        for _ in 0..len {
            let mut key = K::default();
            key.data_load(r)?;
            let mut value = V::default();
            value.data_load(r)?;
            self.insert(key, value);
        }
        Ok(())
    }
}

/// Any serde type, stored as a length-prefixed MessagePack blob
///
/// Use this for structured state that already derives `Serialize` and
/// `Deserialize` instead of writing a field-by-field [`DataIo`] impl.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Msgpack<T>(pub T);

impl<T: Serialize + DeserializeOwned> DataIo for Msgpack<T> {
    fn data_store(&self, w: &mut dyn Write) -> io::Result<()> {
        let bytes = rmp_serde::to_vec(&self.0).map_err(|e| invalid_data(e.to_string()))?;
        write_len(w, bytes.len())?;
        w.write_all(&bytes)
    }

    fn data_load(&mut self, r: &mut dyn Read) -> io::Result<()> {
        let len = read_len(r)?;
        let mut bytes = Vec::with_capacity(len.min(MAX_PREALLOC));
        r.take(len as u64).read_to_end(&mut bytes)?;
        if bytes.len() != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("msgpack blob truncated: expected {} bytes, got {}", len, bytes.len()),
            ));
        }
        self.0 = rmp_serde::from_slice(&bytes).map_err(|e| invalid_data(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored<T: DataIo>(value: &T) -> Vec<u8> {
        let mut buf = Vec::new();
        value.data_store(&mut buf).unwrap();
        buf
    }

    fn reload<T: DataIo + Default>(bytes: &[u8]) -> (T, usize) {
        let mut cursor = io::Cursor::new(bytes);
        let mut value = T::default();
        value.data_load(&mut cursor).unwrap();
        (value, cursor.position() as usize)
    }

    #[test]
    fn test_integer_layout_little_endian() {
        assert_eq!(stored(&0x0102_0304u32), vec![4, 3, 2, 1]);
        assert_eq!(stored(&42i64).len(), 8);
        assert_eq!(stored(&7usize).len(), 8);
    }

    #[test]
    fn test_string_consumes_exact_bytes() {
        let bytes = stored(&"hello".to_string());
        assert_eq!(bytes.len(), 8 + 5);
        let (value, consumed): (String, usize) = reload(&bytes);
        assert_eq!(value, "hello");
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_string_invalid_utf8() {
        let mut bytes = Vec::new();
        write_len(&mut bytes, 2).unwrap();
        bytes.extend_from_slice(&[0xff, 0xfe]);
        let mut value = String::new();
        let err = value.data_load(&mut io::Cursor::new(bytes)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_string_truncated() {
        let mut bytes = Vec::new();
        write_len(&mut bytes, 10).unwrap();
        bytes.extend_from_slice(b"abc");
        let mut value = String::new();
        let err = value.data_load(&mut io::Cursor::new(bytes)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_invalid_bool_rejected() {
        let mut value = false;
        let err = value.data_load(&mut io::Cursor::new(vec![2u8])).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_nested_collections() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), vec![Some(1.5f64), None]);
        map.insert("b".to_string(), vec![]);
        let bytes = stored(&map);
        let (value, consumed): (BTreeMap<String, Vec<Option<f64>>>, usize) = reload(&bytes);
        assert_eq!(value, map);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_vec_load_replaces_contents() {
        let bytes = stored(&vec![1u32, 2]);
        let mut value = vec![9u32, 9, 9, 9];
        value.data_load(&mut io::Cursor::new(bytes)).unwrap();
        assert_eq!(value, vec![1, 2]);
    }

    #[test]
    fn test_array_and_tuple() {
        let value = ([1i16, -2, 3], (true, 'x', 2u8));
        let bytes = stored(&value);
        let (back, _): (([i16; 3], (bool, char, u8)), usize) = reload(&bytes);
        assert_eq!(back, value);
    }

    #[test]
    fn test_msgpack_wrapper() {
        #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
        struct Solver {
            iterations: u32,
            residuals: Vec<f64>,
        }

        let value = Msgpack(Solver {
            iterations: 12,
            residuals: vec![1e-3, 1e-6],
        });
        let bytes = stored(&value);
        let (back, consumed): (Msgpack<Solver>, usize) = reload(&bytes);
        assert_eq!(back, value);
        assert_eq!(consumed, bytes.len());
    }

    proptest::proptest! {
        #[test]
        fn prop_vec_of_strings_reloads(values in proptest::collection::vec(".*", 0..16)) {
            let bytes = stored(&values);
            let (back, consumed): (Vec<String>, usize) = reload(&bytes);
            proptest::prop_assert_eq!(back, values);
            proptest::prop_assert_eq!(consumed, bytes.len());
        }
    }
}
