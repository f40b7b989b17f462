//! Type identity for restartable values
//!
//! A [`TypeIdentity`] travels with every value into the checkpoint header so
//! the reader can refuse to reinterpret bytes written for another type.
//! It is plain data (hash + name) rather than live runtime type info, which
//! keeps the on-disk check independent of how the compiler lays out `TypeId`.

use std::fmt;

use xxhash_rust::xxh3::xxh3_64;

/// Stable identity of a stored value's type
///
/// Two values of the same concrete type report identical hash and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeIdentity {
    /// 64-bit type hash
    pub hash: u64,
    /// Human-readable type name
    pub name: String,
}

impl TypeIdentity {
    /// Create an identity from an explicit hash and name
    pub fn new(hash: u64, name: impl Into<String>) -> Self {
        TypeIdentity {
            hash,
            name: name.into(),
        }
    }

    /// Identity derived from a type name
    ///
    /// The hash is xxh3-64 over the UTF-8 name.
    pub fn from_name(name: impl Into<String>) -> Self {
        let name = name.into();
        TypeIdentity {
            hash: xxh3_64(name.as_bytes()),
            name,
        }
    }

    /// Identity of the Rust type `T`
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::from_name(std::any::type_name::<T>())
    }

    /// Whether a stored identity is compatible with this one
    ///
    /// Hash equality is the primary check. Hashes produced by a different
    /// hashing scheme (another toolchain, a custom `new` identity) fall
    /// back to comparing the names.
    pub fn matches(&self, other: &TypeIdentity) -> bool {
        self.hash == other.hash || self.name == other.name
    }
}

impl fmt::Display for TypeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#018x})", self.name, self.hash)
    }
}

/// Fingerprint of the basic type representation of this build
///
/// Written once into every checkpoint header as a canary for gross ABI
/// differences between writer and reader (pointer width, float type
/// naming). It deliberately ignores every registered value type.
pub fn basic_type_fingerprint() -> u64 {
    let canary = format!(
        "{}:{}:{}",
        std::any::type_name::<f64>(),
        std::mem::size_of::<usize>(),
        std::mem::align_of::<f64>()
    );
    xxh3_64(canary.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_of_is_stable() {
        assert_eq!(TypeIdentity::of::<u64>(), TypeIdentity::of::<u64>());
        assert_eq!(TypeIdentity::of::<String>().name, std::any::type_name::<String>());
    }

    #[test]
    fn test_identity_differs_between_types() {
        let a = TypeIdentity::of::<i32>();
        let b = TypeIdentity::of::<String>();
        assert_ne!(a.hash, b.hash);
        assert!(!a.matches(&b));
    }

    #[test]
    fn test_matches_falls_back_to_name() {
        let ours = TypeIdentity::of::<Vec<f64>>();
        let foreign = TypeIdentity::new(0xdead_beef, ours.name.clone());
        assert!(ours.matches(&foreign));
    }

    #[test]
    fn test_matches_on_hash_alone() {
        let ours = TypeIdentity::new(7, "a");
        let theirs = TypeIdentity::new(7, "b");
        assert!(ours.matches(&theirs));
    }

    #[test]
    fn test_display_contains_name_and_hash() {
        let id = TypeIdentity::new(0x10, "thing");
        let shown = id.to_string();
        assert!(shown.contains("thing"));
        assert!(shown.contains("0x0000000000000010"));
    }

    #[test]
    fn test_fingerprint_deterministic() {
        assert_eq!(basic_type_fingerprint(), basic_type_fingerprint());
    }
}
