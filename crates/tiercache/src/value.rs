//! The byte-serialization contract values must satisfy to be cacheable.

/// A value that can round-trip through bytes.
///
/// This is the sole requirement for storing a type in a
/// [`Cache`](crate::Cache). Both directions are fallible: `decode`
/// returns `None` for bytes that do not represent a valid value, and
/// `encode` returns `None` when the value cannot be serialized.
///
/// The round-trip need not be byte-identical, but
/// `Self::decode(&v.encode()?)` must yield a value semantically equal
/// to `v`.
pub trait CacheValue: Sized {
    /// Decodes a value from its stored byte representation.
    fn decode(bytes: &[u8]) -> Option<Self>;

    /// Encodes the value into bytes suitable for the disk tier.
    fn encode(&self) -> Option<Vec<u8>>;
}

impl CacheValue for Vec<u8> {
    fn decode(bytes: &[u8]) -> Option<Self> {
        Some(bytes.to_vec())
    }

    fn encode(&self) -> Option<Vec<u8>> {
        Some(self.clone())
    }
}

impl CacheValue for String {
    fn decode(bytes: &[u8]) -> Option<Self> {
        String::from_utf8(bytes.to_vec()).ok()
    }

    fn encode(&self) -> Option<Vec<u8>> {
        Some(self.as_bytes().to_vec())
    }
}

impl CacheValue for serde_json::Value {
    fn decode(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }

    fn encode(&self) -> Option<Vec<u8>> {
        serde_json::to_vec(self).ok()
    }
}
