//! Content digests
//!
//! Provides [`Digest`], a strongly-typed 32-byte Blake3 hash. Flow rules are
//! identified by the digest of their canonical encoding, and the compiler
//! pipeline uses intent digests to detect derivation cycles.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::error::ModelError;

/// A 32-byte content digest (Blake3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Create a digest from raw bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get reference to the underlying bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create digest from byte slice
    ///
    /// # Errors
    /// Returns error if slice length is not exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ModelError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| ModelError::InvalidDigest {
            expected: 32,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Compute Blake3 digest of arbitrary data
    #[inline]
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Compute digest of a serializable value (JSON encoding)
    ///
    /// Struct fields serialize in declaration order and maps used by the model
    /// are `BTreeMap`s, so the encoding is canonical.
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn of<T: serde::Serialize>(value: &T) -> Result<Self, ModelError> {
        let json = serde_json::to_vec(value)?;
        Ok(Self::compute(&json))
    }

    /// Short string representation (first 16 hex chars)
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }

    /// Fold the leading bytes into a `u64` (used for partition mapping)
    #[inline]
    #[must_use]
    pub fn prefix_u64(&self) -> u64 {
        let mut head = [0u8; 8];
        head.copy_from_slice(&self.0[..8]);
        u64::from_le_bytes(head)
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for Digest {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }
}

impl serde::Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_compute_deterministic() {
        assert_eq!(Digest::compute(b"rule"), Digest::compute(b"rule"));
        assert_ne!(Digest::compute(b"rule-a"), Digest::compute(b"rule-b"));
    }

    #[test]
    fn digest_from_slice_invalid_length() {
        let result = Digest::from_slice(&[1u8; 31]);
        assert!(matches!(
            result,
            Err(ModelError::InvalidDigest { expected: 32, actual: 31 })
        ));
    }

    #[test]
    fn digest_display_and_parse() {
        let digest = Digest::compute(b"test");
        let parsed: Digest = digest.to_string().parse().unwrap();
        assert_eq!(digest, parsed);
        assert!(digest.to_string().starts_with(&digest.short()));
    }

    #[test]
    fn digest_serde_as_hex_string() {
        let digest = Digest::compute(b"test");
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json.len(), 66);
        let decoded: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(digest, decoded);
    }
}
