//! 20-byte content addresses.

use std::fmt;

use sha2::{Digest, Sha256};

/// Length of a content address in bytes.
pub const HASH_LEN: usize = 20;

/// A 20-byte content address.
///
/// Equality is by bytes. The total order exists only so hashes can key
/// ordered maps; it carries no other meaning.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct Hash([u8; HASH_LEN]);

impl Hash {
    /// The all-zero hash, used as the address of absent values.
    pub const ZERO: Self = Self([0u8; HASH_LEN]);

    /// Wrap raw bytes as a hash.
    pub const fn new(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Content-address arbitrary bytes: SHA-256 truncated to 20 bytes.
    pub fn of(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut out = [0u8; HASH_LEN];
        out.copy_from_slice(&digest[..HASH_LEN]);
        Self(out)
    }

    /// Build a hash from at most 20 bytes, zero-padding at the high end.
    ///
    /// Inputs longer than 20 bytes keep their low-order (trailing) 20 bytes.
    pub fn from_padded(bytes: &[u8]) -> Self {
        let mut out = [0u8; HASH_LEN];
        if bytes.len() >= HASH_LEN {
            out.copy_from_slice(&bytes[bytes.len() - HASH_LEN..]);
        } else {
            out[HASH_LEN - bytes.len()..].copy_from_slice(bytes);
        }
        Self(out)
    }

    /// The raw bytes.
    pub const fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Whether this is the all-zero (absent) hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; HASH_LEN]
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({self})")
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Incremental hasher producing a 20-byte [`Hash`].
///
/// Used to content-address composite structures (tables, indexes) without
/// materializing their full encoding.
#[derive(Default)]
pub struct Hasher {
    inner: Sha256,
}

impl Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finish(self) -> Hash {
        let digest = self.inner.finalize();
        let mut out = [0u8; HASH_LEN];
        out.copy_from_slice(&digest[..HASH_LEN]);
        Hash::new(out)
    }
}
