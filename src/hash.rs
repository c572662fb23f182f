use std::hash::Hasher;

/// The initial seed value for the CDB hash function.
const CDB_HASH_START_VALUE: u32 = 5381;

/// Implements the CDB hash function.
///
/// This hash function is D. J. Bernstein's DJB variant. It is used by cdb
/// to distribute keys across the 256 main-table buckets. All arithmetic
/// wraps modulo 2^32; bytes are zero-extended, never sign-extended.
///
/// # Examples
///
/// ```
/// use std::hash::Hasher;
/// use cdb::CdbHash;
///
/// let mut hasher = CdbHash::new();
/// hasher.write(b"some data");
/// let hash_value = hasher.finish();
/// println!("Hash: {}", hash_value);
/// ```
#[derive(Clone)]
pub struct CdbHash {
    state: u32,
}

impl Default for CdbHash {
    fn default() -> Self {
        Self::new()
    }
}

impl CdbHash {
    /// Creates a new `CdbHash` instance, initialized with the CDB starting value.
    pub fn new() -> Self {
        CdbHash {
            state: CDB_HASH_START_VALUE,
        }
    }

    /// The raw 32-bit cdb hash, as stored on disk.
    pub fn hash32(&self) -> u32 {
        self.state
    }
}

impl Hasher for CdbHash {
    /// Widens the 32-bit cdb hash to satisfy `std::hash::Hasher`. Code that
    /// needs the on-disk hash should use [`CdbHash::hash32`] instead.
    fn finish(&self) -> u64 {
        self.state as u64
    }

    /// The hash state is updated for each byte in the input slice according
    /// to the formula: `hash = (hash * 33) ^ byte` (wrapping arithmetic).
    fn write(&mut self, bytes: &[u8]) {
        let mut val = self.state;
        for &byte in bytes {
            val = val.wrapping_mul(33) ^ (byte as u32);
        }
        self.state = val;
    }

    /// Convenience method that converts the `u32` to its little-endian byte
    /// representation and then calls `write`.
    fn write_u32(&mut self, i: u32) {
        self.write(&i.to_le_bytes());
    }
}

/// Computes the cdb hash of `bytes` directly.
pub fn cdb_hash(bytes: &[u8]) -> u32 {
    let mut hasher = CdbHash::new();
    hasher.write(bytes);
    hasher.hash32()
}

/// Selects the main-table bucket for a hash: `hash mod 256`.
pub fn hash_mod_256(hash: u32) -> u32 {
    hash & 0xff
}

/// Selects the sub-table initial probe index contribution: `hash div 256`.
pub fn hash_div_256(hash: u32) -> u32 {
    hash >> 8
}
