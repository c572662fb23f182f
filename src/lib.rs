//! # cdb
//!
//! `cdb` is a Rust implementation of D. J. Bernstein's cdb (constant database)
//! format: an immutable, on-disk, write-once key to multi-value store
//! optimized for fast lookup by key.
//!
//! This library provides `CdbWriter` (and the atomic-publish `AtomicCdbWriter`)
//! for creating cdb files, `Cdb` for reading existing cdb files, `CdbIterator`/
//! `CdbKeyIterator` for iterating over them, and a `DumpReader`/`DumpWriter`
//! pair for the textual `cdbmake` dump interchange format.
//!
//! ## Features
//!
//! - CDB file creation (`CdbWriter`, `AtomicCdbWriter`)
//! - CDB file reading and key lookups, including multi-value keys (`Cdb`)
//! - Database iteration, full and per-key (`CdbIterator`, `CdbKeyIterator`)
//! - The cdbmake dump text format (`DumpReader`, `DumpWriter`)
//! - A thin builder that streams a dump straight into a cdb file (`build_from_dump`)
//! - Support for custom hash functions (defaults to the cdb hash, `CdbHash`)
//!
//! ## Usage Examples
//!
//! ### Creating and Reading a CDB File
//!
//! ```rust
//! use cdb::{CdbWriter, Cdb, Error, CdbHash};
//! use tempfile::NamedTempFile;
//! use std::fs::File;
//!
//! fn main() -> Result<(), Error> {
//!     let temp_file = NamedTempFile::new().expect("Failed to create temp file");
//!     let path = temp_file.path();
//!
//!     let mut writer = CdbWriter::<File, CdbHash>::create(path)?;
//!     writer.put(b"hello", b"world")?;
//!     writer.put(b"rust", b"is awesome")?;
//!     writer.finalize()?;
//!
//!     let cdb = Cdb::<File, CdbHash>::open(path)?;
//!
//!     if let Some(value) = cdb.find_one(b"hello")? {
//!         println!("Found value: {}", String::from_utf8_lossy(&value));
//!     }
//!
//!     assert!(cdb.find_one(b"nonexistent")?.is_none());
//!
//!     Ok(())
//! }
//! ```
//!
//! ### Multi-value keys
//!
//! ```rust
//! use cdb::{CdbWriter, Cdb, Error, CdbHash};
//! use std::io::Cursor;
//!
//! fn main() -> Result<(), Error> {
//!     let mut writer = CdbWriter::<_, CdbHash>::new(Cursor::new(Vec::new()))?;
//!     writer.put(b"multi", b"first")?;
//!     writer.put(b"multi", b"second")?;
//!     writer.finalize()?;
//!
//!     let cdb = Cdb::<_, CdbHash>::new(writer.into_inner()?)?;
//!     assert_eq!(cdb.find_all(b"multi")?, vec![b"first".to_vec(), b"second".to_vec()]);
//!     Ok(())
//! }
//! ```

mod builder;
mod cdb;
mod dump;
mod hash;
mod iterator;
mod util;
mod writer;

// re-exports
pub use builder::{build_from_dump, CdbBuilder};
pub use cdb::{Cdb, MAX_LEN};
pub use dump::{AtomicDumpWriter, DumpReader, DumpWriter};
pub use hash::{cdb_hash, hash_div_256, hash_mod_256, CdbHash};
pub use iterator::{CdbIterator, CdbKeyIterator};
pub use util::ReaderAt;
pub use writer::{AtomicCdbWriter, CdbWriter};

/// Three-way error taxonomy: filesystem failures (`Io`), grammar/layout
/// violations in an otherwise-readable byte stream (`Format`), and caller
/// misuse of an already-closed or already-finalized resource (`State`,
/// represented here by `WriterFinalized`/`WriterNotFinalized`/`IteratorExhausted`).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error occurred during data conversion, typically when trying to convert a slice to an array.
    #[error("Data conversion error: {source} when converting to {data_type}")]
    Convert {
        /// The underlying slice conversion error.
        source: std::array::TryFromSliceError,
        /// The name of the type that the conversion was attempting to create.
        data_type: &'static str,
    },

    /// The bytes were readable but violated the cdb binary layout or the
    /// dump grammar: a bad prefix, a missing separator, a length above
    /// `MAX_LEN`, a truncated record, a missing trailer, or a zero-length
    /// cdb file.
    #[error("malformed cdb data: {0}")]
    Format(String),

    /// Indicates that the database is full.
    /// CDB files have a size limit related to internal offsets or counts.
    #[error(
        "Database is full: CDB files have a size limit (related to internal offsets or counts)"
    )]
    DatabaseFull,

    /// Indicates an attempt to operate on a writer that has already been finalized.
    #[error("Attempted to operate on a finalized writer")]
    WriterFinalized,

    /// Indicates an attempt to use a writer that has not been finalized yet when finalization is required.
    #[error("Writer has not been finalized yet")]
    WriterNotFinalized,

    /// A lazy sequence (a dump or key iterator) was advanced past the point
    /// where it had already signaled exhaustion.
    #[error("iterator has already been exhausted")]
    IteratorExhausted,

    /// An internal error, often indicating a bug or unexpected state.
    #[error("Internal error: {0}")]
    Internal(String),
}
