use std::{
    fs::{File, OpenOptions},
    hash::Hasher,
    io::{Seek, SeekFrom, Write},
    marker::PhantomData,
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;

use crate::{
    Error,
    cdb::{Cdb, HEADER_SIZE, MAX_LEN, TableEntry},
    hash::{CdbHash, hash_div_256, hash_mod_256},
    util::write_pair,
};

#[derive(Debug)]
struct Entry {
    hash_val: u32,
    offset: u32,
}

/// Streams records into a new cdb file and materializes the 256 sub-tables
/// and the header on `finalize`.
///
/// `CdbWriter` writes directly to whatever `W: Write + Seek` it was given —
/// for a file on disk this means the target path is live and incomplete
/// until `finalize` returns. Most production callers should prefer
/// [`AtomicCdbWriter`], which publishes the finished file with a rename.
pub struct CdbWriter<W: Write + Seek, H: Hasher + Default = CdbHash> {
    writer: W,
    entries_by_table: [Vec<Entry>; 256],
    is_finalized: bool,
    current_data_offset: u64,
    _hasher: PhantomData<H>,
}

impl<H: Hasher + Default> CdbWriter<File, H> {
    /// Opens `path` for writing, truncating any existing content. This is
    /// the *direct* construction mode of §4.4: the target file is live
    /// (and potentially corrupt) until `finalize` succeeds.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, Error> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Self::new(file)
    }
}

impl<W: Write + Seek, H: Hasher + Default> CdbWriter<W, H> {
    /// Wraps an arbitrary `Write + Seek` destination (a file, or an
    /// in-memory `Cursor<Vec<u8>>` for tests) and reserves the 2048-byte
    /// header placeholder.
    pub fn new(mut writer: W) -> Result<Self, Error> {
        writer.seek(SeekFrom::Start(0))?;
        let header_placeholder = vec![0u8; HEADER_SIZE as usize];
        writer.write_all(&header_placeholder)?;

        Ok(CdbWriter {
            writer,
            entries_by_table: [const { Vec::new() }; 256],
            is_finalized: false,
            current_data_offset: HEADER_SIZE,
            _hasher: PhantomData,
        })
    }

    /// Inserts a key-value pair into the cdb database.
    ///
    /// # Behavior
    ///
    /// - **Duplicate keys**: inserting the same key more than once is
    ///   allowed; every value is stored. `Cdb::find_one` returns only the
    ///   first match in probe order; `Cdb::find_all`/`Cdb::iter_key` return
    ///   all of them, in insertion order.
    /// - **Empty keys/values**: both are valid and supported.
    ///
    /// # Errors
    ///
    /// - `Error::WriterFinalized` if called after `finalize()`.
    /// - `Error::Format` if `key` or `value` exceeds `MAX_LEN` bytes.
    /// - `Error::DatabaseFull` if the record offset would no longer fit in
    ///   32 bits.
    /// - `Error::Io` if the underlying writer fails.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        if self.is_finalized {
            return Err(Error::WriterFinalized);
        }

        if key.len() > MAX_LEN as usize || value.len() > MAX_LEN as usize {
            return Err(Error::Format(format!(
                "key/value length exceeds MAX_LEN ({MAX_LEN} bytes)"
            )));
        }

        let record_offset =
            u32::try_from(self.current_data_offset).map_err(|_| Error::DatabaseFull)?;

        self.writer
            .seek(SeekFrom::Start(self.current_data_offset))?;
        write_pair(&mut self.writer, key.len() as u32, value.len() as u32)?;
        self.writer.write_all(key)?;
        self.writer.write_all(value)?;

        let mut hasher = H::default();
        hasher.write(key);
        let hash_val = hasher.finish() as u32;
        let table_idx = hash_mod_256(hash_val) as usize;

        self.entries_by_table[table_idx].push(Entry {
            hash_val,
            offset: record_offset,
        });

        self.current_data_offset += 8 + key.len() as u64 + value.len() as u64;
        Ok(())
    }

    /// Writes the 256 sub-tables and the main table header, per §4.8.
    ///
    /// The main-table entry for an empty bucket still records the current
    /// sub-table cursor as its offset (with a zero entry count) rather than
    /// zero: this is what lets [`Cdb::iter`] use `MainTable[0].offset`
    /// directly as the end of the records region, whether or not bucket 0
    /// happens to be populated.
    fn write_footer_and_header(&mut self) -> Result<(), Error> {
        if self.is_finalized {
            return Ok(());
        }

        self.writer.flush()?;

        let mut final_header_entries = [TableEntry::default(); 256];
        let mut sub_tables_cursor = self.current_data_offset;

        for (i, entries_in_this_table) in self.entries_by_table.iter().enumerate() {
            let cursor_u32 =
                u32::try_from(sub_tables_cursor).map_err(|_| Error::DatabaseFull)?;

            if entries_in_this_table.is_empty() {
                final_header_entries[i] = TableEntry {
                    offset: cursor_u32,
                    length: 0,
                };
                continue;
            }

            let num_slots = entries_in_this_table.len() as u32 * 2;
            let mut slots_data = vec![(0u32, 0u32); num_slots as usize];

            final_header_entries[i] = TableEntry {
                offset: cursor_u32,
                length: num_slots,
            };

            for entry in entries_in_this_table {
                let mut slot_idx = hash_div_256(entry.hash_val) % num_slots;
                loop {
                    if slots_data[slot_idx as usize].1 == 0 {
                        slots_data[slot_idx as usize] = (entry.hash_val, entry.offset);
                        break;
                    }
                    slot_idx = (slot_idx + 1) % num_slots;
                }
            }

            self.writer.seek(SeekFrom::Start(sub_tables_cursor))?;
            for (hash_val, data_offset) in slots_data {
                write_pair(&mut self.writer, hash_val, data_offset)?;
            }
            sub_tables_cursor += (num_slots as u64) * 8;
        }

        self.writer.seek(SeekFrom::Start(0))?;
        for table_entry in final_header_entries.iter() {
            write_pair(&mut self.writer, table_entry.offset, table_entry.length)?;
        }

        self.is_finalized = true;

        Ok(())
    }

    /// Finishes building the database: writes the sub-tables and header,
    /// then flushes. In direct mode the target path is now a valid,
    /// complete cdb file.
    pub fn finalize(&mut self) -> Result<(), Error> {
        self.write_footer_and_header()?;
        self.writer.flush()?;
        Ok(())
    }

    /// Consumes the `CdbWriter` and returns the underlying writer. Must be
    /// called after `finalize()`; returns `Error::WriterNotFinalized`
    /// otherwise.
    pub fn into_inner(mut self) -> Result<W, Error> {
        if !self.is_finalized {
            return Err(Error::WriterNotFinalized);
        }

        self.writer.flush()?;

        Ok(self.writer)
    }
}

impl<H: Hasher + Default> CdbWriter<File, H> {
    /// Finalizes the writer, flushes to disk, and reopens the same path as
    /// a `Cdb` reader. Useful for direct-mode callers that want to start
    /// reading back immediately; production writers that need atomic
    /// publication should use [`AtomicCdbWriter`] instead.
    pub fn freeze(mut self, path_to_reopen: &Path) -> Result<Cdb<File, H>, Error> {
        self.write_footer_and_header()?;
        self.writer.flush()?;

        Cdb::open(path_to_reopen)
    }
}

/// A `CdbWriter` that publishes atomically: records are written to a
/// temporary file in the target's own directory (so the final rename is
/// guaranteed to be on the same filesystem), and `finalize` renames it over
/// the target path only once the sub-tables and header are durably
/// flushed. Any failure — during `put` or during `finalize` — deletes the
/// temp file and leaves the target untouched, per §4.8/§4.9/§5.
pub struct AtomicCdbWriter<H: Hasher + Default = CdbHash> {
    inner: CdbWriter<File, H>,
    temp: NamedTempFile,
    target: PathBuf,
}

impl<H: Hasher + Default> AtomicCdbWriter<H> {
    /// Creates a temp file in `target`'s parent directory and opens a
    /// `CdbWriter` on it.
    pub fn create(target: impl AsRef<Path>) -> Result<Self, Error> {
        let target = target.as_ref().to_path_buf();
        let dir = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let temp = NamedTempFile::new_in(dir)?;
        let file = temp.reopen()?;
        let inner = CdbWriter::new(file)?;

        Ok(AtomicCdbWriter {
            inner,
            temp,
            target,
        })
    }

    /// See [`CdbWriter::put`].
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.inner.put(key, value).inspect_err(|_| {
            let _ = std::fs::remove_file(self.temp.path());
        })
    }

    /// Finalizes the underlying writer and atomically renames the temp
    /// file onto the target path, replacing any existing file there.
    pub fn finalize(mut self) -> Result<(), Error> {
        if let Err(e) = self.inner.finalize() {
            let _ = std::fs::remove_file(self.temp.path());
            return Err(e);
        }

        self.temp.persist(&self.target).map_err(|e| e.error)?;
        Ok(())
    }
}

// `AtomicCdbWriter` carries no `Drop` impl of its own: `NamedTempFile`
// already deletes its backing file when dropped without having been
// `persist`ed, so an `AtomicCdbWriter` abandoned before `finalize` (or one
// whose `finalize` failed) leaves no temp file behind for free.
