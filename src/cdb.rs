use std::fs::File;
use std::hash::Hasher;
use std::io::{self, ErrorKind};
use std::marker::PhantomData;
use std::path::Path;

#[cfg(feature = "mmap")]
use memmap2::Mmap;

use crate::Error;
use crate::hash::{hash_div_256, hash_mod_256};
use crate::util::{ReaderAt, read_pair};

/// The size of the cdb header in bytes: 256 entries, each a `(u32, u32)` pair
/// giving a sub-table's file offset and entry count.
pub const HEADER_SIZE: u64 = 256 * 8;

/// The maximum permitted length, in bytes, of any single key or value:
/// `0x0FFFFFFF` (approximately 256 MiB). Keeping key/value lengths under
/// this bound guarantees that every file offset fits in 32 bits.
pub const MAX_LEN: u32 = 0x0FFF_FFFF;

/// Represents a single entry in the header's hash table.
/// Each entry points to a sub-table that stores key-value pair records.
#[derive(Debug, Copy, Clone, Default)]
pub(crate) struct TableEntry {
    pub(crate) offset: u32,
    pub(crate) length: u32,
}

/// Represents an open cdb database. It can only be used for reads.
///
/// A `Cdb` instance provides read-only access to the database. To create or
/// modify a cdb database, use `CdbWriter` or `AtomicCdbWriter`.
///
/// The `Cdb` struct is generic over `R: ReaderAt` and `H: Hasher + Default`,
/// allowing it to work with different underlying data sources (e.g.,
/// `std::fs::File` or in-memory buffers) as long as they implement the
/// `ReaderAt` trait. Every lookup is a sequence of positioned reads rather
/// than seek-then-read, so a single `Cdb` may be shared across threads and
/// looked up concurrently without an internal mutex.
///
/// # Examples
///
/// Opening a cdb file and retrieving a value:
///
/// ```
/// use cdb::{Cdb, CdbWriter, CdbHash};
/// use std::fs::File;
///
/// fn main() -> std::io::Result<()> {
///     # let file = File::create("test.cdb")?;
///     # let mut writer = CdbWriter::<_, CdbHash>::new(file).unwrap();
///     # writer.put(b"key", b"value").unwrap();
///     # writer.finalize().unwrap();
///     let cdb = Cdb::<_, CdbHash>::open("test.cdb").unwrap();
///     if let Some(value) = cdb.find_one(b"key").unwrap() {
///         println!("Value: {:?}", value);
///     } else {
///         println!("Key not found");
///     }
///     # std::fs::remove_file("test.cdb")?;
///     Ok(())
/// }
/// ```
pub struct Cdb<R, H> {
    pub(crate) reader: R,
    pub(crate) header: [TableEntry; 256],
    _hasher: PhantomData<H>,
    #[cfg(feature = "mmap")]
    mmap: Option<Mmap>,
}

impl<H: Hasher + Default> Cdb<File, H> {
    /// Opens an existing cdb database from a file at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = File::open(path)?;
        Self::new(file)
    }

    /// Opens an existing cdb database from a file at the given path using
    /// memory-mapped I/O (mmap). Only available when the `mmap` feature is
    /// enabled.
    #[cfg(feature = "mmap")]
    pub fn open_mmap<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let mut cdb = Cdb {
            reader: file,
            header: [TableEntry::default(); 256],
            _hasher: PhantomData,
            mmap: Some(mmap),
        };
        cdb.read_header_from_mmap()?;
        Ok(cdb)
    }
}

impl<R: ReaderAt, H: Hasher + Default> Cdb<R, H> {
    /// Creates a new `Cdb` instance from an arbitrary `ReaderAt`, reading
    /// and validating the 2048-byte header immediately.
    pub fn new(reader: R) -> Result<Self, Error> {
        let mut cdb = Cdb {
            reader,
            header: [TableEntry::default(); 256],
            _hasher: PhantomData,
            #[cfg(feature = "mmap")]
            mmap: None,
        };
        cdb.read_header()?;
        Ok(cdb)
    }

    /// Reads the header from the cdb file into the `Cdb` struct. A file
    /// shorter than `HEADER_SIZE` bytes is not a valid cdb and is rejected
    /// with `Error::Format`.
    fn read_header(&mut self) -> Result<(), Error> {
        #[cfg(feature = "mmap")]
        if let Some(mmap_ref) = self.mmap.as_ref() {
            self.header = Self::read_header_from_mmap_internal(mmap_ref)?;
            return Ok(());
        }

        let mut header_buf = [0u8; HEADER_SIZE as usize];
        match self.reader.read_exact_at(&mut header_buf, 0) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                return Err(Error::Format(format!(
                    "cdb file is shorter than the {HEADER_SIZE}-byte header"
                )));
            }
            Err(e) => return Err(Error::Io(e)),
        }

        for i in 0..256 {
            let offset_bytes: [u8; 4] = header_buf[i * 8..i * 8 + 4].try_into().unwrap();
            let length_bytes: [u8; 4] = header_buf[i * 8 + 4..i * 8 + 8].try_into().unwrap();

            self.header[i] = TableEntry {
                offset: u32::from_le_bytes(offset_bytes),
                length: u32::from_le_bytes(length_bytes),
            };
        }
        Ok(())
    }

    #[cfg(feature = "mmap")]
    fn read_header_from_mmap(&mut self) -> Result<(), Error> {
        if let Some(mmap_ref) = self.mmap.as_ref() {
            self.header = Self::read_header_from_mmap_internal(mmap_ref)?;
            Ok(())
        } else {
            Err(Error::Internal("mmap not available for reading header".to_string()))
        }
    }

    #[cfg(feature = "mmap")]
    fn read_header_from_mmap_internal(mmap_ref: &Mmap) -> Result<[TableEntry; 256], Error> {
        if mmap_ref.len() < HEADER_SIZE as usize {
            return Err(Error::Format(format!(
                "cdb file is shorter than the {HEADER_SIZE}-byte header"
            )));
        }
        let header_buf = &mmap_ref[0..HEADER_SIZE as usize];
        let mut header = [TableEntry::default(); 256];

        for i in 0..256 {
            let offset_bytes: [u8; 4] = header_buf[i * 8..i * 8 + 4].try_into().unwrap();
            let length_bytes: [u8; 4] = header_buf[i * 8 + 4..i * 8 + 8].try_into().unwrap();

            header[i] = TableEntry {
                offset: u32::from_le_bytes(offset_bytes),
                length: u32::from_le_bytes(length_bytes),
            };
        }
        Ok(header)
    }

    /// Returns the first value stored under `key`, or `None` if the key is
    /// absent.
    ///
    /// # Process
    ///
    /// 1. Hashes `key` and uses `hash mod 256` to select one of the 256
    ///    header table entries.
    /// 2. If the selected entry's sub-table is empty, the key is absent.
    /// 3. Otherwise probes the sub-table linearly starting at
    ///    `(hash div 256) mod capacity`, wrapping at the end.
    /// 4. A slot whose hash and record offset are both zero terminates the
    ///    chain: the key is absent.
    /// 5. A slot whose stored hash matches is a candidate; the record at its
    ///    offset is read and its key compared byte-for-byte against `key`
    ///    (hash collisions are resolved here, not by the slot hash alone).
    pub fn find_one(&self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let hash_val = self.hash_key(key);
        let probe = match self.probe_start(hash_val) {
            Some(probe) => probe,
            None => return Ok(None),
        };

        for i in 0..probe.cap {
            let slot = (probe.start + i) % probe.cap;
            let slot_offset = probe.sub_table_offset + (slot as u64) * 8;

            let (slot_hash, rec_off) = read_pair(&self.reader, slot_offset)?;
            if slot_hash == 0 && rec_off == 0 {
                return Ok(None);
            }
            if slot_hash == hash_val {
                if let Some(value) = self.read_record_if_key_matches(rec_off as u64, key)? {
                    return Ok(Some(value));
                }
            }
        }
        Ok(None)
    }

    /// Returns every value stored under `key`, in the order the writer
    /// inserted them (linear-probe slot order, which equals insertion order
    /// for a given key since duplicate puts share the same probe start).
    pub fn find_all(&self, key: &[u8]) -> Result<Vec<Vec<u8>>, Error> {
        self.iter_key(key)?.collect()
    }

    /// Returns a lazy iterator over every value stored under `key`, streaming
    /// the same sequence `find_all` would materialize.
    pub fn iter_key<'a>(&'a self, key: &[u8]) -> Result<crate::iterator::CdbKeyIterator<'a, R, H>, Error> {
        crate::iterator::CdbKeyIterator::new(self, key)
    }

    pub(crate) fn hash_key(&self, key: &[u8]) -> u32 {
        let mut hasher = H::default();
        hasher.write(key);
        hasher.finish() as u32
    }

    pub(crate) fn probe_start(&self, hash_val: u32) -> Option<ProbePlan> {
        let table_idx = hash_mod_256(hash_val) as usize;
        let table_entry = self.header[table_idx];

        if table_entry.length == 0 {
            return None;
        }

        let cap = table_entry.length;
        let start = hash_div_256(hash_val) % cap;

        Some(ProbePlan {
            sub_table_offset: table_entry.offset as u64,
            cap,
            start,
        })
    }

    fn read_record_if_key_matches(
        &self,
        data_offset: u64,
        expected_key: &[u8],
    ) -> Result<Option<Vec<u8>>, Error> {
        #[cfg(feature = "mmap")]
        if let Some(mmap_ref) = self.mmap.as_ref() {
            return read_record_if_key_matches_mmap(mmap_ref, data_offset, expected_key);
        }

        let (key_len, val_len) = read_pair(&self.reader, data_offset)?;

        if key_len as usize != expected_key.len() {
            return Ok(None);
        }

        let mut key_buf = vec![0u8; key_len as usize];
        if key_len > 0 {
            self.reader.read_exact_at(&mut key_buf, data_offset + 8)?;
        }

        if key_buf != expected_key {
            return Ok(None);
        }

        let mut value_buf = vec![0u8; val_len as usize];
        if val_len > 0 {
            self.reader
                .read_exact_at(&mut value_buf, data_offset + 8 + key_len as u64)?;
        }
        Ok(Some(value_buf))
    }

    /// Returns an iterator over every key-value pair in the database, in
    /// insertion order. The iterator maintains its own cursor and does not
    /// interfere with concurrent lookups on the same `Cdb`.
    pub fn iter(&self) -> crate::iterator::CdbIterator<'_, R, H> {
        crate::iterator::CdbIterator::new(self)
    }

    /// Releases resources. `Cdb` holds nothing beyond `R` itself, which
    /// already releases its resources (a file descriptor, a mapping) on
    /// drop, so this method's only effect is consuming `self` early. It
    /// exists for parity with spec's explicit `Reader.close()` surface, and
    /// is idempotent by construction: since it takes `self` by value, a
    /// second call is not expressible — the moved-from value no longer
    /// exists to call it on.
    pub fn close(self) {}
}

/// The per-bucket plan for probing a sub-table: where it starts in the
/// file, how many slots it has, and which slot a lookup should start at.
#[derive(Debug, Copy, Clone)]
pub(crate) struct ProbePlan {
    pub(crate) sub_table_offset: u64,
    pub(crate) cap: u32,
    pub(crate) start: u32,
}

#[cfg(feature = "mmap")]
fn read_record_if_key_matches_mmap(
    mmap_ref: &Mmap,
    data_offset: u64,
    expected_key: &[u8],
) -> Result<Option<Vec<u8>>, Error> {
    let len_offset = data_offset as usize;
    if len_offset + 8 > mmap_ref.len() {
        return Err(Error::Io(io::Error::new(
            ErrorKind::UnexpectedEof,
            "record header extends beyond mmap bounds",
        )));
    }

    let key_len = u32::from_le_bytes(mmap_ref[len_offset..len_offset + 4].try_into().unwrap());
    let val_len =
        u32::from_le_bytes(mmap_ref[len_offset + 4..len_offset + 8].try_into().unwrap());

    if key_len as usize != expected_key.len() {
        return Ok(None);
    }

    let key_start = len_offset + 8;
    let key_end = key_start + key_len as usize;
    if key_end > mmap_ref.len() {
        return Err(Error::Format("record key extends beyond end of file".to_string()));
    }
    if &mmap_ref[key_start..key_end] != expected_key {
        return Ok(None);
    }

    let val_end = key_end + val_len as usize;
    if val_end > mmap_ref.len() {
        return Err(Error::Format("record value extends beyond end of file".to_string()));
    }
    Ok(Some(mmap_ref[key_end..val_end].to_vec()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::CdbHash;
    use crate::writer::CdbWriter;
    use std::hash::Hasher as StdHasher;
    use std::io::Cursor;
    #[cfg(feature = "mmap")]
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_in_memory_cdb_with_hasher<H: Hasher + Default + Clone + 'static>(
        records: &[(&[u8], &[u8])],
    ) -> Cdb<Cursor<Vec<u8>>, H> {
        let mut writer = CdbWriter::<_, H>::new(Cursor::new(Vec::new())).unwrap();
        for (key, value) in records {
            writer.put(key, value).unwrap();
        }
        writer.finalize().unwrap();
        let cursor = writer.into_inner().unwrap();
        Cdb::<_, H>::new(cursor).unwrap()
    }

    fn create_in_memory_cdb(records: &[(&[u8], &[u8])]) -> Cdb<Cursor<Vec<u8>>, CdbHash> {
        create_in_memory_cdb_with_hasher::<CdbHash>(records)
    }

    #[test]
    fn test_cdb_new_and_get_simple() {
        let records = vec![
            (b"key1".as_ref(), b"value1".as_ref()),
            (b"key2".as_ref(), b"value2".as_ref()),
        ];
        let cdb = create_in_memory_cdb(&records);

        assert_eq!(cdb.find_one(b"key1").unwrap().unwrap(), b"value1");
        assert_eq!(cdb.find_one(b"key2").unwrap().unwrap(), b"value2");
        assert!(cdb.find_one(b"key3").unwrap().is_none());
    }

    #[test]
    fn test_cdb_get_empty_key() {
        let records = vec![(b"".as_ref(), b"empty_value".as_ref())];
        let cdb = create_in_memory_cdb(&records);
        assert_eq!(cdb.find_one(b"").unwrap().unwrap(), b"empty_value");
    }

    #[test]
    fn test_cdb_get_empty_value() {
        let records = vec![(b"key_empty_val".as_ref(), b"".as_ref())];
        let cdb = create_in_memory_cdb(&records);
        assert_eq!(cdb.find_one(b"key_empty_val").unwrap().unwrap(), b"");
    }

    #[test]
    fn test_cdb_get_empty_key_and_value() {
        let records = vec![(b"".as_ref(), b"".as_ref())];
        let cdb = create_in_memory_cdb(&records);
        assert_eq!(cdb.find_one(b"").unwrap().unwrap(), b"");
    }

    #[test]
    fn test_cdb_get_from_empty_db() {
        let cdb = create_in_memory_cdb(&[]);
        assert!(cdb.find_one(b"any_key").unwrap().is_none());
    }

    #[test]
    fn test_cdb_open_non_existent_file() {
        let result = Cdb::<File, CdbHash>::open("non_existent_file.cdb");
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_cdb_open_and_get_from_file() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path();

        {
            let file = File::create(path).unwrap();
            let mut writer = CdbWriter::<_, CdbHash>::new(file).unwrap();
            writer.put(b"file_key", b"file_value").unwrap();
            writer.finalize().unwrap();
        }

        let cdb = Cdb::<File, CdbHash>::open(path).unwrap();
        assert_eq!(cdb.find_one(b"file_key").unwrap().unwrap(), b"file_value");
        assert!(cdb.find_one(b"other_key").unwrap().is_none());

        #[cfg(feature = "mmap")]
        {
            let cdb_mmap = Cdb::<File, CdbHash>::open_mmap(path).unwrap();
            assert_eq!(cdb_mmap.find_one(b"file_key").unwrap().unwrap(), b"file_value");
            assert!(cdb_mmap.find_one(b"other_key").unwrap().is_none());
        }
    }

    #[test]
    fn test_cdb_find_all_multi_value() {
        let records = vec![
            (b"multi".as_ref(), b"multi data 1".as_ref()),
            (b"multi".as_ref(), b"multi data 2".as_ref()),
        ];
        let cdb = create_in_memory_cdb(&records);
        assert_eq!(
            cdb.find_all(b"multi").unwrap(),
            vec![b"multi data 1".to_vec(), b"multi data 2".to_vec()]
        );
    }

    #[derive(Clone, Default)]
    struct CollisionHasher {
        state: u32,
    }

    impl StdHasher for CollisionHasher {
        fn finish(&self) -> u64 {
            if self.state == u32::from_le_bytes(*b"key_") {
                0x05060708
            } else {
                self.state as u64
            }
        }

        fn write(&mut self, bytes: &[u8]) {
            let mut arr = [0u8; 4];
            let n = bytes.len().min(4);
            arr[..n].copy_from_slice(&bytes[..n]);
            self.state = u32::from_le_bytes(arr);
        }
    }

    #[test]
    fn test_cdb_get_with_hash_collision() {
        // key_A and key_B both start with "key_" so this mock hasher collides them.
        let records = [
            (b"key_A".as_ref(), b"value_A".as_ref()),
            (b"key_B".as_ref(), b"value_B".as_ref()),
        ];
        let cdb = create_in_memory_cdb_with_hasher::<CollisionHasher>(&records);

        assert_eq!(cdb.find_one(b"key_A").unwrap().unwrap(), b"value_A");
        assert_eq!(cdb.find_one(b"key_B").unwrap().unwrap(), b"value_B");
        assert!(cdb.find_one(b"key_C").unwrap().is_none());
    }

    #[test]
    fn test_read_header_invalid_data_short() {
        let data = vec![0u8; HEADER_SIZE as usize - 10];
        let cursor = Cursor::new(data.clone());
        let result = Cdb::<_, CdbHash>::new(cursor);
        assert!(matches!(result, Err(Error::Format(_))));

        #[cfg(feature = "mmap")]
        {
            let temp_file = NamedTempFile::new().unwrap();
            let path = temp_file.path();
            {
                let mut file = File::create(path).unwrap();
                file.write_all(&data).unwrap();
            }
            let result_mmap = Cdb::<File, CdbHash>::open_mmap(path);
            assert!(matches!(result_mmap, Err(Error::Format(_))));
        }
    }

    #[test]
    fn test_header_size_value() {
        assert_eq!(HEADER_SIZE, 256 * 8);
        assert_eq!(HEADER_SIZE, 2048);
    }

    #[test]
    fn test_max_len_value() {
        assert_eq!(MAX_LEN, 0x0FFF_FFFF);
    }

    #[test]
    fn test_empty_cdb_is_exactly_header_size() {
        let cdb_bytes = {
            let mut writer = CdbWriter::<_, CdbHash>::new(Cursor::new(Vec::new())).unwrap();
            writer.finalize().unwrap();
            writer.into_inner().unwrap().into_inner()
        };
        assert_eq!(cdb_bytes.len(), 2048);
        assert!(cdb_bytes.iter().all(|&b| b == 0));
    }
}
