use std::hash::Hasher;
use std::io;

use crate::Error;
use crate::cdb::{Cdb, HEADER_SIZE, ProbePlan};
use crate::util::{ReaderAt, read_pair};

/// Iterates over every key-value pair in a cdb database, in insertion
/// order. This iterator borrows the `Cdb` immutably for its lifetime.
///
/// Per the cdb layout, `MainTable[0].offset` always equals the absolute
/// file offset where the sub-tables begin — the writer records this even
/// for an empty bucket 0 — so that single field marks the end of the
/// records region without needing to scan the rest of the header.
pub struct CdbIterator<'cdb, R: ReaderAt, H: Hasher + Default = crate::hash::CdbHash> {
    cdb: &'cdb Cdb<R, H>,
    current_pos: u64,
    end_pos: u64,
}

impl<'cdb, R: ReaderAt, H: Hasher + Default> CdbIterator<'cdb, R, H> {
    pub(crate) fn new(cdb: &'cdb Cdb<R, H>) -> Self {
        let end_pos = cdb.header[0].offset as u64;
        let end_pos = if end_pos < HEADER_SIZE { HEADER_SIZE } else { end_pos };

        CdbIterator {
            cdb,
            current_pos: HEADER_SIZE,
            end_pos,
        }
    }
}

impl<'a, R: ReaderAt, H: Hasher + Default> Iterator for CdbIterator<'a, R, H> {
    type Item = Result<(Vec<u8>, Vec<u8>), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_pos >= self.end_pos {
            return None;
        }

        match read_pair(&self.cdb.reader, self.current_pos) {
            Ok((key_len, val_len)) => {
                let record_data_offset = self.current_pos + 8;
                let total_record_len = 8 + key_len as u64 + val_len as u64;

                if self.current_pos.saturating_add(total_record_len) > self.end_pos {
                    return Some(Err(Error::Format(
                        "record extends beyond the end of the records region".to_string(),
                    )));
                }

                let mut key_buf = vec![0u8; key_len as usize];
                if key_len > 0 {
                    if let Err(e) = self
                        .cdb
                        .reader
                        .read_exact_at(&mut key_buf, record_data_offset)
                    {
                        return Some(Err(Error::Io(e)));
                    }
                }

                let mut val_buf = vec![0u8; val_len as usize];
                if val_len > 0 {
                    if let Err(e) = self
                        .cdb
                        .reader
                        .read_exact_at(&mut val_buf, record_data_offset + key_len as u64)
                    {
                        return Some(Err(Error::Io(e)));
                    }
                }
                self.current_pos += total_record_len;

                Some(Ok((key_buf, val_buf)))
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Some(Err(Error::Format(
                "truncated record in the records region".to_string(),
            ))),
            Err(e) => Some(Err(Error::Io(e))),
        }
    }
}

/// Iterates over every value stored under a single key, in the order the
/// writer inserted them.
///
/// Because a sub-table slot can carry a matching hash but a non-matching
/// key (a hash collision), look-ahead must resolve at the *record* level,
/// not the slot level: this iterator scans forward through the probe chain
/// until it finds a record whose key actually equals the query key (or
/// hits the chain's empty-slot terminator), so a caller's `next()` never
/// has to guess whether more matches remain.
pub struct CdbKeyIterator<'cdb, R: ReaderAt, H: Hasher + Default = crate::hash::CdbHash> {
    cdb: &'cdb Cdb<R, H>,
    key: Vec<u8>,
    hash_val: u32,
    plan: Option<ProbePlan>,
    probed: u32,
    done: bool,
}

impl<'cdb, R: ReaderAt, H: Hasher + Default> CdbKeyIterator<'cdb, R, H> {
    pub(crate) fn new(cdb: &'cdb Cdb<R, H>, key: &[u8]) -> Result<Self, Error> {
        let hash_val = cdb.hash_key(key);
        let plan = cdb.probe_start(hash_val);
        let done = plan.is_none();
        Ok(CdbKeyIterator {
            cdb,
            key: key.to_vec(),
            hash_val,
            plan,
            probed: 0,
            done,
        })
    }

    /// Consumes and returns the next matching value, per the spec's
    /// explicit `next()` contract. Unlike the `Iterator` impl below (which
    /// returns `None` once exhausted, for ordinary `for`-loop use), calling
    /// `next_value` once this iterator has already signaled exhaustion —
    /// whether because every match was returned or because the key's
    /// bucket was empty to begin with — is misuse and fails with
    /// `Error::IteratorExhausted`.
    pub fn next_value(&mut self) -> Result<Vec<u8>, Error> {
        if self.done {
            return Err(Error::IteratorExhausted);
        }
        match Iterator::next(self) {
            Some(result) => result,
            None => Err(Error::IteratorExhausted),
        }
    }
}

impl<'a, R: ReaderAt, H: Hasher + Default> Iterator for CdbKeyIterator<'a, R, H> {
    type Item = Result<Vec<u8>, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let plan = self.plan.expect("plan is Some whenever done is false");

        while self.probed < plan.cap {
            let slot = (plan.start + self.probed) % plan.cap;
            self.probed += 1;
            let slot_offset = plan.sub_table_offset + (slot as u64) * 8;

            let (slot_hash, rec_off) = match read_pair(&self.cdb.reader, slot_offset) {
                Ok(pair) => pair,
                Err(e) => {
                    self.done = true;
                    return Some(Err(Error::Io(e)));
                }
            };

            if slot_hash == 0 && rec_off == 0 {
                self.done = true;
                return None;
            }

            if slot_hash == self.hash_val {
                match read_pair(&self.cdb.reader, rec_off as u64) {
                    Ok((key_len, val_len)) => {
                        if key_len as usize != self.key.len() {
                            continue;
                        }
                        let mut key_buf = vec![0u8; key_len as usize];
                        if key_len > 0 {
                            if let Err(e) = self
                                .cdb
                                .reader
                                .read_exact_at(&mut key_buf, rec_off as u64 + 8)
                            {
                                self.done = true;
                                return Some(Err(Error::Io(e)));
                            }
                        }
                        if key_buf != self.key {
                            continue;
                        }
                        let mut val_buf = vec![0u8; val_len as usize];
                        if val_len > 0 {
                            if let Err(e) = self.cdb.reader.read_exact_at(
                                &mut val_buf,
                                rec_off as u64 + 8 + key_len as u64,
                            ) {
                                self.done = true;
                                return Some(Err(Error::Io(e)));
                            }
                        }
                        return Some(Ok(val_buf));
                    }
                    Err(e) => {
                        self.done = true;
                        return Some(Err(Error::Io(e)));
                    }
                }
            }
        }

        self.done = true;
        None
    }
}
