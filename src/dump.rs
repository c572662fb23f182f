use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::Error;
use crate::cdb::MAX_LEN;

/// Reads the textual `cdbmake` dump format: a sequence of
/// `+klen,dlen:key->data\n` records terminated by a blank line.
///
/// `DumpReader` is itself a lazy `Iterator<Item = Result<(Vec<u8>, Vec<u8>),
/// Error>>`; [`has_next`](Self::has_next) is provided separately because the
/// spec's grammar distinguishes "peek the next byte" from "consume the next
/// record" — the trailer is detected by peeking, not by attempting a parse.
/// Once a record fails with `Error::Format`, the reader closes its input;
/// further calls to `has_next`/`next` return `false`/`None` rather than
/// re-reading a stream left in an unknown state.
pub struct DumpReader<R: Read> {
    reader: Option<BufReader<R>>,
}

impl DumpReader<File> {
    /// Opens a dump file for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let file = File::open(path)?;
        Ok(Self::new(file))
    }
}

impl<R: Read> DumpReader<R> {
    /// Wraps an arbitrary `Read` source (a file, or an in-memory `Cursor`
    /// for tests) in a dump reader.
    pub fn new(reader: R) -> Self {
        DumpReader {
            reader: Some(BufReader::new(reader)),
        }
    }

    /// Returns an iterator adaptor over the remaining records; `DumpReader`
    /// already implements `Iterator`, so this exists purely for call-site
    /// symmetry with `.iter()` on other lazy sequences in this crate.
    pub fn iter(&mut self) -> &mut Self {
        self
    }

    /// Peeks the next byte without consuming it. Returns `false` iff the
    /// next byte is the trailer `'\n'`, the stream is at EOF, or the reader
    /// has already been closed.
    pub fn has_next(&mut self) -> Result<bool, Error> {
        let reader = match self.reader.as_mut() {
            Some(r) => r,
            None => return Ok(false),
        };
        let buf = reader.fill_buf()?;
        Ok(!buf.is_empty() && buf[0] != b'\n')
    }

    /// Closes the reader. Idempotent.
    pub fn close(&mut self) {
        self.reader = None;
    }

    /// Consumes and returns the next record, per the spec's explicit
    /// `next()` contract. Unlike the `Iterator` impl below (which returns
    /// `None` once exhausted, so this type works in ordinary `for` loops),
    /// calling `next_record` once the reader has already closed — whether
    /// because the trailer was reached or a prior `Format` error fired —
    /// is misuse and fails with `Error::IteratorExhausted` rather than
    /// silently returning nothing.
    pub fn next_record(&mut self) -> Result<(Vec<u8>, Vec<u8>), Error> {
        if self.reader.is_none() {
            return Err(Error::IteratorExhausted);
        }
        match Iterator::next(self) {
            Some(result) => result,
            None => Err(Error::IteratorExhausted),
        }
    }

    fn fail(&mut self, message: impl Into<String>) -> Error {
        self.reader = None;
        Error::Format(message.into())
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        let mut b = [0u8; 1];
        self.reader
            .as_mut()
            .expect("read_byte called on a closed DumpReader")
            .read_exact(&mut b)?;
        Ok(b[0])
    }

    fn read_length(&mut self, terminator: u8) -> Result<u32, Error> {
        let mut digits = Vec::new();
        loop {
            let b = match self.read_byte() {
                Ok(b) => b,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(self.fail("dump ended while reading a length field"));
                }
                Err(e) => {
                    self.reader = None;
                    return Err(Error::Io(e));
                }
            };
            if b == terminator {
                break;
            }
            if !b.is_ascii_digit() {
                return Err(self.fail(format!(
                    "expected a decimal digit or '{}', got {:?}",
                    terminator as char, b as char
                )));
            }
            digits.push(b);
        }

        if digits.is_empty() {
            return Err(self.fail("length field has no digits"));
        }

        let text = std::str::from_utf8(&digits).expect("ascii digits are valid utf-8");
        let value: u64 = match text.parse() {
            Ok(v) => v,
            Err(_) => return Err(self.fail("length field is not a valid number")),
        };
        if value > MAX_LEN as u64 {
            return Err(self.fail(format!("length {value} exceeds MAX_LEN ({MAX_LEN})")));
        }
        Ok(value as u32)
    }

    fn read_exact_n(&mut self, n: usize) -> Result<Vec<u8>, Error> {
        let mut buf = vec![0u8; n];
        if n > 0 {
            match self
                .reader
                .as_mut()
                .expect("read_exact_n called on a closed DumpReader")
                .read_exact(&mut buf)
            {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(self.fail("dump ended in the middle of a key or value"));
                }
                Err(e) => {
                    self.reader = None;
                    return Err(Error::Io(e));
                }
            }
        }
        Ok(buf)
    }

    fn read_literal(&mut self, literal: &[u8]) -> Result<(), Error> {
        let got = self.read_exact_n(literal.len())?;
        if got != literal {
            return Err(self.fail(format!(
                "expected literal {:?}",
                String::from_utf8_lossy(literal)
            )));
        }
        Ok(())
    }

    /// Parses one record's body, assuming the leading `'+'` has already
    /// been consumed by the caller.
    fn parse_record(&mut self) -> Result<(Vec<u8>, Vec<u8>), Error> {
        let klen = self.read_length(b',')?;
        let dlen = self.read_length(b':')?;
        let key = self.read_exact_n(klen as usize)?;
        self.read_literal(b"->")?;
        let data = self.read_exact_n(dlen as usize)?;

        let terminator = match self.read_byte() {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(self.fail("dump ended before a record's terminating newline"));
            }
            Err(e) => {
                self.reader = None;
                return Err(Error::Io(e));
            }
        };
        if terminator != b'\n' {
            return Err(self.fail("record is missing its terminating newline"));
        }

        Ok((key, data))
    }
}

impl<R: Read> Iterator for DumpReader<R> {
    type Item = Result<(Vec<u8>, Vec<u8>), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.reader.is_none() {
            return None;
        }

        let prefix = match self.read_byte() {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Some(Err(self.fail("dump ended without its terminating blank line")));
            }
            Err(e) => {
                self.reader = None;
                return Some(Err(Error::Io(e)));
            }
        };

        if prefix == b'\n' {
            self.close();
            return None;
        }
        if prefix != b'+' {
            return Some(Err(self.fail(format!(
                "expected '+' or a trailing blank line, got {:?}",
                prefix as char
            ))));
        }

        Some(self.parse_record())
    }
}

/// Writes the textual dump format of `DumpReader`: records in the order
/// written, followed by a trailing blank line on `close`.
///
/// `close` consumes the writer, so a caller cannot physically invoke it
/// twice — the idempotent-double-close requirement of §5 is enforced by
/// the type system rather than by a runtime flag.
pub struct DumpWriter<W: Write> {
    writer: Option<W>,
}

impl DumpWriter<File> {
    /// Opens `path` for writing, truncating any existing content (the
    /// *direct* construction mode of §4.4).
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self::new(file))
    }
}

impl<W: Write> DumpWriter<W> {
    /// Wraps an arbitrary `Write` destination.
    pub fn new(writer: W) -> Self {
        DumpWriter {
            writer: Some(writer),
        }
    }

    /// Appends one `+klen,dlen:key->data\n` record.
    pub fn write(&mut self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        if key.len() > MAX_LEN as usize || value.len() > MAX_LEN as usize {
            return Err(Error::Format(format!(
                "key/value length exceeds MAX_LEN ({MAX_LEN} bytes)"
            )));
        }

        let w = self.writer.as_mut().ok_or(Error::WriterFinalized)?;
        write!(w, "+{},{}:", key.len(), value.len())?;
        w.write_all(key)?;
        w.write_all(b"->")?;
        w.write_all(value)?;
        w.write_all(b"\n")?;
        Ok(())
    }

    /// Appends the trailing blank line, flushes, and returns the inner
    /// writer.
    pub fn close(mut self) -> Result<W, Error> {
        let mut w = self.writer.take().ok_or(Error::WriterFinalized)?;
        w.write_all(b"\n")?;
        w.flush()?;
        Ok(w)
    }
}

/// An atomic-publish `DumpWriter`: records are written to a temp file in
/// the target's own directory, and `close` renames it over the target path
/// only once the trailing blank line is durably flushed. Any failure during
/// `write` or `close` deletes the temp file and leaves the target
/// untouched.
pub struct AtomicDumpWriter {
    inner: DumpWriter<File>,
    temp: NamedTempFile,
    target: PathBuf,
}

impl AtomicDumpWriter {
    /// Creates a temp file in `target`'s parent directory and opens a
    /// `DumpWriter` on it.
    pub fn create(target: impl AsRef<Path>) -> Result<Self, Error> {
        let target = target.as_ref().to_path_buf();
        let dir = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let temp = NamedTempFile::new_in(dir)?;
        let file = temp.reopen()?;

        Ok(AtomicDumpWriter {
            inner: DumpWriter::new(file),
            temp,
            target,
        })
    }

    /// See [`DumpWriter::write`].
    pub fn write(&mut self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.inner.write(key, value).inspect_err(|_| {
            let _ = std::fs::remove_file(self.temp.path());
        })
    }

    /// Finalizes the underlying writer and atomically renames the temp
    /// file onto the target path.
    pub fn close(self) -> Result<(), Error> {
        let AtomicDumpWriter {
            inner,
            temp,
            target,
        } = self;

        match inner.close() {
            Ok(_file) => {
                temp.persist(&target).map_err(|e| e.error)?;
                Ok(())
            }
            Err(e) => {
                let _ = std::fs::remove_file(temp.path());
                Err(e)
            }
        }
    }
}
