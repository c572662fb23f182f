use std::io::{Error, ErrorKind, Result, Write};

/// A trait for objects that can be read from at a specific offset.
/// Similar to Go's `io.ReaderAt`.
pub trait ReaderAt {
    /// Reads up to `buf.len()` bytes into `buf` starting at `offset`.
    /// Returns the number of bytes read.
    /// This method does not affect the current cursor position of the reader if it has one.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Reads exactly `buf.len()` bytes into `buf` starting at `offset`.
    /// If EOF is reached before `buf` is filled, an error of kind `ErrorKind::UnexpectedEof` is returned.
    fn read_exact_at(&self, mut buf: &mut [u8], mut offset: u64) -> Result<()> {
        while !buf.is_empty() {
            match self.read_at(buf, offset) {
                Ok(0) => {
                    return Err(Error::new(
                        ErrorKind::UnexpectedEof,
                        "failed to fill whole buffer in read_exact_at",
                    ));
                }
                Ok(n) => {
                    let tmp = buf; // Necessary due to borrow checker limitations with re-slicing buf in place
                    buf = &mut tmp[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {} // Retry on interrupt
                Err(e) => return Err(e),                           // Other errors
            }
        }
        Ok(())
    }
}

/// Implement `ReaderAt` for `std::fs::File` on Unix-like systems.
#[cfg(unix)]
impl ReaderAt for std::fs::File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        use std::os::unix::fs::FileExt;
        FileExt::read_at(self, buf, offset)
    }
}

/// Implement `ReaderAt` for byte slices, useful for testing or in-memory data.
impl ReaderAt for &'_ [u8] {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let offset_usize = offset as usize;

        if offset_usize >= self.len() {
            return Ok(0); // EOF, no bytes read
        }

        let remaining_in_self = self.len() - offset_usize;
        let bytes_to_copy = std::cmp::min(buf.len(), remaining_in_self);

        if bytes_to_copy > 0 {
            buf[..bytes_to_copy].copy_from_slice(&self[offset_usize..offset_usize + bytes_to_copy]);
        }
        Ok(bytes_to_copy)
    }
}

/// Implement `ReaderAt` for `std::io::Cursor<Vec<u8>>`.
impl ReaderAt for std::io::Cursor<Vec<u8>> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        use std::io::{Read, Seek, SeekFrom};
        let mut inner_cursor = self.clone(); // Clone to avoid affecting the original cursor's position
        inner_cursor.seek(SeekFrom::Start(offset))?;
        inner_cursor.read(buf)
    }
}

/// Reads a little-endian `(u32, u32)` pair from a `ReaderAt` at the given offset.
pub fn read_pair<R: ReaderAt + ?Sized>(reader: &R, offset: u64) -> Result<(u32, u32)> {
    let mut buffer = [0u8; 8];
    reader.read_exact_at(&mut buffer, offset)?;

    let first: [u8; 4] = buffer[0..4].try_into().unwrap();
    let second: [u8; 4] = buffer[4..8].try_into().unwrap();

    Ok((u32::from_le_bytes(first), u32::from_le_bytes(second)))
}

/// Writes a little-endian `(u32, u32)` pair to a `Write` stream.
pub fn write_pair<W: Write + ?Sized>(writer: &mut W, first: u32, second: u32) -> Result<()> {
    writer.write_all(&first.to_le_bytes())?;
    writer.write_all(&second.to_le_bytes())?;
    Ok(())
}
