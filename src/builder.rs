use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use std::fs::File;

use crate::dump::DumpReader;
use crate::hash::CdbHash;
use crate::writer::{AtomicCdbWriter, CdbWriter};
use crate::Error;

/// Default temp path for [`build_from_dump`] when the caller does not
/// supply one: `<system temp dir>/tmp-<target file name>`. This mirrors
/// `cdbmake`'s own default, which is why it lives outside the target's
/// directory rather than next to it — callers that need a same-filesystem
/// guarantee should pass `temp_path` explicitly.
fn default_temp_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "cdb".to_string());
    std::env::temp_dir().join(format!("tmp-{name}"))
}

/// Builds a cdb file at `target` from the dump at `dump_path`.
///
/// Opens a [`DumpReader`] on `dump_path` and a direct-mode [`CdbWriter`] on
/// `temp_path` (defaulting to [`default_temp_path`]), forwards every
/// `(key, value)` pair, finalizes the writer, and renames the temp file onto
/// `target`. `target` is left untouched unless every step above succeeds;
/// the temp file is deleted on any failure.
///
/// If the rename crosses filesystems (`temp_path` and `target` are on
/// different devices), the underlying `std::fs::rename` fails rather than
/// falling back to a non-atomic copy — callers relying on the default temp
/// path should verify it shares a filesystem with `target`, or pass an
/// explicit `temp_path` that does.
pub fn build_from_dump(
    target: impl AsRef<Path>,
    dump_path: impl AsRef<Path>,
    temp_path: Option<&Path>,
) -> Result<(), Error> {
    let target = target.as_ref();
    let dump_path = dump_path.as_ref();

    if !dump_path.exists() {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("dump file not found: {}", dump_path.display()),
        )));
    }

    let owned_temp;
    let temp_path: &Path = match temp_path {
        Some(p) => p,
        None => {
            owned_temp = default_temp_path(target);
            &owned_temp
        }
    };

    let result = (|| -> Result<(), Error> {
        let mut dump = DumpReader::open(dump_path)?;
        let mut writer = CdbWriter::<File, CdbHash>::create(temp_path)?;
        for record in dump.iter() {
            let (key, value) = record?;
            writer.put(&key, &value)?;
        }
        writer.finalize()?;
        Ok(())
    })();

    match result {
        Ok(()) => {
            fs::rename(temp_path, target)?;
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(temp_path);
            Err(e)
        }
    }
}

/// A streaming handle for building a cdb file one pair at a time, publishing
/// atomically on [`finish`](Self::finish).
///
/// Where [`build_from_dump`] consumes an existing dump file wholesale,
/// `CdbBuilder` is for callers producing pairs on the fly (e.g. from a
/// database cursor) who still want the same atomic-publish guarantee as
/// [`AtomicCdbWriter`], which it wraps directly.
pub struct CdbBuilder {
    inner: AtomicCdbWriter<CdbHash>,
}

impl CdbBuilder {
    /// Starts building a new cdb file destined for `target`.
    pub fn build_streaming(target: impl AsRef<Path>) -> Result<Self, Error> {
        Ok(CdbBuilder {
            inner: AtomicCdbWriter::create(target)?,
        })
    }

    /// Adds one key-value pair.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.inner.put(key, value)
    }

    /// Finalizes the database and publishes it to the target path.
    pub fn finish(self) -> Result<(), Error> {
        self.inner.finalize()
    }
}
