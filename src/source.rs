//! The scoped, read-only byte source behind a database/WAL/journal file.
//! Every "modification" in this crate produces a new [`crate::version::Version`];
//! the source itself is never written to and is safe to share behind `&`.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Could not open {path}: {source}")]
    Open { path: PathBuf, source: std::io::Error },
    #[error("Could not read {len} bytes at offset {offset} of {path}: {source}")]
    Read {
        path: PathBuf,
        offset: u64,
        len: usize,
        source: std::io::Error,
    },
}

/// A read-only file, opened once and re-read by offset as pages are
/// demanded. No page cache lives here — [`crate::version::Version`] owns
/// whatever caching it needs, scoped to its own lifetime.
pub struct FileSource {
    path: PathBuf,
    file: File,
    len: u64,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<FileSource, Error> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| Error::Open {
            path: path.clone(),
            source,
        })?;
        let len = file.metadata().map_err(|source| Error::Open {
            path: path.clone(),
            source,
        })?.len();
        Ok(FileSource { path, file, len })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reads exactly `len` bytes at `offset`. Each call seeks independently
    /// so this is safe to call from anywhere without holding a cursor.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>, Error> {
        let mut file = self.file.try_clone().map_err(|source| Error::Open {
            path: self.path.clone(),
            source,
        })?;
        file.seek(SeekFrom::Start(offset)).map_err(|source| Error::Read {
            path: self.path.clone(),
            offset,
            len,
            source,
        })?;
        let mut buf = vec![0_u8; len];
        file.read_exact(&mut buf).map_err(|source| Error::Read {
            path: self.path.clone(),
            offset,
            len,
            source,
        })?;
        Ok(buf)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_bytes_at_an_offset() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"0123456789").unwrap();
        let source = FileSource::open(f.path()).unwrap();
        assert_eq!(source.len(), 10);
        assert_eq!(source.read_at(3, 4).unwrap(), b"3456");
    }

    #[test]
    fn read_past_end_is_an_error() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"short").unwrap();
        let source = FileSource::open(f.path()).unwrap();
        assert!(source.read_at(0, 100).is_err());
    }
}
