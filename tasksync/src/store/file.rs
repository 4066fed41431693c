//! File-per-entry [`KeyValueBackend`] rooted at a data directory.
//!
//! Entry `key` lives at `<dir>/<key>.json`. Writes go to a temporary file
//! in the same directory and are renamed into place, so a crash mid-write
//! leaves the previous value readable.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{KeyValueBackend, StoreError};

pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Creates a backend rooted at `dir`. The directory is created on the
    /// first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

fn io_error(key: &str, source: std::io::Error) -> StoreError {
    StoreError::Io {
        key: key.to_string(),
        source,
    }
}

impl KeyValueBackend for FileBackend {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match std::fs::read(self.entry_path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(key, e)),
        }
    }

    fn write(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| io_error(key, e))?;
        let target = self.entry_path(key);
        let tmp = self.dir.join(format!("{key}.json.tmp"));
        std::fs::write(&tmp, value).map_err(|e| io_error(key, e))?;
        std::fs::rename(&tmp, &target).map_err(|e| io_error(key, e))?;
        tracing::trace!(key, bytes = value.len(), "local entry written");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match std::fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(key, e)),
        }
    }
}
