//! Advisory file locking for cross-process state files.
//!
//! The taskboard and the message journal are both mutated by multiple OS
//! processes. All serialization goes through an exclusive (or shared, for
//! readers) flock on a peer lock file that is never read.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// RAII guard for an advisory lock on a peer lock file.
///
/// The lock is released when the guard drops, so a critical section is
/// exactly the guard's lexical scope. Helpers that persist state while a
/// guard is alive take it by reference, which keeps "lock already held"
/// a compile-time fact rather than a boolean that could leak.
pub(crate) struct FileLock {
    file: File,
}

impl FileLock {
    pub(crate) fn exclusive(path: &Path) -> io::Result<Self> {
        let file = Self::open(path)?;
        fs2::FileExt::lock_exclusive(&file)?;
        Ok(Self { file })
    }

    pub(crate) fn shared(path: &Path) -> io::Result<Self> {
        let file = Self::open(path)?;
        fs2::FileExt::lock_shared(&file)?;
        Ok(Self { file })
    }

    fn open(path: &Path) -> io::Result<File> {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}
