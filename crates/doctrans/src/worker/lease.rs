//! Exclusive ownership of a runtime directory.
//!
//! Only one queue at a time may run jobs out of a runtime directory. The
//! owner holds an OS file lock on `queue.lock`; the lock goes away with the
//! process, so a crashed owner never leaves a stale lease behind.

use std::fs::{File, OpenOptions, TryLockError};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const LOCK_FILE: &str = "queue.lock";

#[derive(Debug)]
pub struct RuntimeLease {
    path: PathBuf,
    // Held for its lock; released on drop.
    _file: File,
}

impl RuntimeLease {
    /// Takes the lease on `runtime_dir`, creating the directory if needed.
    /// Returns `Ok(None)` when another queue holds it.
    pub fn try_acquire(runtime_dir: &Path) -> std::io::Result<Option<Self>> {
        std::fs::create_dir_all(runtime_dir)?;
        let path = runtime_dir.join(LOCK_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => return Ok(None),
            Err(TryLockError::Error(e)) => return Err(e),
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        log::debug!("Acquired runtime lease {}", path.display());
        Ok(Some(Self { path, _file: file }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
