//! Single-writer lock and atomic file writes.
//!
//! Every mutating operation holds a `WriteGuard` for its whole multi-file sequence.
//! The guard pairs an in-process mutex (threads sharing one `App`) with an advisory
//! `fs2` lock on `data/.write.lock` (separate processes sharing one data root).

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::{IoContext, Result, StoreError};

pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

const LOCK_RETRY_INTERVAL_MS: u64 = 25;

#[derive(Debug)]
pub struct WriteLock {
    path: PathBuf,
    timeout: Duration,
    local: Mutex<()>,
}

/// Proof that the caller holds the write lock. Released on drop.
#[derive(Debug)]
pub struct WriteGuard<'a> {
    file: File,
    _local: MutexGuard<'a, ()>,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl WriteLock {
    pub fn new(path: impl Into<PathBuf>, timeout_ms: u64) -> Self {
        Self {
            path: path.into(),
            timeout: Duration::from_millis(timeout_ms),
            local: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn acquire(&self) -> Result<WriteGuard<'_>> {
        let local = self
            .local
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .at(&self.path)?;

        let start = Instant::now();
        let retry = Duration::from_millis(LOCK_RETRY_INTERVAL_MS);
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(WriteGuard {
                        file,
                        _local: local,
                    })
                }
                Err(err) if is_lock_contended(&err) => {
                    if start.elapsed() >= self.timeout {
                        return Err(StoreError::LockTimeout(self.path.clone()));
                    }
                    std::thread::sleep(retry);
                }
                Err(err) => return Err(StoreError::io(&self.path, err)),
            }
        }
    }
}

fn is_lock_contended(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }
    // Windows reports sharing/lock violations as raw OS errors.
    #[cfg(windows)]
    {
        matches!(err.raw_os_error(), Some(32) | Some(33))
    }
    #[cfg(not(windows))]
    {
        false
    }
}

/// Writes through a sibling temp file and renames it over `path`, so readers see
/// either the old or the new content.
pub fn write_atomic(path: &Path, data: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).at(parent)?;
    }
    let temp_path = path.with_extension(format!(
        "{}.tmp.{}",
        path.extension().and_then(|e| e.to_str()).unwrap_or(""),
        std::process::id()
    ));
    let mut temp_file = File::create(&temp_path).at(&temp_path)?;
    temp_file.write_all(data.as_bytes()).at(&temp_path)?;
    temp_file.sync_all().at(&temp_path)?;
    drop(temp_file);
    fs::rename(&temp_path, path).at(path)?;
    tracing::debug!(path = %path.display(), bytes = data.len(), "wrote file");
    Ok(())
}
