//! Per-job mutual exclusion through an advisory lock on `.{job}.lock` in the
//! destination directory.
//!
//! The lock is an OS file lock held for the lifetime of [`JobLock`], so the
//! kernel drops it when the owner exits, however it exits. The file itself is
//! never removed and only records the pid of the latest owner. Each open file
//! description locks on its own, so another thread of this process contends
//! exactly like another process.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use std::fs::{File, OpenOptions, TryLockError};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct JobLock {
    job: Arc<str>,
    path: PathBuf,
    file: File,
}

impl JobLock {
    pub fn lock_path<P: AsRef<Path>>(dir: P, job: &str) -> PathBuf {
        dir.as_ref().join(format!(".{job}.lock"))
    }

    /// Takes the lock for `job` in `dir` without waiting.
    ///
    /// Fails with [`Error::LockContention`] while any other owner holds it. A
    /// lock file left behind by an owner that is gone does not count.
    pub fn acquire<P: AsRef<Path>>(dir: P, job: Arc<str>) -> Result<Self> {
        let path = Self::lock_path(dir, &job);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(Error::from)
            .add_msg(format!("Failed to open lock file {path:?}"))?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => return Err(Error::lock_contention(job, path)),
            Err(TryLockError::Error(e)) => {
                return Err(Error::from(e).add_msg(format!("Failed to lock {path:?}")))
            }
        }

        let mut guard = JobLock { job, path, file };
        guard
            .record_owner()
            .map_err(Error::from)
            .add_msg(format!("Failed to write lock file {:?}", guard.path))?;
        debug!("Acquired lock {:?} for {:?}", guard.path, guard.job);
        Ok(guard)
    }

    fn record_owner(&mut self) -> io::Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        writeln!(self.file, "{}", std::process::id())
    }
}

impl Drop for JobLock {
    fn drop(&mut self) {
        match self.file.unlock() {
            Ok(()) => debug!("Released lock {:?} for {:?}", self.path, self.job),
            Err(e) => warn!("Failed to release lock {:?}: {e}", self.path),
        }
    }
}
