use crate::backup::naming::{SnapshotEncoding, SnapshotName, SnapshotStamp};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use itertools::Itertools;
use serde::Serialize;
use std::fs::read_dir;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A backup artifact found in a destination directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    job: Arc<str>,
    stamp: SnapshotStamp,
    encoding: SnapshotEncoding,
    path: PathBuf,
    size: u64,
}

impl Snapshot {
    pub fn new(name: SnapshotName, path: PathBuf, size: u64) -> Self {
        Self {
            job: name.job().clone(),
            stamp: name.stamp(),
            encoding: name.encoding(),
            path,
            size,
        }
    }

    pub fn job(&self) -> &Arc<str> {
        &self.job
    }

    pub fn stamp(&self) -> SnapshotStamp {
        self.stamp
    }

    pub fn encoding(&self) -> SnapshotEncoding {
        self.encoding
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn file_name(&self) -> String {
        SnapshotName::new(self.job.clone(), self.stamp, self.encoding).file_name()
    }

    /// Whether `id` names this snapshot, either by full file name or by stamp.
    pub fn matches_id(&self, id: &str) -> bool {
        self.stamp.to_string() == id || self.file_name() == id
    }
}

/// Lists the snapshots of `job` in `dir`, oldest first.
///
/// A missing directory holds no snapshots. Files that do not parse as a
/// snapshot of this exact job are ignored.
pub fn list_snapshots<P: AsRef<Path>>(dir: P, job: &str) -> Result<Vec<Snapshot>> {
    let dir = dir.as_ref();
    let entries = match read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut snapshots = Vec::new();
    for entry in entries {
        let entry = entry.map_err(Error::from).add_msg(format!("Failed to list {dir:?}"))?;
        let Some(name) = entry.file_name().to_str().and_then(SnapshotName::parse) else {
            continue;
        };
        if name.job().as_ref() != job {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!("Skipping unreadable snapshot {:?}: {e}", entry.path());
                continue;
            }
        };
        snapshots.push(Snapshot::new(name, entry.path(), metadata.len()));
    }

    Ok(snapshots
        .into_iter()
        .sorted_unstable_by_key(Snapshot::stamp)
        .collect())
}
