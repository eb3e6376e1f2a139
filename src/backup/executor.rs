//! Runs a single job: backup is `Idle -> Gating -> BackingUp -> Pruning -> Done`,
//! restore is `Idle -> Restoring -> Done`.

use crate::backup::compress::{xz, zst};
use crate::backup::compress::{CompressorBuilder, CompressorConfig};
use crate::backup::finish::{finish_and_sync, Finish};
use crate::backup::interval::{is_due, next_due};
use crate::backup::job_config::Job;
use crate::backup::lock::JobLock;
use crate::backup::naming::{SnapshotEncoding, SnapshotName, SnapshotStamp};
use crate::backup::report::{JobOutcome, RunResult, SkipReason};
use crate::backup::result_error::error::{Error, ErrorKind};
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use crate::backup::retention::prune;
use crate::backup::snapshot::{list_snapshots, Snapshot};
use crate::backup::sqlite::DbCopier;
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::Path;
use tempfile::{Builder, NamedTempFile, PathPersistError, TempPath};
use tracing::{debug, info, warn};

/// Random part of a temp file name, `.{job}.XXXXXX.tmp`.
const TEMP_RAND_LEN: usize = 6;

pub struct JobExecutor<'a, C: DbCopier> {
    job: &'a Job,
    copier: &'a C,
}

impl<'a, C: DbCopier> JobExecutor<'a, C> {
    pub fn new(job: &'a Job, copier: &'a C) -> Self {
        Self { job, copier }
    }

    /// Backs the job up if it is due at `now`, then applies retention.
    pub fn backup(&self, now: DateTime<Utc>) -> RunResult {
        let outcome = self.try_backup(now).unwrap_or_else(|e| {
            warn!("Backup of {:?} failed: {e}", self.job.name());
            JobOutcome::Failed(e)
        });
        RunResult::new(self.job.name().clone(), outcome)
    }

    /// Restores the snapshot named by `snapshot_id`, or the latest one, into
    /// the job's database.
    pub fn restore(&self, snapshot_id: Option<&str>) -> RunResult {
        let outcome = self.try_restore(snapshot_id).unwrap_or_else(|e| {
            warn!("Restore of {:?} failed: {e}", self.job.name());
            JobOutcome::Failed(e)
        });
        RunResult::new(self.job.name().clone(), outcome)
    }

    fn try_backup(&self, now: DateTime<Utc>) -> Result<JobOutcome> {
        let name = self.job.name();
        let config = self.job.config();
        let dest = config.dest_dir();

        fs::create_dir_all(dest)
            .map_err(Error::from)
            .add_msg(format!("Failed to create destination {dest:?}"))?;
        let _lock = match JobLock::acquire(dest, name.clone()) {
            Ok(lock) => lock,
            Err(e) if e.kind() == ErrorKind::LockContention => {
                info!("Skipping {name:?}: {e}");
                return Ok(JobOutcome::Skipped(SkipReason::LockContention));
            }
            Err(e) => return Err(e),
        };
        self.sweep_temp_files();

        debug!("{name}: Idle -> Gating");
        let snapshots = list_snapshots(dest, name)?;
        let last = snapshots.last().map(Snapshot::stamp);
        let interval = config.interval_seconds();
        if let Some(last) = last.filter(|l| !is_due(Some(l.time()), interval, now)) {
            let next_due = next_due(Some(last.time()), interval);
            info!("Skipping {name:?}: not due until {next_due:?}");
            return Ok(JobOutcome::Skipped(SkipReason::NotDue {
                last: last.time(),
                next_due,
            }));
        }

        debug!("{name}: Gating -> BackingUp");
        let snapshot = self.write_snapshot(now, last.as_ref())?;
        info!("Created snapshot {:?}", snapshot.path());

        debug!("{name}: BackingUp -> Pruning");
        let current = list_snapshots(dest, name).unwrap_or_else(|e| {
            warn!("Re-listing {dest:?} failed, pruning from the earlier listing: {e}");
            let mut known = snapshots;
            known.push(snapshot.clone());
            known
        });
        let pruned = prune(
            &current,
            config.retention_count(),
            Some(snapshot.path()),
            |path| self.copier.discard(path),
        );
        if let Some(e) = &pruned.error {
            warn!("Pruning {name:?} incomplete: {e}");
        }

        debug!("{name}: Pruning -> Done");
        Ok(JobOutcome::Succeeded {
            snapshot,
            pruned: pruned.deleted,
            prune_error: pruned.error,
        })
    }

    fn write_snapshot(
        &self,
        now: DateTime<Utc>,
        last: Option<&SnapshotStamp>,
    ) -> Result<Snapshot> {
        let config = self.job.config();
        let dest = config.dest_dir();

        let raw = self.temp_file()?.into_temp_path();
        self.copier.backup_to(config.db_path(), &raw)?;
        File::open(&raw)
            .and_then(|f| f.sync_all())
            .map_err(Error::from)
            .add_msg(format!("Failed to sync {raw:?}"))?;

        let staged = match config.compression() {
            CompressorConfig::None => raw,
            compression => self.compress(compression, &raw)?,
        };

        let size = fs::metadata(&staged)?.len();
        self.publish(staged, now, last, size)
            .add_msg(format!("Failed to publish snapshot into {dest:?}"))
    }

    /// Compresses `raw` into a second temp file. `raw` is removed by its owner.
    fn compress(&self, compression: &CompressorConfig, raw: &Path) -> Result<TempPath> {
        let (file, path) = self.temp_file()?.into_parts();
        let mut writer = compression.build_compressor(BufWriter::new(file))?;
        io::copy(&mut File::open(raw)?, &mut writer)?;
        finish_and_sync(writer.finish()?)?;
        Ok(path)
    }

    /// Renames `staged` to the first free snapshot name at or after `now`,
    /// never replacing an existing file.
    fn publish(
        &self,
        mut staged: TempPath,
        now: DateTime<Utc>,
        last: Option<&SnapshotStamp>,
        size: u64,
    ) -> Result<Snapshot> {
        let name = self.job.name();
        let dest = self.job.config().dest_dir();
        let encoding = self.job.config().encoding();

        let mut stamp = SnapshotStamp::next_after(now, last);
        while let Some(current) = stamp {
            let snapshot_name = SnapshotName::new(name.clone(), current, encoding);
            let target = dest.join(snapshot_name.file_name());
            match staged.persist_noclobber(&target) {
                Ok(()) => return Ok(Snapshot::new(snapshot_name, target, size)),
                Err(PathPersistError { error, path })
                    if error.kind() == io::ErrorKind::AlreadyExists =>
                {
                    debug!("{target:?} already exists, bumping sequence");
                    staged = path;
                    stamp = current.next();
                }
                Err(PathPersistError { error, .. }) => {
                    return Err(Error::from(error).add_msg(format!("Failed to rename into {target:?}")))
                }
            }
        }

        Err(Error::from(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free snapshot name left for {name:?} at {now}"),
        )))
    }

    fn try_restore(&self, snapshot_id: Option<&str>) -> Result<JobOutcome> {
        let name = self.job.name();
        let config = self.job.config();
        let dest = config.dest_dir();
        let not_found = || Error::snapshot_not_found(name.clone(), snapshot_id.map(str::to_string));

        if !dest.is_dir() {
            return Err(not_found());
        }
        let _lock = JobLock::acquire(dest, name.clone())?;
        self.sweep_temp_files();

        debug!("{name}: Idle -> Restoring");
        let snapshots = list_snapshots(dest, name)?;
        let snapshot = match snapshot_id {
            Some(id) => snapshots.into_iter().find(|s| s.matches_id(id)),
            None => snapshots.into_iter().last(),
        }
        .ok_or_else(not_found)?;

        info!("Restoring {:?} into {:?}", snapshot.path(), config.db_path());
        let decoded = match snapshot.encoding() {
            SnapshotEncoding::Plain => None,
            SnapshotEncoding::Xz => Some(self.decode(&snapshot, xz::decompress)?),
            SnapshotEncoding::Zstd => Some(self.decode(&snapshot, zst::decompress)?),
        };
        let source = decoded.as_ref().map_or(snapshot.path(), NamedTempFile::path);
        self.copier.restore_from(source, config.db_path())?;

        debug!("{name}: Restoring -> Done");
        Ok(JobOutcome::Succeeded {
            snapshot,
            pruned: Vec::new(),
            prune_error: None,
        })
    }

    /// Decompresses `snapshot` into a temp file to restore from.
    fn decode<F>(&self, snapshot: &Snapshot, decompress: F) -> Result<NamedTempFile>
    where
        F: FnOnce(File, &mut BufWriter<File>) -> Result<u64>,
    {
        let plain = self.temp_file()?;
        let mut writer = BufWriter::new(plain.reopen()?);
        decompress(File::open(snapshot.path())?, &mut writer)
            .add_msg(format!("Failed to decompress {:?}", snapshot.path()))?;
        finish_and_sync(writer)?;
        Ok(plain)
    }

    fn temp_file(&self) -> Result<NamedTempFile> {
        let dest = self.job.config().dest_dir();
        Builder::new()
            .prefix(&format!(".{}.", self.job.name()))
            .rand_bytes(TEMP_RAND_LEN)
            .suffix(".tmp")
            .tempfile_in(dest)
            .map_err(Error::from)
            .add_msg(format!("Failed to create temp file in {dest:?}"))
    }

    /// Removes temp files of this job left by a run that died before cleaning
    /// up. Only called with the job lock held, so none of them is in use.
    fn sweep_temp_files(&self) {
        let dest = self.job.config().dest_dir();
        let entries = match fs::read_dir(dest) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to scan {dest:?} for leftover temp files: {e}");
                return;
            }
        };
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            if !file_name
                .to_str()
                .is_some_and(|f| is_temp_file_of(self.job.name(), f))
            {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => info!("Removed leftover temp file {:?}", entry.path()),
                Err(e) => warn!("Failed to remove leftover temp file {:?}: {e}", entry.path()),
            }
        }
    }
}

fn is_temp_file_of(job: &str, file_name: &str) -> bool {
    file_name
        .strip_prefix('.')
        .and_then(|rest| rest.strip_prefix(job))
        .and_then(|rest| rest.strip_prefix('.'))
        .and_then(|rest| rest.strip_suffix(".tmp"))
        .is_some_and(|rand| {
            rand.len() == TEMP_RAND_LEN && rand.bytes().all(|b| b.is_ascii_alphanumeric())
        })
}
