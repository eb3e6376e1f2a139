use crate::backup::executor::JobExecutor;
use crate::backup::job_config::{Job, Profile};
use crate::backup::report::{JobOutcome, RunReport, RunResult, SkipReason};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::AddMsg;
use crate::backup::sqlite::{DbCopier, SqliteCopier};
use bon::Builder;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

#[derive(Clone, Debug, Builder)]
pub struct RunOptions {
    /// Upper bound on jobs running at once.
    #[builder(default = 1)]
    parallelism: usize,
    /// Once set, jobs that have not started yet are skipped.
    #[builder(default)]
    cancel: Arc<AtomicBool>,
    #[builder(default = Utc::now as fn() -> DateTime<Utc>)]
    clock: fn() -> DateTime<Utc>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RunOptions {
    pub fn cancel_flag(&self) -> &Arc<AtomicBool> {
        &self.cancel
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// Runs the jobs of a profile, each on its own with its own outcome.
pub struct RunCoordinator<C: DbCopier = SqliteCopier> {
    copier: C,
    options: RunOptions,
}

impl RunCoordinator {
    pub fn new(options: RunOptions) -> Self {
        Self::with_copier(SqliteCopier, options)
    }
}

impl<C: DbCopier> RunCoordinator<C> {
    pub fn with_copier(copier: C, options: RunOptions) -> Self {
        Self { copier, options }
    }

    /// Backs up every job of `profile`, or only `job_name` when given.
    ///
    /// An unknown `job_name` fails before any job runs. Otherwise the
    /// returned report holds one result per selected job.
    pub fn run_backup(&self, profile: &Profile, job_name: Option<&str>) -> Result<RunReport> {
        let jobs = select_jobs(profile, job_name)?;
        let threads = self.options.parallelism.clamp(1, jobs.len().max(1));
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("backup-{i}"))
            .build()
            .map_err(Error::from)
            .add_msg("Failed to build job thread pool")?;

        info!("Running {} job(s) on {threads} thread(s)", jobs.len());
        let report = pool.install(|| {
            jobs.par_iter()
                .map(|job| self.backup_one(job))
                .collect::<Vec<_>>()
        });
        Ok(report.into_iter().collect())
    }

    /// Restores one job from `snapshot_id`, or from its latest snapshot.
    pub fn run_restore(
        &self,
        profile: &Profile,
        job_name: &str,
        snapshot_id: Option<&str>,
    ) -> Result<RunResult> {
        let job = profile
            .job(job_name)
            .ok_or_else(|| Error::job_not_found(job_name))?;
        if self.options.is_cancelled() {
            return Ok(cancelled(&job));
        }
        Ok(JobExecutor::new(&job, &self.copier).restore(snapshot_id))
    }

    fn backup_one(&self, job: &Job) -> RunResult {
        if self.options.is_cancelled() {
            info!("Run cancelled, skipping {:?}", job.name());
            return cancelled(job);
        }
        JobExecutor::new(job, &self.copier).backup((self.options.clock)())
    }
}

fn cancelled(job: &Job) -> RunResult {
    RunResult::new(job.name().clone(), JobOutcome::Skipped(SkipReason::Cancelled))
}

fn select_jobs(profile: &Profile, job_name: Option<&str>) -> Result<Vec<Job>> {
    match job_name {
        Some(name) => profile
            .job(name)
            .map(|job| vec![job])
            .ok_or_else(|| Error::job_not_found(name)),
        None => Ok(profile.jobs().collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::job_config::JobConfig;
    use crate::backup::lock::JobLock;
    use crate::backup::result_error::error::ErrorKind;
    use crate::backup::snapshot::list_snapshots;
    use crate::backup::snapshot::tests::{at_secs, touch_snapshot};
    use crate::backup::sqlite::tests::{create_db, read_rows};
    use std::io;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    /// Copies for real but cannot delete snapshots.
    struct UndeletableCopier;

    impl DbCopier for UndeletableCopier {
        fn backup_to(&self, src: &Path, dst: &Path) -> Result<()> {
            SqliteCopier.backup_to(src, dst)
        }

        fn restore_from(&self, snapshot: &Path, dst: &Path) -> Result<()> {
            SqliteCopier.restore_from(snapshot, dst)
        }

        fn discard(&self, _snapshot: &Path) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::PermissionDenied))
        }
    }

    fn fixed_clock() -> DateTime<Utc> {
        at_secs(10_000)
    }

    fn job(root: &Path, name: &str, retention: usize, interval: i64) -> Job {
        let db = root.join(format!("{name}.db"));
        create_db(&db, &[name]);
        Job::new(
            name,
            JobConfig::builder()
                .db_path(db)
                .dest_dir(root.join("backups"))
                .retention(retention)
                .interval(interval)
                .build(),
        )
    }

    fn options() -> RunOptions {
        RunOptions::builder().clock(fixed_clock).build()
    }

    fn dest(root: &Path) -> PathBuf {
        root.join("backups")
    }

    #[test]
    fn test_first_run_then_rerun_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let profile = Profile::from_jobs([job(tmp.path(), "app", 0, 1800)]).unwrap();
        let coordinator = RunCoordinator::new(options());

        let report = coordinator.run_backup(&profile, None).unwrap();
        assert!(report.is_success());
        assert!(report.get("app").unwrap().snapshot().is_some());
        assert_eq!(list_snapshots(dest(tmp.path()), "app").unwrap().len(), 1);

        let report = coordinator.run_backup(&profile, None).unwrap();
        assert!(report.is_success());
        assert!(matches!(
            report.get("app").unwrap().outcome(),
            JobOutcome::Skipped(SkipReason::NotDue { .. })
        ));
        assert_eq!(list_snapshots(dest(tmp.path()), "app").unwrap().len(), 1);
    }

    #[test]
    fn test_retention_one_leaves_only_new_snapshot() {
        let tmp = TempDir::new().unwrap();
        let profile = Profile::from_jobs([job(tmp.path(), "app", 1, 0)]).unwrap();
        std::fs::create_dir_all(dest(tmp.path())).unwrap();
        for secs in [1, 2, 3] {
            touch_snapshot(&dest(tmp.path()), "app", at_secs(secs));
        }

        let report = RunCoordinator::new(options())
            .run_backup(&profile, None)
            .unwrap();
        let remaining = list_snapshots(dest(tmp.path()), "app").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].stamp().time(), fixed_clock());
        assert_eq!(report.get("app").unwrap().pruned().len(), 3);
    }

    #[test]
    fn test_prune_failure_keeps_run_successful() {
        let tmp = TempDir::new().unwrap();
        let profile = Profile::from_jobs([job(tmp.path(), "app", 1, 0)]).unwrap();
        std::fs::create_dir_all(dest(tmp.path())).unwrap();
        touch_snapshot(&dest(tmp.path()), "app", at_secs(1));

        let report = RunCoordinator::with_copier(UndeletableCopier, options())
            .run_backup(&profile, None)
            .unwrap();
        let result = report.get("app").unwrap();
        assert_eq!(result.status(), "partial");
        assert_eq!(result.error().unwrap().kind(), ErrorKind::PartialFailure);
        assert!(result.snapshot().is_some());
        assert!(report.is_success());
        assert_eq!(report.exit_code(), 0);
        assert_eq!(list_snapshots(dest(tmp.path()), "app").unwrap().len(), 2);
    }

    #[test]
    fn test_restore_latest() {
        let tmp = TempDir::new().unwrap();
        let app = job(tmp.path(), "app", 0, 0);
        let db = app.config().db_path().clone();
        let profile = Profile::from_jobs([app]).unwrap();
        let coordinator = RunCoordinator::new(options());

        coordinator.run_backup(&profile, Some("app")).unwrap();
        create_db(&db, &["later"]);
        coordinator.run_backup(&profile, Some("app")).unwrap();
        create_db(&db, &["lost"]);

        let result = coordinator.run_restore(&profile, "app", None).unwrap();
        assert!(!result.is_failed());
        assert_eq!(result.snapshot().unwrap().stamp().seq(), 1);
        assert_eq!(read_rows(&db), vec!["app", "later"]);
    }

    #[test]
    fn test_held_lock_skips_and_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let profile = Profile::from_jobs([job(tmp.path(), "app", 0, 0)]).unwrap();
        std::fs::create_dir_all(dest(tmp.path())).unwrap();
        let _held = JobLock::acquire(dest(tmp.path()), "app".into()).unwrap();

        let report = RunCoordinator::new(options())
            .run_backup(&profile, None)
            .unwrap();
        assert!(report.is_success());
        assert!(report.get("app").unwrap().is_skipped());
        assert!(list_snapshots(dest(tmp.path()), "app").unwrap().is_empty());
    }

    #[test]
    fn test_parallel_jobs_share_destination() {
        let tmp = TempDir::new().unwrap();
        let profile = Profile::from_jobs(
            ["a", "b", "c", "d"].map(|name| job(tmp.path(), name, 0, 0)),
        )
        .unwrap();
        let options = RunOptions::builder()
            .parallelism(4)
            .clock(fixed_clock)
            .build();

        let report = RunCoordinator::new(options).run_backup(&profile, None).unwrap();
        assert_eq!(report.len(), 4);
        assert!(report.is_success());
        for name in ["a", "b", "c", "d"] {
            let snapshots = list_snapshots(dest(tmp.path()), name).unwrap();
            assert_eq!(snapshots.len(), 1, "{name}");
            assert_eq!(read_rows(snapshots[0].path()), vec![name]);
        }
    }

    #[test]
    fn test_one_failing_job_fails_run_only() {
        let tmp = TempDir::new().unwrap();
        let broken = job(tmp.path(), "broken", 0, 0);
        std::fs::remove_file(broken.config().db_path()).unwrap();
        let profile = Profile::from_jobs([broken, job(tmp.path(), "ok", 0, 0)]).unwrap();

        let report = RunCoordinator::new(options())
            .run_backup(&profile, None)
            .unwrap();
        assert!(!report.is_success());
        assert_eq!(report.exit_code(), 1);
        assert!(report.get("broken").unwrap().is_failed());
        assert!(report.get("ok").unwrap().snapshot().is_some());
    }

    #[test]
    fn test_cancelled_run_skips_jobs() {
        let tmp = TempDir::new().unwrap();
        let profile = Profile::from_jobs([job(tmp.path(), "app", 0, 0)]).unwrap();
        let options = options();
        options.cancel_flag().store(true, Ordering::SeqCst);

        let report = RunCoordinator::new(options).run_backup(&profile, None).unwrap();
        assert!(report.is_success());
        assert!(matches!(
            report.get("app").unwrap().outcome(),
            JobOutcome::Skipped(SkipReason::Cancelled)
        ));
        assert!(!dest(tmp.path()).exists());
    }

    #[test]
    fn test_unknown_job_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let profile = Profile::from_jobs([job(tmp.path(), "app", 0, 0)]).unwrap();
        let coordinator = RunCoordinator::new(options());

        let err = coordinator.run_backup(&profile, Some("nope")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = coordinator.run_restore(&profile, "nope", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!dest(tmp.path()).exists());
    }

    #[test]
    fn test_empty_profile_is_empty_report() {
        let report = RunCoordinator::new(options())
            .run_backup(&Profile::default(), None)
            .unwrap();
        assert!(report.is_empty());
        assert!(report.is_success());
    }
}
