//! # sqlite-backup
//!
//! Scheduled, retained backups of live SQLite databases, and restore from them.
//!
//! ## Features
//!
//! - **Online Backups**: SQLite's backup API, the source stays in use
//! - **Interval Gating**: A job is skipped until its interval has elapsed
//! - **Retention**: Keep the newest N snapshots per job
//! - **Compression**: Optional XZ (LZMA) with parallel processing
//! - **Safe Publication**: Temp file, fsync, then no-clobber rename
//! - **Parallel Jobs**: Independent jobs on a bounded thread pool
//!
//! Snapshots are plain files named `{job}.{YYYYMMDDTHHMMSSZ[_NNN]}.sqlite3[.xz]`.
//! All state is rediscovered from the destination directories on each run.
//!
//! ## Quick Start
//!
//! ```no_run
//! use sqlite_backup::backup::coordinator::{RunCoordinator, RunOptions};
//! use sqlite_backup::backup::job_config::Profile;
//!
//! let profile = Profile::load("profile.yml")?;
//! let report = RunCoordinator::new(RunOptions::default()).run_backup(&profile, None)?;
//! for result in report.results() {
//!     println!("{result}");
//! }
//! std::process::exit(report.exit_code());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
