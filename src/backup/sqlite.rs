use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use function_name::named;
use rusqlite::backup::Progress;
use rusqlite::{Connection, OpenFlags, MAIN_DB};
use std::io;
use std::path::Path;

/// Database level copy primitives used by the job executor.
pub trait DbCopier: Sync {
    /// Writes a consistent point-in-time copy of the live database `src` to `dst`.
    fn backup_to(&self, src: &Path, dst: &Path) -> Result<()>;

    /// Replaces the database at `dst` with the contents of `snapshot`.
    fn restore_from(&self, snapshot: &Path, dst: &Path) -> Result<()>;

    /// Deletes a snapshot that fell out of retention.
    fn discard(&self, snapshot: &Path) -> io::Result<()> {
        std::fs::remove_file(snapshot)
    }
}

/// [`DbCopier`] backed by SQLite's online backup API.
///
/// The source stays readable and writable by other connections while a
/// backup runs; restore fails instead of overwriting a database that another
/// connection keeps locked.
#[derive(Clone, Copy, Debug, Default)]
pub struct SqliteCopier;

fn log_progress(progress: Progress) {
    tracing::trace!(
        "Copied {} of {} pages",
        progress.pagecount - progress.remaining,
        progress.pagecount
    );
}

impl DbCopier for SqliteCopier {
    #[named]
    fn backup_to(&self, src: &Path, dst: &Path) -> Result<()> {
        if !src.is_file() {
            return Err(Error::from(io::Error::new(
                io::ErrorKind::NotFound,
                format!("source database {src:?} does not exist"),
            )));
        }

        let conn = Connection::open_with_flags(
            src,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(Error::from)
        .add_msg(format!("Failed to open source database {src:?}"))?;

        conn.backup(MAIN_DB, dst, Some(log_progress as fn(Progress)))
            .map_err(Error::from)
            .add_msg(format!("Failed to back up {src:?} into {dst:?}"))
            .add_fn_name(function_path!())
    }

    #[named]
    fn restore_from(&self, snapshot: &Path, dst: &Path) -> Result<()> {
        let mut conn = Connection::open(dst)
            .map_err(Error::from)
            .add_msg(format!("Failed to open restore target {dst:?}"))?;

        conn.restore(MAIN_DB, snapshot, Some(log_progress as fn(Progress)))
            .map_err(Error::from)
            .add_msg(format!("Failed to restore {snapshot:?} into {dst:?}"))
            .add_fn_name(function_path!())
    }
}
