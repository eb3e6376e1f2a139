//! Count based retention: keep the `keep` newest snapshots of a job.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::AddMsg;
use crate::backup::snapshot::Snapshot;
use itertools::Itertools;
use std::io;
use std::path::Path;
use tracing::{info, warn};

/// Snapshots that fall outside retention, oldest first.
///
/// `keep == 0` means unlimited retention and selects nothing.
pub fn select_for_deletion(snapshots: &[Snapshot], keep: usize) -> Vec<&Snapshot> {
    if keep == 0 || snapshots.len() <= keep {
        return Vec::new();
    }

    let expired = snapshots.len() - keep;
    snapshots
        .iter()
        .sorted_by_key(|s| s.stamp())
        .take(expired)
        .collect()
}

#[derive(Debug, Default)]
pub struct PruneOutcome {
    pub deleted: Vec<Snapshot>,
    pub error: Option<Error>,
}

/// Deletes every snapshot outside retention through `remove`, never touching
/// `protect`.
///
/// Each deletion is attempted on its own; failures are gathered into
/// `PruneOutcome::error` and the remaining deletions still run.
pub fn prune(
    snapshots: &[Snapshot],
    keep: usize,
    protect: Option<&Path>,
    remove: impl Fn(&Path) -> io::Result<()>,
) -> PruneOutcome {
    let mut outcome = PruneOutcome::default();
    let mut errors = Vec::new();

    for snapshot in select_for_deletion(snapshots, keep) {
        if protect == Some(snapshot.path()) {
            continue;
        }
        info!("Removing out of retention snapshot {:?}", snapshot.path());
        match remove(snapshot.path()) {
            Ok(()) => outcome.deleted.push(snapshot.clone()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("Snapshot {:?} already removed", snapshot.path());
            }
            Err(e) => errors.push(
                Error::from(e).add_msg(format!("Failed to remove {:?}", snapshot.path())),
            ),
        }
    }

    if !errors.is_empty() {
        let failed = errors.len();
        outcome.error = Some(Error::prune_incomplete(failed, Error::from(errors)));
    }
    outcome
}
