use crate::backup::result_error::error::Error;
use crate::backup::snapshot::Snapshot;
use chrono::{DateTime, Utc};
use derive_more::Display;
use itertools::Itertools;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt::Formatter;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Display, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    #[display("not due, last snapshot at {last}{}", next_due.map(|t| format!(", next due at {t}")).unwrap_or_default())]
    NotDue {
        last: DateTime<Utc>,
        next_due: Option<DateTime<Utc>>,
    },
    #[display("job is already running")]
    LockContention,
    #[display("run cancelled before the job started")]
    Cancelled,
}

#[derive(Debug)]
pub enum JobOutcome {
    Skipped(SkipReason),
    /// `snapshot` is the artifact written by a backup, or the one read by a
    /// restore. A `prune_error` marks a partial failure.
    Succeeded {
        snapshot: Snapshot,
        pruned: Vec<Snapshot>,
        prune_error: Option<Error>,
    },
    Failed(Error),
}

#[derive(Debug)]
pub struct RunResult {
    job: Arc<str>,
    outcome: JobOutcome,
}

impl RunResult {
    pub fn new(job: Arc<str>, outcome: JobOutcome) -> Self {
        Self { job, outcome }
    }

    pub fn job(&self) -> &Arc<str> {
        &self.job
    }

    pub fn outcome(&self) -> &JobOutcome {
        &self.outcome
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, JobOutcome::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, JobOutcome::Skipped(_))
    }

    pub fn is_partial_failure(&self) -> bool {
        matches!(
            self.outcome,
            JobOutcome::Succeeded {
                prune_error: Some(_),
                ..
            }
        )
    }

    pub fn snapshot(&self) -> Option<&Snapshot> {
        match &self.outcome {
            JobOutcome::Succeeded { snapshot, .. } => Some(snapshot),
            _ => None,
        }
    }

    pub fn pruned(&self) -> &[Snapshot] {
        match &self.outcome {
            JobOutcome::Succeeded { pruned, .. } => pruned,
            _ => &[],
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match &self.outcome {
            JobOutcome::Failed(e) => Some(e),
            JobOutcome::Succeeded { prune_error, .. } => prune_error.as_ref(),
            JobOutcome::Skipped(_) => None,
        }
    }

    pub fn status(&self) -> &'static str {
        match &self.outcome {
            JobOutcome::Skipped(_) => "skipped",
            JobOutcome::Succeeded { .. } if self.is_partial_failure() => "partial",
            JobOutcome::Succeeded { .. } => "succeeded",
            JobOutcome::Failed(_) => "failed",
        }
    }
}

impl std::fmt::Display for RunResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.status(), self.job)?;
        match &self.outcome {
            JobOutcome::Skipped(reason) => write!(f, ": {reason}"),
            JobOutcome::Succeeded {
                snapshot,
                pruned,
                prune_error,
            } => {
                write!(f, ": {} ({} bytes)", snapshot.path().display(), snapshot.size())?;
                if !pruned.is_empty() {
                    write!(f, ", pruned {}", pruned.iter().map(Snapshot::file_name).join(", "))?;
                }
                if let Some(e) = prune_error {
                    write!(f, "\n{}", indent::indent_all_with("  ", e.to_string()))?;
                }
                Ok(())
            }
            JobOutcome::Failed(e) => {
                write!(f, ":\n{}", indent::indent_all_with("  ", e.to_string()))
            }
        }
    }
}

impl Serialize for RunResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("RunResult", 7)?;
        s.serialize_field("job", &self.job)?;
        s.serialize_field("status", self.status())?;
        s.serialize_field(
            "skip_reason",
            &match &self.outcome {
                JobOutcome::Skipped(reason) => Some(reason),
                _ => None,
            },
        )?;
        s.serialize_field("error_kind", &self.error().map(Error::kind))?;
        s.serialize_field("error", &self.error().map(ToString::to_string))?;
        s.serialize_field("snapshot", &self.snapshot())?;
        s.serialize_field("pruned", self.pruned())?;
        s.end()
    }
}

/// Results of one run keyed by job name, independent of completion order.
#[derive(Debug, Default, Serialize)]
#[serde(transparent)]
pub struct RunReport {
    results: BTreeMap<Arc<str>, RunResult>,
}

impl RunReport {
    pub fn insert(&mut self, result: RunResult) {
        self.results.insert(result.job.clone(), result);
    }

    pub fn get(&self, job: &str) -> Option<&RunResult> {
        self.results.get(job)
    }

    pub fn results(&self) -> impl Iterator<Item = &RunResult> {
        self.results.values()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Skips and partial failures do not fail a run.
    pub fn is_success(&self) -> bool {
        !self.results.values().any(RunResult::is_failed)
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

impl FromIterator<RunResult> for RunReport {
    fn from_iter<T: IntoIterator<Item = RunResult>>(iter: T) -> Self {
        let mut report = RunReport::default();
        iter.into_iter().for_each(|r| report.insert(r));
        report
    }
}
