use crate::backup::result_error::{AddDebugObjectAndFnName, AddFunctionName, AddMsg};
use derive_more::Display;
use itertools::Itertools;
use serde::Serialize;
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use thiserror_ext::Construct;

#[derive(Error, Debug, Construct)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Rusqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    LiblzmaStream(#[from] liblzma::stream::Error),
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    ThreadPoolBuildError(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Job {0:?} not found in profile")]
    JobNotFound(Arc<str>),
    #[error("No snapshot {} found for job {:?}", .id.as_deref().unwrap_or("(latest)"), .job)]
    SnapshotNotFound { job: Arc<str>, id: Option<String> },
    #[error("Job {job:?} is already running, lock held: {lock_path:?}")]
    LockContention { job: Arc<str>, lock_path: PathBuf },
    #[error("Backup succeeded but pruning of {failed} snapshot(s) failed:\n{}", indent::indent_all_with("  ", error.to_string()))]
    PruneIncomplete { failed: usize, error: Box<Error> },
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{} failed:\n{}", fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithFnName { fn_name: String, error: Box<Error> },
    #[error("{:?} {} failed:\n{}", obj_debug, fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithDebugObjAndFnName {
        error: Box<Error>,
        obj_debug: Box<dyn Debug + Send + Sync>,
        fn_name: String,
    },
    #[error("{}", itertools::join(.0, "\n\n"))]
    LotsOfError(Vec<Error>),
}

/// Coarse classification of an [`Error`], independent of the context wrappers
/// attached on the way up.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    NotFound,
    Io,
    LockContention,
    PartialFailure,
}

impl<S: Into<String>, O: Debug + Send + Sync + 'static> AddDebugObjectAndFnName<S, O> for Error {
    fn add_debug_object_and_fn_name(self, obj: O, fn_name: S) -> Self {
        Error::WithDebugObjAndFnName {
            error: Box::new(self),
            obj_debug: Box::new(obj),
            fn_name: fn_name.into(),
        }
    }
}

impl<S: Into<String>> AddMsg<S> for Error {
    fn add_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl<S: Into<String>> AddFunctionName<S> for Error {
    fn add_fn_name(self, fn_name: S) -> Self {
        Self::WithFnName {
            fn_name: fn_name.into(),
            error: Box::new(self),
        }
    }
}

impl From<Vec<Error>> for Error {
    fn from(errors: Vec<Error>) -> Self {
        if errors.is_empty() {
            panic!("Should not create lots of errors when error is empty")
        }
        Self::LotsOfError(errors.into_iter().flat_map(Error::into_iter).collect_vec())
    }
}

impl Error {
    pub fn into_iter(self) -> Box<dyn Iterator<Item = Error>> {
        match self {
            Error::LotsOfError(v) => Box::new(v.into_iter().flat_map(Error::into_iter)),
            e => Box::new(std::iter::once(e)),
        }
    }

    pub fn chain(self, other: Error) -> Error {
        Error::LotsOfError(self.into_iter().chain(other.into_iter()).collect_vec())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_)
            | Error::Rusqlite(_)
            | Error::LiblzmaStream(_)
            | Error::ThreadPoolBuildError(_)
            | Error::SerdeJson(_) => ErrorKind::Io,
            Error::ValidationError(_) | Error::SerdeYml(_) | Error::Config(_) => ErrorKind::Config,
            Error::JobNotFound(_) | Error::SnapshotNotFound { .. } => ErrorKind::NotFound,
            Error::LockContention { .. } => ErrorKind::LockContention,
            Error::PruneIncomplete { .. } => ErrorKind::PartialFailure,
            Error::WithMsg { error, .. }
            | Error::WithFnName { error, .. }
            | Error::WithDebugObjAndFnName { error, .. } => error.kind(),
            Error::LotsOfError(errors) => errors.first().map_or(ErrorKind::Io, Error::kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn not_found_io() -> Error {
        Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"))
    }

    #[test]
    fn test_error_from_io_error() {
        match not_found_io() {
            Error::Io(_) => (),
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_error_add_msg() {
        match not_found_io().add_msg("Custom message") {
            Error::WithMsg { msg, .. } => assert_eq!(msg, "Custom message"),
            _ => panic!("Expected WithMsg error"),
        }
    }

    #[test]
    fn test_error_add_fn_name_display() {
        let error_str = not_found_io().add_fn_name("backup_job").to_string();
        assert!(error_str.contains("backup_job failed"));
        assert!(error_str.contains("file not found"));
    }

    #[test]
    fn test_error_add_debug_object_and_fn_name() {
        let error_str = not_found_io()
            .add_debug_object_and_fn_name(42, "test_function")
            .to_string();

        assert!(error_str.contains("42 test_function failed"));
        assert!(error_str.contains("file not found"));
    }

    #[test]
    fn test_error_from_vec_flattens() {
        let nested = Error::from(vec![not_found_io(), not_found_io()]);
        let combined = Error::from(vec![nested, not_found_io()]);
        match combined {
            Error::LotsOfError(error_vec) => assert_eq!(error_vec.len(), 3),
            _ => panic!("Expected LotsOfError"),
        }
    }

    #[test]
    #[should_panic(expected = "Should not create lots of errors when error is empty")]
    fn test_error_from_empty_vec_panics() {
        let _error = Error::from(Vec::<Error>::new());
    }

    #[test]
    fn test_error_chain() {
        match not_found_io().chain(not_found_io()) {
            Error::LotsOfError(errors) => assert_eq!(errors.len(), 2),
            _ => panic!("Expected LotsOfError"),
        }
    }

    #[test]
    fn test_kind_sees_through_wrappers() {
        let err = Error::lock_contention("db", "/tmp/.db.lock")
            .add_msg("outer")
            .add_fn_name("run");
        assert_eq!(err.kind(), ErrorKind::LockContention);

        let err = Error::snapshot_not_found("db", None::<String>).add_msg("restore");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(Error::config("bad").kind(), ErrorKind::Config);
        assert_eq!(not_found_io().kind(), ErrorKind::Io);
    }

    #[test]
    fn test_prune_incomplete_is_partial_failure() {
        let err = Error::prune_incomplete(2usize, not_found_io());
        assert_eq!(err.kind(), ErrorKind::PartialFailure);
        assert!(err.to_string().contains("pruning of 2 snapshot(s) failed"));
    }

    #[test]
    fn test_snapshot_not_found_display() {
        let err = Error::snapshot_not_found("db", Some("20240101T000000Z".to_string()));
        assert_eq!(
            err.to_string(),
            "No snapshot 20240101T000000Z found for job \"db\""
        );
    }
}
