//! Profile loading: a YAML mapping of job name to [`JobConfig`].
//!
//! ```yaml
//! app:
//!   db_path: ./data/app.sqlite3
//!   dest_dir: $BACKUP_ROOT/app
//!   retention: 7
//!   interval: 86400
//!   compression:
//!     compressor_type: xz
//!     level: 6
//! ```
//!
//! Relative paths are resolved against the directory of the profile file,
//! after `$VAR` and `${VAR}` references are expanded from the environment.

use crate::backup::compress::CompressorConfig;
use crate::backup::naming::SnapshotEncoding;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::AddMsg;
use crate::backup::validate::{validate_dir_or_absent, validate_job_name, validate_non_empty_path};
use bon::Builder;
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use validator::Validate;

#[skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct JobConfig {
    /// Live database to back up, and the target of a restore.
    #[validate(custom(function = validate_non_empty_path))]
    #[builder(into)]
    db_path: PathBuf,
    /// Directory holding this job's snapshots.
    #[validate(custom(function = validate_dir_or_absent))]
    #[builder(into)]
    dest_dir: PathBuf,
    /// Snapshots to keep, `0` or absent keeps all of them.
    retention: Option<usize>,
    /// Minimum seconds between two snapshots, `0` or absent disables gating.
    #[validate(range(min = 0))]
    interval: Option<i64>,
    #[serde(default)]
    #[validate(nested)]
    #[builder(default)]
    compression: CompressorConfig,
}

impl JobConfig {
    pub fn retention_count(&self) -> usize {
        self.retention.unwrap_or(0)
    }

    pub fn interval_seconds(&self) -> i64 {
        self.interval.unwrap_or(0)
    }

    pub fn encoding(&self) -> SnapshotEncoding {
        self.compression.encoding()
    }

    fn resolve_paths(mut self, base_dir: &Path) -> Self {
        self.db_path = resolve_path(base_dir, &self.db_path);
        self.dest_dir = resolve_path(base_dir, &self.dest_dir);
        self
    }
}

/// A named job, cheap to clone and hand to worker threads.
#[derive(Clone, Debug, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct Job {
    name: Arc<str>,
    config: Arc<JobConfig>,
}

impl Job {
    pub fn new<N: Into<Arc<str>>>(name: N, config: JobConfig) -> Self {
        Self {
            name: name.into(),
            config: Arc::new(config),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Profile {
    jobs: BTreeMap<Arc<str>, Arc<JobConfig>>,
}

impl Profile {
    /// Reads, resolves and validates the profile at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = std::path::absolute(path.as_ref())?;
        let base_dir = path.parent().unwrap_or(Path::new("/")).to_path_buf();
        let profile = File::open(&path)
            .map_err(Error::from)
            .and_then(|f| serde_yml::from_reader::<_, Profile>(f).map_err(Error::from))
            .add_msg(format!("Parse YAML profile failed: {:?}", &path))?;

        let profile = profile.resolve_paths(&base_dir);
        profile
            .validate()
            .add_msg(format!("Profile validation failed: {:?}", &path))?;
        Ok(profile)
    }

    /// Parses a profile from YAML text, resolving relative paths against `base_dir`.
    pub fn from_yaml_str<P: AsRef<Path>>(yaml: &str, base_dir: P) -> Result<Self> {
        let profile = serde_yml::from_str::<Profile>(yaml)?.resolve_paths(base_dir.as_ref());
        profile.validate()?;
        Ok(profile)
    }

    pub fn from_jobs<I: IntoIterator<Item = Job>>(jobs: I) -> Result<Self> {
        let profile = Self {
            jobs: jobs
                .into_iter()
                .map(|job| (job.name, job.config))
                .collect(),
        };
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<()> {
        let errors = self
            .jobs
            .iter()
            .filter_map(|(name, config)| {
                validate_job_name(name)
                    .map_err(|e| Error::config(e.to_string()))
                    .and_then(|_| config.validate().map_err(Error::from))
                    .map_err(|e| e.add_msg(format!("Invalid job {name:?}")))
                    .err()
            })
            .collect();
        convert_error_vec(errors)
    }

    pub fn jobs(&self) -> impl Iterator<Item = Job> + '_ {
        self.jobs.iter().map(|(name, config)| Job {
            name: name.clone(),
            config: config.clone(),
        })
    }

    pub fn job(&self, name: &str) -> Option<Job> {
        self.jobs.get_key_value(name).map(|(name, config)| Job {
            name: name.clone(),
            config: config.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn resolve_paths(self, base_dir: &Path) -> Self {
        Self {
            jobs: self
                .jobs
                .into_iter()
                .map(|(name, config)| {
                    let config = Arc::unwrap_or_clone(config).resolve_paths(base_dir);
                    (name, Arc::new(config))
                })
                .collect(),
        }
    }
}

fn resolve_path(base_dir: &Path, raw: &Path) -> PathBuf {
    let expanded = match raw.to_str() {
        Some(s) => PathBuf::from(expand_env_vars(s)),
        None => raw.to_path_buf(),
    };
    if expanded.is_absolute() {
        expanded
    } else {
        base_dir.join(expanded)
    }
}

/// Expands `$VAR` and `${VAR}`. Unset variables are left untouched.
fn expand_env_vars(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(idx) = rest.find('$') {
        out.push_str(&rest[..idx]);
        let after = &rest[idx + 1..];
        let (name, consumed) = match after.strip_prefix('{') {
            Some(braced) => match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            },
            None => {
                let end = after
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .unwrap_or(after.len());
                (&after[..end], end)
            }
        };
        match Some(name)
            .filter(|name| !name.is_empty())
            .and_then(|name| std::env::var(name).ok())
        {
            Some(value) => out.push_str(&value),
            None => {
                out.push('$');
                out.push_str(&after[..consumed]);
            }
        }
        rest = &after[consumed..];
    }
    out.push_str(rest);
    out
}
