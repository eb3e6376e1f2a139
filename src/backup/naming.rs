//! Snapshot file naming: `{job}.{stamp}.{ext}`.
//!
//! The stamp is the UTC creation time, `YYYYMMDDTHHMMSSZ`, optionally followed
//! by `_NNN` when more than one snapshot of a job lands in the same second.
//! Every part is fixed width, so sorting file names as strings sorts
//! snapshots chronologically. This layout is what existing backups on disk
//! are recognised by; changing it orphans them.
//!
//! Earlier releases of the tool wrote `{job}.YYYYMMDDHHMMSS.sqlite3[.zst]` in
//! local time. Those names still parse so old snapshots keep taking part in
//! retention and restore, but new snapshots are always written in the UTC form.

use chrono::{DateTime, Local, NaiveDateTime, SubsecRound, TimeZone, Utc};
use serde::{Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

static STAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const STAMP_LEN: usize = "YYYYMMDDTHHMMSSZ".len();
const SEQ_DIGITS: usize = 3;
pub const MAX_SEQ: u16 = 999;
static LEGACY_STAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const LEGACY_STAMP_LEN: usize = "YYYYMMDDHHMMSS".len();

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SnapshotStamp {
    time: DateTime<Utc>,
    seq: u16,
    legacy: bool,
}

impl SnapshotStamp {
    /// Stamp for `time`, truncated to whole seconds.
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time: time.trunc_subsecs(0),
            seq: 0,
            legacy: false,
        }
    }

    pub fn with_seq(time: DateTime<Utc>, seq: u16) -> Option<Self> {
        (seq <= MAX_SEQ).then(|| Self {
            seq,
            ..Self::new(time)
        })
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn seq(&self) -> u16 {
        self.seq
    }

    /// Whether this stamp came from a local-time name of an earlier release.
    pub fn is_legacy(&self) -> bool {
        self.legacy
    }

    /// The next stamp within the same second, if the sequence is not exhausted.
    /// Always in the current format.
    pub fn next(&self) -> Option<Self> {
        Self::with_seq(self.time, self.seq + 1)
    }

    /// Stamp for a snapshot taken at `now` that must sort after `last`.
    ///
    /// Falls back to bumping `last`'s sequence when the clock has not moved
    /// past it, either because of a same-second collision or clock skew.
    pub fn next_after(now: DateTime<Utc>, last: Option<&SnapshotStamp>) -> Option<Self> {
        let candidate = Self::new(now);
        match last {
            Some(last) if candidate <= *last => last.next(),
            _ => Some(candidate),
        }
    }
}

impl Display for SnapshotStamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.legacy {
            return write!(f, "{}", self.time.with_timezone(&Local).format(LEGACY_STAMP_FORMAT));
        }
        write!(f, "{}", self.time.format(STAMP_FORMAT))?;
        if self.seq > 0 {
            write!(f, "_{:0width$}", self.seq, width = SEQ_DIGITS)?;
        }
        Ok(())
    }
}

impl FromStr for SnapshotStamp {
    type Err = ();

    /// Accepts only the canonical form produced by `Display`, or a legacy
    /// local-time stamp.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == LEGACY_STAMP_LEN && s.bytes().all(|b| b.is_ascii_digit()) {
            return Self::parse_legacy(s);
        }
        let (base, seq) = match s.split_once('_') {
            Some((base, seq)) => (base, Some(seq)),
            None => (s, None),
        };
        if base.len() != STAMP_LEN {
            return Err(());
        }
        let time = NaiveDateTime::parse_from_str(base, STAMP_FORMAT)
            .map_err(|_| ())?
            .and_utc();
        let seq = match seq {
            None => 0,
            Some(seq) if seq.len() == SEQ_DIGITS && seq.bytes().all(|b| b.is_ascii_digit()) => {
                match seq.parse::<u16>() {
                    Ok(0) | Err(_) => return Err(()),
                    Ok(n) => n,
                }
            }
            Some(_) => return Err(()),
        };
        let stamp = Self::with_seq(time, seq).ok_or(())?;
        if stamp.to_string() != s {
            return Err(());
        }
        Ok(stamp)
    }
}

impl SnapshotStamp {
    /// Local wall-clock times skipped by a DST jump are never produced by a
    /// clock reading, so they are rejected. Repeated ones resolve to the earlier
    /// instant.
    fn parse_legacy(s: &str) -> Result<Self, ()> {
        let naive = NaiveDateTime::parse_from_str(s, LEGACY_STAMP_FORMAT).map_err(|_| ())?;
        let time = Local.from_local_datetime(&naive).earliest().ok_or(())?;
        Ok(Self {
            time: time.with_timezone(&Utc),
            seq: 0,
            legacy: true,
        })
    }
}

impl Serialize for SnapshotStamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotEncoding {
    Plain,
    Xz,
    /// Only read, for snapshots written by earlier releases.
    Zstd,
}

impl SnapshotEncoding {
    /// Compressed extensions first, so `.sqlite3.xz` is never read as `.sqlite3`.
    const PARSE_ORDER: [SnapshotEncoding; 3] = [
        SnapshotEncoding::Xz,
        SnapshotEncoding::Zstd,
        SnapshotEncoding::Plain,
    ];

    pub fn ext(&self) -> &'static str {
        match self {
            SnapshotEncoding::Plain => "sqlite3",
            SnapshotEncoding::Xz => "sqlite3.xz",
            SnapshotEncoding::Zstd => "sqlite3.zst",
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct SnapshotName {
    job: Arc<str>,
    stamp: SnapshotStamp,
    encoding: SnapshotEncoding,
}

impl SnapshotName {
    pub fn new<J: Into<Arc<str>>>(job: J, stamp: SnapshotStamp, encoding: SnapshotEncoding) -> Self {
        Self {
            job: job.into(),
            stamp,
            encoding,
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

    pub fn file_name(&self) -> String {
        format!("{}.{}.{}", self.job, self.stamp, self.encoding.ext())
    }

    /// Inverse of [`SnapshotName::file_name`]. Anything else yields `None`.
    pub fn parse(file_name: &str) -> Option<Self> {
        let (rest, encoding) = SnapshotEncoding::PARSE_ORDER.iter().find_map(|encoding| {
            file_name
                .strip_suffix(encoding.ext())
                .and_then(|rest| rest.strip_suffix('.'))
                .map(|rest| (rest, *encoding))
        })?;
        let (job, stamp) = rest.rsplit_once('.')?;
        if job.is_empty() {
            return None;
        }

        Some(Self::new(job, stamp.parse().ok()?, encoding))
    }
}

impl Display for SnapshotName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.file_name())
    }
}
