use chrono::{DateTime, Duration, Utc};

/// Whether a backup is due at `now`, given the newest existing snapshot.
///
/// No previous snapshot, or a non-positive interval, is always due. A clock
/// that reads earlier than `last` counts as zero elapsed time.
pub fn is_due(last: Option<DateTime<Utc>>, interval_seconds: i64, now: DateTime<Utc>) -> bool {
    let Some(last) = last else {
        return true;
    };
    if interval_seconds <= 0 {
        return true;
    }

    let elapsed = now.signed_duration_since(last).max(Duration::zero());
    elapsed.num_seconds() >= interval_seconds
}

/// Earliest instant at which a backup becomes due again, if gating applies.
pub fn next_due(last: Option<DateTime<Utc>>, interval_seconds: i64) -> Option<DateTime<Utc>> {
    if interval_seconds <= 0 {
        return None;
    }
    last?.checked_add_signed(Duration::try_seconds(interval_seconds)?)
}
