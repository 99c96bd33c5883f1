use chrono::Utc;

/// Seconds since the Unix epoch, used for `created`/`modified` columns (§3).
pub(crate) fn now() -> i64 {
    Utc::now().timestamp()
}
