//! Conversions between `time` (used by the storage model) and `chrono`
//! (bound by sqlx-postgres).

use chrono::{DateTime, Utc};
use time::OffsetDateTime;

pub(crate) fn time_to_chrono(t: OffsetDateTime) -> DateTime<Utc> {
    DateTime::from_timestamp(t.unix_timestamp(), t.nanosecond()).unwrap_or_else(Utc::now)
}

pub(crate) fn chrono_to_time(t: DateTime<Utc>) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(t.timestamp())
        .and_then(|dt| dt.replace_nanosecond(t.timestamp_subsec_nanos()))
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
}
