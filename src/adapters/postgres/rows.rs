//! Column conversions shared by the box stores.

use chrono::{DateTime, Utc};

use crate::domain::foundation::Timestamp;

pub(super) fn optional_timestamp(value: Option<DateTime<Utc>>) -> Option<Timestamp> {
    value.map(Timestamp::from_datetime)
}

/// `retry_count` is an INTEGER column; negative values never occur but clamp anyway.
pub(super) fn retry_count_from_db(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}
