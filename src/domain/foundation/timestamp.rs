//! Timestamp value object for immutable points in time.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Immutable point in time, always UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a timestamp for the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a timestamp from a DateTime<Utc>.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the inner DateTime.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Checks if this timestamp is before another.
    pub fn is_before(&self, other: &Timestamp) -> bool {
        self.0 < other.0
    }

    /// Checks if this timestamp is after another.
    pub fn is_after(&self, other: &Timestamp) -> bool {
        self.0 > other.0
    }

    /// Returns the duration from another timestamp to this one.
    ///
    /// Returns negative duration if other is after self.
    pub fn duration_since(&self, other: &Timestamp) -> Duration {
        self.0.signed_duration_since(other.0)
    }

    /// Creates a new timestamp offset forward by a std duration.
    ///
    /// Saturates at the far future instead of overflowing.
    pub fn plus(&self, offset: std::time::Duration) -> Self {
        Duration::from_std(offset)
            .ok()
            .and_then(|d| self.0.checked_add_signed(d))
            .map(Self)
            .unwrap_or(Self(DateTime::<Utc>::MAX_UTC))
    }

    /// Creates a new timestamp offset backward by a std duration.
    ///
    /// Saturates at the far past instead of overflowing.
    pub fn minus(&self, offset: std::time::Duration) -> Self {
        Duration::from_std(offset)
            .ok()
            .and_then(|d| self.0.checked_sub_signed(d))
            .map(Self)
            .unwrap_or(Self(DateTime::<Utc>::MIN_UTC))
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use std::thread::sleep;

    #[test]
    fn timestamp_now_creates_current_time() {
        let before = Utc::now();
        let ts = Timestamp::now();
        let after = Utc::now();

        assert!(ts.as_datetime() >= &before);
        assert!(ts.as_datetime() <= &after);
    }

    #[test]
    fn timestamp_is_before_works_correctly() {
        let ts1 = Timestamp::now();
        sleep(std::time::Duration::from_millis(10));
        let ts2 = Timestamp::now();

        assert!(ts1.is_before(&ts2));
        assert!(!ts2.is_before(&ts1));
        assert!(ts2.is_after(&ts1));
    }

    #[test]
    fn timestamp_deserializes_from_json() {
        let json = "\"2024-01-15T10:30:00Z\"";
        let ts: Timestamp = serde_json::from_str(json).unwrap();

        assert_eq!(ts.as_datetime().year(), 2024);
    }

    #[test]
    fn plus_and_minus_offset_by_std_duration() {
        let ts = Timestamp::now();
        let later = ts.plus(std::time::Duration::from_secs(90));
        let earlier = ts.minus(std::time::Duration::from_secs(90));

        assert_eq!(later.duration_since(&ts), Duration::seconds(90));
        assert_eq!(ts.duration_since(&earlier), Duration::seconds(90));
    }

    #[test]
    fn minus_saturates_instead_of_overflowing() {
        let ts = Timestamp::now();
        let far = ts.minus(std::time::Duration::from_secs(u64::MAX));
        assert_eq!(far.as_datetime(), &DateTime::<Utc>::MIN_UTC);
    }
}
