//! Modification times, stored as seconds since the Unix epoch

use chrono::{DateTime, Utc};

/// Current time in seconds since the Unix epoch
pub fn now() -> u64 {
    // Clocks set before 1970 clamp to the epoch
    Utc::now().timestamp().max(0) as u64
}

/// Convert a stored timestamp for display
///
/// Returns `None` if the value is outside chrono's representable range.
pub fn to_datetime(secs: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(secs).ok()?;
    DateTime::from_timestamp(secs, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_after_2020() {
        assert!(now() > 1_577_836_800);
    }

    #[test]
    fn test_to_datetime() {
        let dt = to_datetime(0).unwrap();
        assert_eq!(dt.to_rfc3339(), "1970-01-01T00:00:00+00:00");

        assert!(to_datetime(u64::MAX).is_none());
    }
}
