//! Chrome ↔ Unix timestamp conversion.
//!
//! Chrome stores times as microseconds since 1601-01-01 UTC (the Windows
//! FILETIME epoch). Zen Browser and the export formats count from the Unix
//! epoch, so every date field crosses this boundary exactly once.

use chrono::Utc;

/// Seconds between 1601-01-01 and 1970-01-01 UTC.
const EPOCH_OFFSET_SECS: i64 = 11_644_473_600;

/// Convert a Chrome timestamp (microseconds since 1601) to Unix seconds.
///
/// Values that would land before the Unix epoch clamp to 0 instead of going
/// negative; Chrome writes 0 for "never" and some stores carry garbage.
pub fn to_unix_secs(chrome_us: i64) -> i64 {
    let secs = chrome_us / 1_000_000 - EPOCH_OFFSET_SECS;
    secs.max(0)
}

/// Convert Unix seconds back to a Chrome timestamp in microseconds.
pub fn from_unix_secs(unix_secs: i64) -> i64 {
    (unix_secs + EPOCH_OFFSET_SECS) * 1_000_000
}

/// Chrome timestamp for the instant `days` days before now.
///
/// Used as the lower bound when slicing a history window.
pub fn cutoff_days_ago(days: u32) -> i64 {
    from_unix_secs(Utc::now().timestamp() - i64::from(days) * 86_400)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_reference_value() {
        // 13_000_000_000_000 µs after 1601 is 2012-12-14 22:26:40 UTC.
        assert_eq!(to_unix_secs(13_000_000_000_000), 1_355_526_400);
    }

    #[test]
    fn pre_unix_values_clamp_to_zero() {
        assert_eq!(to_unix_secs(0), 0);
        assert_eq!(to_unix_secs(1), 0);
        // One microsecond short of the Unix epoch.
        assert_eq!(to_unix_secs(EPOCH_OFFSET_SECS * 1_000_000 - 1), 0);
        // Exactly at the epoch.
        assert_eq!(to_unix_secs(EPOCH_OFFSET_SECS * 1_000_000), 0);
    }

    #[test]
    fn round_trips_above_the_epoch() {
        let unix = 1_700_000_000;
        assert_eq!(to_unix_secs(from_unix_secs(unix)), unix);
    }

    #[test]
    fn cutoff_is_in_the_past() {
        let now = from_unix_secs(Utc::now().timestamp());
        assert!(cutoff_days_ago(30) < now);
        assert!(cutoff_days_ago(1) > cutoff_days_ago(30));
    }
}
