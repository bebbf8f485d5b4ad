use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const MINUTE_MS: u64 = 60_000;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10);

/// Floors `ts` (epoch ms) to the start of its window.
///
/// Windows are aligned to the start of each minute, so a window size that does not divide
/// a minute yields a shorter last window in every minute.
#[inline]
pub fn normalize_ts(ts: u64, window_ms: u64) -> u64 {
    let window = window_ms.max(1);
    let within_minute = ts % MINUTE_MS;
    (ts - within_minute) + (within_minute / window) * window
}

/// End of the window that starts at `period` (exclusive), clamped to the minute boundary.
#[inline]
pub fn window_end(period: u64, window_ms: u64) -> u64 {
    let next_minute = period - period % MINUTE_MS + MINUTE_MS;
    period.saturating_add(window_ms.max(1)).min(next_minute)
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_floors_to_window_within_minute() {
        let minute = 1_700_000_040_000u64 - 1_700_000_040_000 % MINUTE_MS;
        assert_eq!(normalize_ts(minute, 10_000), minute);
        assert_eq!(normalize_ts(minute + 9_999, 10_000), minute);
        assert_eq!(normalize_ts(minute + 10_000, 10_000), minute + 10_000);
        assert_eq!(normalize_ts(minute + 59_999, 10_000), minute + 50_000);
    }

    #[test]
    fn uneven_windows_restart_each_minute() {
        let minute = 120_000u64;
        assert_eq!(normalize_ts(minute + 59_000, 7_000), minute + 56_000);
        assert_eq!(window_end(minute + 56_000, 7_000), minute + MINUTE_MS);
        assert_eq!(normalize_ts(minute + MINUTE_MS + 1, 7_000), minute + MINUTE_MS);
    }

    #[test]
    fn zero_window_is_treated_as_one_ms() {
        assert_eq!(normalize_ts(1234, 0), 1234);
    }
}
