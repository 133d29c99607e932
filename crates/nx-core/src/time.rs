//! Wall-clock helpers
//!
//! Session and tunnel timestamps are unix millis so they serialize as plain
//! numbers for the dashboard.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch; 0 on a clock set before 1970
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Time since a millisecond timestamp, zero for timestamps in the future
pub fn elapsed_duration(since_millis: u64) -> Duration {
    Duration::from_millis(current_time_millis().saturating_sub(since_millis))
}
