//! Wall-clock helpers.
//!
//! Expiration instants are stored as milliseconds since the Unix epoch so
//! they survive snapshot round-trips unchanged.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Current wall-clock time as (seconds, microseconds) since the Unix epoch.
pub fn now_secs_micros() -> (u64, u64) {
    let d = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (d.as_secs(), u64::from(d.subsec_micros()))
}
