//! Shared utilities.

pub mod exec;
pub mod path;

/// Current unix time in whole seconds.
#[inline]
pub fn unix_now() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
