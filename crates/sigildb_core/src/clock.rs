//! Wall clock in microseconds.

use std::time::{SystemTime, UNIX_EPOCH};

/// Microseconds per day.
pub(crate) const DAY_MICROS: i64 = 24 * 3600 * 1_000_000;

/// Returns the current time in microseconds since the Unix epoch.
///
/// A clock set before the epoch reads as negative.
#[must_use]
pub fn now_micros() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_micros()).unwrap_or(i64::MAX),
        Err(e) => -i64::try_from(e.duration().as_micros()).unwrap_or(i64::MAX),
    }
}
