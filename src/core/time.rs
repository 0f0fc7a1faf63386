//! Wall-clock helpers.
//!
//! Expiry deadlines are stored as absolute unix milliseconds so that
//! snapshots round-trip across restarts without rebasing.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current wall clock as unix milliseconds.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Absolute deadline `secs` seconds from now.
pub fn deadline_in_secs(secs: u64) -> u64 {
    unix_millis().saturating_add(secs.saturating_mul(1000))
}

/// Remaining whole seconds until `deadline_ms`, rounded up.
///
/// Returns 0 when the deadline has passed.
pub fn remaining_secs(deadline_ms: u64) -> u64 {
    let now = unix_millis();
    if deadline_ms <= now {
        return 0;
    }
    (deadline_ms - now).div_ceil(1000)
}

/// Convert a caller-specified pop timeout (seconds, fractional allowed
/// on the wire) into a `Duration`. Zero means "do not block".
pub fn pop_timeout(secs: f64) -> Duration {
    if secs <= 0.0 {
        Duration::ZERO
    } else {
        Duration::from_secs_f64(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_round_trip() {
        let d = deadline_in_secs(10);
        let remaining = remaining_secs(d);
        assert!(remaining >= 9 && remaining <= 10);
    }

    #[test]
    fn test_remaining_past_deadline() {
        assert_eq!(remaining_secs(0), 0);
        assert_eq!(remaining_secs(unix_millis().saturating_sub(5000)), 0);
    }

    #[test]
    fn test_pop_timeout_zero() {
        assert_eq!(pop_timeout(0.0), Duration::ZERO);
        assert_eq!(pop_timeout(-1.0), Duration::ZERO);
        assert_eq!(pop_timeout(1.5), Duration::from_millis(1500));
    }
}
