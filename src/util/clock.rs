//! Wall-clock helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// Current wall-clock time in whole seconds since the Unix epoch.
///
/// Block-list entries and credential issuance times are stamped with this.
#[must_use]
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_monotonic_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
    }

    #[test]
    fn test_secs_ms_agree() {
        let secs = now_secs();
        let ms = now_ms();
        let secs_from_ms = u64::try_from(ms / 1000).unwrap();
        assert!(secs_from_ms >= secs);
        assert!(secs_from_ms - secs <= 1);
    }
}
