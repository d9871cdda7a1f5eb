//! Deadline arithmetic that never panics.

use std::time::{Duration, Instant};

/// Far enough ahead to mean "not in this process lifetime".
pub const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// `at + delay`, clamped to [`FAR_FUTURE`] when the sum does not fit in an
/// [`Instant`].
#[must_use]
pub fn later(at: Instant, delay: Duration) -> Instant {
    at.checked_add(delay)
        .or_else(|| at.checked_add(delay.min(FAR_FUTURE)))
        .unwrap_or(at)
}

#[cfg(test)]
mod tests {
    use super::{FAR_FUTURE, later};
    use std::time::{Duration, Instant};

    #[test]
    fn adds_in_range_and_clamps_overflow() {
        let now = Instant::now();
        assert_eq!(later(now, Duration::from_secs(5)), now + Duration::from_secs(5));
        assert_eq!(later(now, Duration::MAX), now + FAR_FUTURE);
        assert_eq!(later(now, Duration::from_secs(u64::MAX)), now + FAR_FUTURE);
    }
}
