//! Exponential reconnect backoff.

use std::time::Duration;

/// Capped exponential backoff for reconnect attempts.
///
/// Delays follow `min(base * 2^attempt, cap)`. The counter advances on
/// every [`Backoff::next_delay`] call and rewinds to zero on
/// [`Backoff::reset`], so a successful authentication makes the next
/// disconnect start from the base delay again.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    /// Creates a backoff starting at `base` and saturating at `cap`.
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempt: 0,
        }
    }

    /// Returns the delay for the current attempt and advances the counter.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self.base.saturating_mul(1u32.checked_shl(self.attempt).unwrap_or(u32::MAX));
        let delay = exp.min(self.cap);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Returns how many delays have been handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Rewinds the attempt counter.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test_case(0, 1_000; "first attempt is base")]
    #[test_case(1, 2_000; "second doubles")]
    #[test_case(2, 4_000; "third doubles again")]
    #[test_case(4, 16_000; "fifth still below cap")]
    #[test_case(5, 30_000; "sixth hits cap")]
    #[test_case(20, 30_000; "stays capped")]
    fn test_delay_schedule(skip: u32, expected_millis: u64) {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        for _ in 0..skip {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_millis(expected_millis));
    }

    #[test]
    fn test_reset_rewinds() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempts(), 2);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_large_attempt_does_not_overflow() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        for _ in 0..200 {
            assert!(backoff.next_delay() <= Duration::from_secs(30));
        }
    }
}
