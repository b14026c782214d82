//! Reconnect backoff

use std::time::Duration;

use rand::Rng;

/// Exponential delay with a cap and up to 10% jitter
///
/// The first retry after a working connection is immediate.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            attempt: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let attempt = self.attempt;
        self.attempt = self.attempt.saturating_add(1);
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = (attempt - 1).min(16);
        let delay = self.base.saturating_mul(1 << exponent).min(self.max);
        let jitter_ms = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 10);
        (delay + Duration::from_millis(jitter_ms)).min(self.max)
    }

    /// Called after a successful handshake
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_growth_and_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(backoff.next_delay(), Duration::ZERO);

        let second = backoff.next_delay();
        assert!(second >= Duration::from_secs(1) && second <= Duration::from_millis(1_100));

        let third = backoff.next_delay();
        assert!(third >= Duration::from_secs(2) && third <= Duration::from_millis(2_200));

        for _ in 0..20 {
            assert!(backoff.next_delay() <= Duration::from_secs(10));
        }
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempts(), 2);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::ZERO);
    }
}
