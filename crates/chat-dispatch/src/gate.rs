//! Per-bucket quota gate
//!
//! Route buckets learn their quota from response headers. Gateway buckets
//! have a fixed, advertised quota enforced by a `governor` limiter before
//! anything is sent.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::Clock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use tokio::time::Instant;

use crate::headers::RateLimitInfo;

/// Clock that follows tokio time, so paused runtimes drive the limiter too
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        Instant::now().into_std()
    }
}

type FixedLimiter =
    RateLimiter<NotKeyed, InMemoryState, TokioClock, NoOpMiddleware<std::time::Instant>>;

/// How a gate learns its quota
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateMode {
    /// Quota is learned from responses; unknown quota never blocks.
    Reactive,
    /// Fixed quota per window, enforced before any response is seen.
    Preemptive { quota: u32, window: Duration },
}

/// Quota state for one bucket
pub struct BucketGate {
    mode: GateMode,
    limiter: Option<FixedLimiter>,
    limit: Option<u32>,
    /// `None` means unknown (reactive gate before the first response)
    remaining: Option<u32>,
    reset_at: Option<Instant>,
}

impl BucketGate {
    #[must_use]
    pub fn reactive() -> Self {
        Self {
            mode: GateMode::Reactive,
            limiter: None,
            limit: None,
            remaining: None,
            reset_at: None,
        }
    }

    /// `quota` sends per `window`, replenished one at a time
    #[must_use]
    pub fn preemptive(quota: u32, window: Duration) -> Self {
        let burst = NonZeroU32::new(quota).unwrap_or(NonZeroU32::MIN);
        let period = (window / burst.get()).max(Duration::from_nanos(1));
        let limiter = Quota::with_period(period)
            .map(|q| RateLimiter::direct_with_clock(q.allow_burst(burst), TokioClock));

        Self {
            mode: GateMode::Preemptive {
                quota: burst.get(),
                window,
            },
            limiter,
            limit: None,
            remaining: None,
            reset_at: None,
        }
    }

    #[must_use]
    pub fn mode(&self) -> GateMode {
        self.mode
    }

    /// Remaining sends learned from headers
    #[must_use]
    pub fn remaining(&self) -> Option<u32> {
        self.remaining
    }

    /// `true` while a drained bucket is waiting for its reset
    #[must_use]
    pub fn is_blocked(&mut self, now: Instant) -> bool {
        !self.blocked_for(now).is_zero()
    }

    /// Take one send, or return how long to wait before trying again
    pub fn acquire(&mut self, now: Instant) -> Result<(), Duration> {
        let blocked = self.blocked_for(now);
        if !blocked.is_zero() {
            return Err(blocked);
        }

        if let Some(limiter) = &self.limiter {
            limiter
                .check()
                .map_err(|not_until| not_until.wait_time_from(TokioClock.now()))?;
        }
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
        Ok(())
    }

    /// Apply quota headers from a response
    pub fn observe(&mut self, info: &RateLimitInfo, now: Instant) {
        if let Some(limit) = info.limit {
            self.limit = Some(limit);
        }
        if let Some(remaining) = info.remaining {
            self.remaining = Some(remaining);
        }
        if let Some(reset_after) = info.reset_after {
            self.reset_at = Some(now + reset_after);
        }
    }

    /// Drain the bucket until `until` (quota-exceeded response)
    pub fn block_until(&mut self, until: Instant) {
        self.remaining = Some(0);
        self.reset_at = Some(match self.reset_at {
            Some(current) if current > until => current,
            _ => until,
        });
    }

    fn blocked_for(&mut self, now: Instant) -> Duration {
        let Some(reset_at) = self.reset_at else {
            return Duration::ZERO;
        };
        if now >= reset_at {
            self.reset_at = None;
            self.remaining = self.limit;
            return Duration::ZERO;
        }
        match self.remaining {
            Some(0) => reset_at - now,
            _ => Duration::ZERO,
        }
    }
}
