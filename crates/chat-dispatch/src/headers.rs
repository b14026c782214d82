//! Rate-limit response headers

use std::time::Duration;

pub const LIMIT: &str = "x-ratelimit-limit";
pub const REMAINING: &str = "x-ratelimit-remaining";
pub const RESET_AFTER: &str = "x-ratelimit-reset-after";
pub const GLOBAL: &str = "x-ratelimit-global";
pub const BUCKET: &str = "x-ratelimit-bucket";
pub const RETRY_AFTER: &str = "retry-after";

/// Quota state reported by one response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    pub reset_after: Option<Duration>,
    pub global: bool,
    /// Opaque platform bucket hash, logged only
    pub bucket: Option<String>,
}

impl RateLimitInfo {
    /// Read the headers through `lookup` (lower-case names).
    ///
    /// Returns `None` when the response carries no quota headers at all.
    pub fn from_lookup<'a>(lookup: impl Fn(&str) -> Option<&'a str>) -> Option<Self> {
        let info = Self {
            limit: lookup(LIMIT).and_then(|v| v.trim().parse().ok()),
            remaining: lookup(REMAINING).and_then(|v| v.trim().parse().ok()),
            reset_after: lookup(RESET_AFTER).and_then(parse_seconds),
            global: lookup(GLOBAL).is_some_and(|v| v.trim().eq_ignore_ascii_case("true")),
            bucket: lookup(BUCKET).map(str::to_string),
        };

        if info.limit.is_none()
            && info.remaining.is_none()
            && info.reset_after.is_none()
            && !info.global
        {
            return None;
        }
        Some(info)
    }

    /// True when the bucket is drained until `reset_after`
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }
}

/// Delay requested by a quota-exceeded response.
///
/// Prefers `Retry-After`, then `X-RateLimit-Reset-After`.
pub fn retry_after<'a>(lookup: impl Fn(&str) -> Option<&'a str>) -> Option<Duration> {
    lookup(RETRY_AFTER)
        .and_then(parse_seconds)
        .or_else(|| lookup(RESET_AFTER).and_then(parse_seconds))
}

/// Seconds with optional fraction, e.g. `"1.250"`
pub fn parse_seconds(raw: &str) -> Option<Duration> {
    let secs: f64 = raw.trim().parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}
