use crate::rate_limit::Decision;
use std::time::Duration;

/// A single client's token bucket.
///
/// Replenishes `refill_per_second` tokens per second up to `capacity`. Tokens rise
/// only through refill and fall only by one whole token per granted request, so
/// `0 <= tokens <= capacity` holds after every call.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBucket {
    capacity: u32,
    refill_per_second: f64,
    tokens: f64,
    last_refill: Duration,
}

impl TokenBucket {
    /// A full bucket as of `now`.
    pub fn new(capacity: u32, refill_per_second: f64, now: Duration) -> Self {
        Self { capacity, refill_per_second, tokens: f64::from(capacity), last_refill: now }
    }

    /// Credit tokens for the time elapsed since the last refill.
    ///
    /// A reading earlier than the last refill credits nothing.
    pub fn refill(&mut self, now: Duration) {
        let elapsed = now.saturating_sub(self.last_refill).as_secs_f64();
        self.tokens =
            (self.tokens + elapsed * self.refill_per_second).min(f64::from(self.capacity));
        self.last_refill = self.last_refill.max(now);
    }

    /// Refill, then take one token if a whole token is available.
    pub fn try_acquire(&mut self, now: Duration) -> Decision {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            // Truncation is intended: a fractional token is not yet spendable.
            Decision::Allowed { remaining: self.tokens as u32 }
        } else {
            let missing = 1.0 - self.tokens;
            // A rate so small the wait overflows a Duration (or a zero rate) never refills.
            let wait = Duration::try_from_secs_f64(missing / self.refill_per_second)
                .unwrap_or(Duration::MAX);
            Decision::Denied { wait }
        }
    }

    /// Current token level (may be fractional).
    pub fn tokens(&self) -> f64 {
        self.tokens
    }
}
