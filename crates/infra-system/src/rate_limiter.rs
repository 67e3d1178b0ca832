//! Rate Limiter (Token Bucket Algorithm)
//!
//! Paces outbound requests to search-engine APIs and scraped sites.
//! Uses a single atomic word so concurrent fetches never contend on a lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Fixed-point scale: one token is 1000 milli-tokens
const MILLI: u64 = 1000;

/// Upper bound on the sleep between `acquire` polls
const MAX_ACQUIRE_BACKOFF: Duration = Duration::from_millis(100);

/// Largest burst whose milli-token count fits the upper 32 bits
pub const MAX_BURST: u32 = (u32::MAX as u64 / MILLI) as u32;

/// Token bucket with fractional refill
pub struct RateLimiter {
    // Upper 32 bits: available milli-tokens
    // Lower 32 bits: last refill, milliseconds since creation modulo 2^32
    packed: AtomicU64,
    created_at: Instant,
    capacity_milli: u64,
    refill_per_sec: u32,
}

impl RateLimiter {
    /// Create a full bucket
    ///
    /// # Arguments
    /// * `burst` - Maximum tokens held at once (clamped to `1..=MAX_BURST`)
    /// * `refill_per_sec` - Tokens added per second (at least 1)
    ///
    /// # Example
    /// ```text
    /// // 5 requests/sec with a burst of 10
    /// let limiter = RateLimiter::new(10, 5);
    /// ```
    pub fn new(burst: u32, refill_per_sec: u32) -> Self {
        let capacity_milli = u64::from(burst.clamp(1, MAX_BURST)) * MILLI;
        Self {
            packed: AtomicU64::new(capacity_milli << 32),
            created_at: Instant::now(),
            capacity_milli,
            refill_per_sec: refill_per_sec.max(1),
        }
    }

    /// Bucket sized to one second of traffic
    pub fn per_second(requests_per_second: u32) -> Self {
        Self::new(requests_per_second, requests_per_second)
    }

    /// Take one token if available
    pub fn try_acquire(&self) -> bool {
        loop {
            let packed = self.packed.load(Ordering::Acquire);
            let (available, now_ms) = self.refilled(packed);

            let (next_available, granted) = if available >= MILLI {
                (available - MILLI, true)
            } else {
                (available, false)
            };
            let next = (next_available << 32) | u64::from(now_ms);

            match self
                .packed
                .compare_exchange(packed, next, Ordering::Release, Ordering::Acquire)
            {
                Ok(_) => return granted,
                Err(_) => continue,
            }
        }
    }

    /// Wait until a token is available and take it
    pub async fn acquire(&self) {
        loop {
            if self.try_acquire() {
                return;
            }
            tokio::time::sleep(self.backoff()).await;
        }
    }

    /// Whole tokens currently available
    pub fn available(&self) -> u32 {
        let (available, _) = self.refilled(self.packed.load(Ordering::Acquire));
        (available / MILLI) as u32
    }

    fn refilled(&self, packed: u64) -> (u64, u32) {
        // Truncation wraps the clock every ~49.7 days; deltas stay exact
        // as long as the bucket is touched more often than that
        let now_ms = self.created_at.elapsed().as_millis() as u32;
        (self.refilled_at(packed, now_ms), now_ms)
    }

    fn refilled_at(&self, packed: u64, now_ms: u32) -> u64 {
        let stored = packed >> 32;
        let last_ms = (packed & 0xFFFF_FFFF) as u32;
        let delta_ms = u64::from(now_ms.wrapping_sub(last_ms));
        // refill_per_sec tokens/s == refill_per_sec milli-tokens/ms
        stored
            .saturating_add(delta_ms.saturating_mul(u64::from(self.refill_per_sec)))
            .min(self.capacity_milli)
    }

    fn backoff(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.refill_per_sec))
            .clamp(Duration::from_millis(1), MAX_ACQUIRE_BACKOFF)
    }
}
