//! Token-bucket rate state.
//!
//! One global bucket sized from the target cadence: `capacity =
//! refill_per_sec = fps`. Tokens are consumed per forwarded frame, so
//! duplicates and observed-only frames never deplete the bucket. A
//! cooldown signalled from downstream opens a penalty window during which
//! refill is divided by `penalty_divisor`.

use std::time::{Duration, Instant};

pub const DEFAULT_PENALTY_DIVISOR: u32 = 4;

#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
    penalty_until: Option<Instant>,
    penalty_divisor: u32,
}

impl TokenBucket {
    /// Bucket for a target cadence, starting full.
    pub fn for_fps(fps: u8, now: Instant) -> Self {
        let rate = fps.max(1) as f64;
        Self {
            capacity: rate,
            tokens: rate,
            refill_per_sec: rate,
            last_refill: now,
            penalty_until: None,
            penalty_divisor: DEFAULT_PENALTY_DIVISOR,
        }
    }

    /// Re-size for a new cadence, keeping the current fill ratio.
    pub fn reconfigure(&mut self, fps: u8, now: Instant) {
        self.refill(now);
        let rate = fps.max(1) as f64;
        let ratio = if self.capacity > 0.0 {
            self.tokens / self.capacity
        } else {
            1.0
        };
        self.capacity = rate;
        self.refill_per_sec = rate;
        self.tokens = rate * ratio;
    }

    /// Take one token if available.
    pub fn try_take(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Open (or extend) a penalty window of `window` from `now`.
    pub fn set_penalty(&mut self, now: Instant, window: Duration) {
        self.refill(now);
        let until = now + window;
        self.penalty_until = Some(match self.penalty_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
    }

    /// Remaining penalty window, if any.
    pub fn penalty_remaining(&self, now: Instant) -> Option<Duration> {
        match self.penalty_until {
            Some(until) if until > now => Some(until - now),
            _ => None,
        }
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.last_refill = now;
        if elapsed.is_zero() {
            return;
        }
        let mut rate = self.refill_per_sec;
        if self.penalty_remaining(now).is_some() {
            rate /= self.penalty_divisor.max(1) as f64;
        }
        self.tokens = (self.tokens + elapsed.as_secs_f64() * rate).min(self.capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_starts_full() {
        let now = Instant::now();
        let mut bucket = TokenBucket::for_fps(15, now);
        for _ in 0..15 {
            assert!(bucket.try_take(now));
        }
        assert!(!bucket.try_take(now));
    }

    #[test]
    fn test_refill_at_target_rate() {
        let now = Instant::now();
        let mut bucket = TokenBucket::for_fps(10, now);
        for _ in 0..10 {
            bucket.try_take(now);
        }
        assert!(!bucket.try_take(now));

        // Half a second refills five tokens at 10/s.
        let later = now + Duration::from_millis(500);
        for _ in 0..5 {
            assert!(bucket.try_take(later));
        }
        assert!(!bucket.try_take(later));
    }

    #[test]
    fn test_refill_never_exceeds_capacity() {
        let now = Instant::now();
        let mut bucket = TokenBucket::for_fps(5, now);
        let later = now + Duration::from_secs(60);
        let mut taken = 0;
        while bucket.try_take(later) {
            taken += 1;
        }
        assert_eq!(taken, 5);
    }

    #[test]
    fn test_penalty_divides_refill() {
        let now = Instant::now();
        let mut bucket = TokenBucket::for_fps(15, now);
        while bucket.try_take(now) {}
        bucket.set_penalty(now, Duration::from_secs(1));

        // One second under divisor 4 refills 15/4 ≈ 3.75 tokens.
        let later = now + Duration::from_millis(999);
        let mut forwarded = 0;
        while bucket.try_take(later) {
            forwarded += 1;
        }
        assert!(forwarded <= 4, "expected ≤ 4 forwards, got {}", forwarded);
        assert!(forwarded >= 3);
    }

    #[test]
    fn test_penalty_window_expires() {
        let now = Instant::now();
        let mut bucket = TokenBucket::for_fps(10, now);
        bucket.set_penalty(now, Duration::from_millis(200));
        assert!(bucket.penalty_remaining(now + Duration::from_millis(100)).is_some());
        assert!(bucket.penalty_remaining(now + Duration::from_millis(250)).is_none());
    }

    #[test]
    fn test_penalty_extension_keeps_longest() {
        let now = Instant::now();
        let mut bucket = TokenBucket::for_fps(10, now);
        bucket.set_penalty(now, Duration::from_secs(2));
        bucket.set_penalty(now, Duration::from_millis(100));
        let remaining = bucket.penalty_remaining(now).unwrap();
        assert!(remaining > Duration::from_secs(1));
    }

    #[test]
    fn test_reconfigure_keeps_fill_ratio() {
        let now = Instant::now();
        let mut bucket = TokenBucket::for_fps(10, now);
        for _ in 0..5 {
            bucket.try_take(now);
        }
        bucket.reconfigure(30, now);
        assert!((bucket.tokens() - 15.0).abs() < 1e-9);
    }
}
