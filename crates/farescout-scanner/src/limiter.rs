//! Adaptive token-bucket rate limiter.
//!
//! Tokens refill continuously at the current rate up to the burst capacity.
//! The rate adapts AIMD-style: throttle and block signals multiply it down
//! (never below the floor), a streak of successes adds a step back (never
//! above the base rate). A throttle signal carrying `Retry-After` also pauses
//! every acquisition until that instant.

use farescout_core::LimiterConfig;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Tolerance for float drift in refill arithmetic.
const TOKEN_EPSILON: f64 = 1e-9;

/// Shortest sleep between refill checks.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Lowest rate a limiter can be configured to, in requests per second.
const RATE_FLOOR: f64 = 1e-3;

/// Outcome of a call, as fed back to the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterSignal {
    Success,
    /// HTTP 429, optionally with a server-requested pause
    Throttled { retry_after: Option<Duration> },
    /// Bot-defense block (HTTP 403/451 or a block page)
    Blocked,
    /// Any other failure; breaks the success streak without slowing down
    Failure,
}

/// Point-in-time view of a limiter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LimiterSnapshot {
    pub tokens: f64,
    pub current_rate: f64,
    pub base_rate: f64,
    pub paused_for: Option<Duration>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    current_rate: f64,
    last_refill: Instant,
    success_streak: u32,
    paused_until: Option<Instant>,
}

impl Bucket {
    fn refill(&mut self, now: Instant, capacity: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.current_rate).min(capacity);
        self.last_refill = now;
    }
}

/// AIMD token bucket shared by every call of one profile.
#[derive(Debug)]
pub struct AdaptiveRateLimiter {
    name: String,
    capacity: f64,
    base_rate: f64,
    min_rate: f64,
    decrease_factor: f64,
    increase_step: f64,
    recovery_successes: u32,
    max_retry_after: Duration,
    bucket: Mutex<Bucket>,
    /// Waiters queue here so tokens are handed out in arrival order.
    turn: tokio::sync::Mutex<()>,
}

impl AdaptiveRateLimiter {
    /// Create a full bucket running at the base rate.
    ///
    /// Out-of-range settings are clamped: rates stay at or above
    /// `RATE_FLOOR` and the decrease factor stays within `[0, 1]`.
    pub fn new(name: impl Into<String>, config: &LimiterConfig) -> Self {
        let capacity = f64::from(config.capacity.max(1));
        let min_rate = config.min_rate.max(RATE_FLOOR);
        let base_rate = config.base_rate.max(min_rate);
        Self {
            name: name.into(),
            capacity,
            base_rate,
            min_rate,
            decrease_factor: config.decrease_factor.clamp(0.0, 1.0),
            increase_step: config.increase_step.max(0.0),
            recovery_successes: config.recovery_successes.max(1),
            max_retry_after: config.max_retry_after(),
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                current_rate: base_rate,
                last_refill: Instant::now(),
                success_streak: 0,
                paused_until: None,
            }),
            turn: tokio::sync::Mutex::new(()),
        }
    }

    /// Wait until a token is available and take it.
    ///
    /// Cancel-safe: dropping the future gives up the place in line without
    /// consuming a token.
    pub async fn acquire(&self) {
        let _turn = self.turn.lock().await;
        loop {
            let wait = {
                let mut bucket = self.lock();
                let now = Instant::now();
                bucket.refill(now, self.capacity);

                let paused_until = bucket.paused_until;
                match paused_until {
                    Some(until) if until > now => until - now,
                    _ => {
                        bucket.paused_until = None;
                        if bucket.tokens + TOKEN_EPSILON >= 1.0 {
                            bucket.tokens = (bucket.tokens - 1.0).max(0.0);
                            return;
                        }
                        Duration::from_secs_f64((1.0 - bucket.tokens) / bucket.current_rate)
                    }
                }
            };
            tokio::time::sleep(wait.max(MIN_WAIT)).await;
        }
    }

    /// Feed back the outcome of a call.
    pub fn record(&self, signal: LimiterSignal) {
        let mut bucket = self.lock();
        let now = Instant::now();
        match signal {
            LimiterSignal::Success => {
                bucket.success_streak += 1;
                if bucket.success_streak >= self.recovery_successes {
                    bucket.success_streak = 0;
                    if bucket.current_rate < self.base_rate {
                        bucket.refill(now, self.capacity);
                        bucket.current_rate =
                            (bucket.current_rate + self.increase_step).min(self.base_rate);
                        tracing::debug!(
                            limiter = %self.name,
                            "Rate recovered to {:.2} req/s",
                            bucket.current_rate
                        );
                    }
                }
            }
            LimiterSignal::Throttled { retry_after } => {
                self.decrease(&mut bucket, now, "throttled");
                if let Some(retry_after) = retry_after {
                    let until = now + retry_after.min(self.max_retry_after);
                    if bucket.paused_until.map_or(true, |current| until > current) {
                        bucket.paused_until = Some(until);
                        tracing::warn!(
                            limiter = %self.name,
                            "Pausing requests for {}s (Retry-After)",
                            (until - now).as_secs()
                        );
                    }
                }
            }
            LimiterSignal::Blocked => self.decrease(&mut bucket, now, "blocked"),
            LimiterSignal::Failure => bucket.success_streak = 0,
        }
    }

    pub fn current_rate(&self) -> f64 {
        self.lock().current_rate
    }

    pub fn snapshot(&self) -> LimiterSnapshot {
        let mut bucket = self.lock();
        let now = Instant::now();
        bucket.refill(now, self.capacity);
        LimiterSnapshot {
            tokens: bucket.tokens,
            current_rate: bucket.current_rate,
            base_rate: self.base_rate,
            paused_for: bucket
                .paused_until
                .filter(|until| *until > now)
                .map(|until| until - now),
        }
    }

    fn decrease(&self, bucket: &mut Bucket, now: Instant, reason: &str) {
        bucket.refill(now, self.capacity);
        bucket.success_streak = 0;
        let previous = bucket.current_rate;
        bucket.current_rate = (previous * self.decrease_factor).max(self.min_rate);
        tracing::warn!(
            limiter = %self.name,
            "Request rate reduced {:.2} -> {:.2} req/s ({})",
            previous,
            bucket.current_rate,
            reason
        );
    }

    fn lock(&self) -> MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limiter() -> AdaptiveRateLimiter {
        AdaptiveRateLimiter::new("test", &LimiterConfig::default())
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_wait() {
        let limiter = limiter();
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.acquire().await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(999), "waited {waited:?}");
        assert!(waited <= Duration::from_millis(1010), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_pending_until_refill() {
        let limiter = limiter();
        limiter.acquire().await;
        limiter.acquire().await;

        let mut third = tokio_test::task::spawn(limiter.acquire());
        tokio_test::assert_pending!(third.poll());

        tokio::time::advance(Duration::from_millis(500)).await;
        tokio_test::assert_pending!(third.poll());

        tokio::time::advance(Duration::from_millis(501)).await;
        tokio_test::assert_ready!(third.poll());
        assert!(limiter.snapshot().tokens < 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquires_are_spaced() {
        let limiter = Arc::new(limiter());
        let start = Instant::now();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move {
                    limiter.acquire().await;
                    start.elapsed()
                })
            })
            .collect();

        let mut times = Vec::new();
        for handle in handles {
            times.push(handle.await.unwrap());
        }
        times.sort();

        assert_eq!(times[0], Duration::ZERO);
        assert_eq!(times[1], Duration::ZERO);
        assert!(times[2] >= Duration::from_millis(999));
        assert!(times[3] >= Duration::from_millis(1999));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_never_exceed_capacity() {
        let limiter = limiter();
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(approx(limiter.snapshot().tokens, 2.0));

        limiter.acquire().await;
        limiter.acquire().await;
        let tokens = limiter.snapshot().tokens;
        assert!((0.0..=2.0).contains(&tokens));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_halves_rate_with_floor() {
        let limiter = limiter();
        limiter.record(LimiterSignal::Throttled { retry_after: None });
        assert!(approx(limiter.current_rate(), 0.5));

        for _ in 0..10 {
            limiter.record(LimiterSignal::Blocked);
        }
        assert!(approx(limiter.current_rate(), 0.1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_after_success_streak() {
        let limiter = limiter();
        limiter.record(LimiterSignal::Throttled { retry_after: None });

        for _ in 0..9 {
            limiter.record(LimiterSignal::Success);
        }
        assert!(approx(limiter.current_rate(), 0.5));
        limiter.record(LimiterSignal::Success);
        assert!(approx(limiter.current_rate(), 0.6));

        for _ in 0..200 {
            limiter.record(LimiterSignal::Success);
        }
        assert!(approx(limiter.current_rate(), 1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_breaks_success_streak() {
        let limiter = limiter();
        limiter.record(LimiterSignal::Throttled { retry_after: None });

        for _ in 0..9 {
            limiter.record(LimiterSignal::Success);
        }
        limiter.record(LimiterSignal::Failure);
        limiter.record(LimiterSignal::Success);
        assert!(approx(limiter.current_rate(), 0.5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_pauses_acquisition() {
        let limiter = limiter();
        let start = Instant::now();
        limiter.record(LimiterSignal::Throttled {
            retry_after: Some(Duration::from_secs(30)),
        });
        assert_eq!(
            limiter.snapshot().paused_for,
            Some(Duration::from_secs(30))
        );

        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_is_capped() {
        let limiter = limiter();
        limiter.record(LimiterSignal::Throttled {
            retry_after: Some(Duration::from_secs(3600)),
        });
        assert_eq!(
            limiter.snapshot().paused_for,
            Some(Duration::from_secs(120))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_degenerate_config_keeps_positive_rate() {
        let config = LimiterConfig {
            min_rate: 0.0,
            decrease_factor: 0.0,
            ..LimiterConfig::default()
        };
        let limiter = AdaptiveRateLimiter::new("degenerate", &config);
        limiter.record(LimiterSignal::Throttled { retry_after: None });
        assert!(limiter.current_rate() > 0.0);

        limiter.acquire().await;
        limiter.acquire().await;
        let third = tokio::time::timeout(Duration::from_secs(5), limiter.acquire()).await;
        assert!(third.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_waiter_does_not_consume() {
        let limiter = limiter();
        limiter.acquire().await;
        limiter.acquire().await;

        let waited = tokio::time::timeout(Duration::from_millis(100), limiter.acquire()).await;
        assert!(waited.is_err());

        tokio::time::advance(Duration::from_millis(900)).await;
        assert!(limiter.snapshot().tokens >= 1.0 - 1e-6);
    }
}
