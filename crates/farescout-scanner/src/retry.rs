//! Retry policy and the resilient call primitive.
//!
//! [`ResilienceGuard::call`] runs one logical request through the endpoint's
//! circuit breaker and the profile's rate limiter, retrying throttled and
//! transient failures with exponential backoff and full jitter.

use crate::breaker::CircuitBreaker;
use crate::error::SearchError;
use crate::limiter::{AdaptiveRateLimiter, LimiterSignal};
use crate::transport::{ErrorClass, HttpError};
use farescout_core::RetryConfig;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Attempt budget and backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
        }
    }

    /// Delay before the retry following failed attempt `attempt` (0-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_delay_with(attempt, &mut rand::thread_rng())
    }

    /// `base * 2^attempt` plus uniform jitter in `[0, base * 2^attempt]`,
    /// capped at `max_delay`.
    pub fn backoff_delay_with<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(31)))
            .min(self.max_delay);
        let jitter = if exponential.is_zero() {
            Duration::ZERO
        } else {
            exponential.mul_f64(rng.gen_range(0.0..=1.0))
        };
        (exponential + jitter).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Breaker, limiter and retry policy for one endpoint of one profile.
#[derive(Debug, Clone)]
pub struct ResilienceGuard {
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<AdaptiveRateLimiter>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl ResilienceGuard {
    pub fn new(
        breaker: Arc<CircuitBreaker>,
        limiter: Arc<AdaptiveRateLimiter>,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            breaker,
            limiter,
            policy,
            timeout,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn limiter(&self) -> &AdaptiveRateLimiter {
        &self.limiter
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails permanently or the attempt budget
    /// runs out.
    ///
    /// Every attempt first asks the breaker for a permit (an open circuit
    /// fails the call immediately with [`SearchError::CircuitOpen`] without
    /// touching the limiter), then waits for a limiter token. Each attempt is
    /// bounded by the per-call timeout; a timeout counts as a transient
    /// failure. Authorization failures are not retried here, they surface so
    /// the caller can replace its credentials.
    ///
    /// Cancellation is observed while waiting for a token and while backing
    /// off, never in the middle of a request.
    ///
    /// Returns the value and the number of attempts used.
    pub async fn call<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<(T, u32), SearchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, HttpError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(SearchError::Cancelled);
            }

            let permit = self
                .breaker
                .try_acquire()
                .map_err(|open| SearchError::CircuitOpen {
                    retry_in: open.retry_in,
                    trial_pending: open.trial_pending,
                })?;

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(SearchError::Cancelled),
                () = self.limiter.acquire() => {}
            }

            attempt += 1;
            let outcome = match tokio::time::timeout(self.timeout, op()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(HttpError::timeout(self.timeout)),
            };

            let err = match outcome {
                Ok(value) => {
                    permit.success();
                    self.limiter.record(LimiterSignal::Success);
                    return Ok((value, attempt));
                }
                Err(err) => err,
            };

            let class = err.classify();
            permit.failure();
            self.limiter.record(match class {
                ErrorClass::Throttled { retry_after } => LimiterSignal::Throttled { retry_after },
                ErrorClass::AuthFailure => LimiterSignal::Blocked,
                ErrorClass::CredentialExpired | ErrorClass::Transient | ErrorClass::Fatal => {
                    LimiterSignal::Failure
                }
            });

            if !class.is_retryable() {
                tracing::debug!(
                    endpoint = %self.breaker.name(),
                    attempt,
                    "Not retrying: {}",
                    err
                );
                return Err(err.into_search_error());
            }

            if attempt >= self.policy.max_attempts {
                tracing::warn!(
                    endpoint = %self.breaker.name(),
                    "Giving up after {} attempts: {}",
                    attempt,
                    err
                );
                return Err(err.into_search_error());
            }

            let delay = self.policy.backoff_delay(attempt - 1);
            tracing::warn!(
                endpoint = %self.breaker.name(),
                attempt,
                "Attempt {}/{} failed ({}), retrying in {:.1}s",
                attempt,
                self.policy.max_attempts,
                err,
                delay.as_secs_f64()
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(SearchError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}
