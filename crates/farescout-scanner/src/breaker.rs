//! Circuit breaker guarding one search endpoint of one profile.
//!
//! ```text
//! Closed   -> Open:     consecutive failures reach the threshold
//! Open     -> HalfOpen: cooldown elapsed, first caller claims the trial
//! HalfOpen -> Closed:   trial succeeds (failures reset, cooldown reset)
//! HalfOpen -> Open:     trial fails (cooldown grows, capped)
//! ```
//!
//! Every admitted call holds a [`BreakerPermit`] and reports its outcome
//! through it. Dropping a trial permit without an outcome (for example on
//! cancellation) releases the claim so another caller can run the trial.

use farescout_core::BreakerConfig;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Suggested wait for callers rejected while a trial is outstanding.
const TRIAL_PENDING_RETRY: Duration = Duration::from_secs(1);

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Rejection returned while the circuit is open or a trial is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitOpen {
    /// Time until a call may be admitted again
    pub retry_in: Duration,
    /// Rejected because another caller holds the half-open trial, not
    /// because the cooldown is still running
    pub trial_pending: bool,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub cooldown: Duration,
    /// Times the breaker has opened
    pub trips: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Instant,
    cooldown: Duration,
    trial_in_flight: bool,
    /// Bumped on every transition to Open; outcomes of calls admitted in an
    /// earlier generation are ignored.
    generation: u64,
    trips: u64,
}

/// Three-state circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    base_cooldown: Duration,
    cooldown_multiplier: f64,
    max_cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PermitKind {
    Normal { generation: u64 },
    Trial,
}

/// Admission to make one call through the breaker.
#[must_use = "report the call outcome with success() or failure()"]
#[derive(Debug)]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    kind: PermitKind,
    reported: bool,
}

impl CircuitBreaker {
    /// Create a breaker from configuration.
    pub fn new(name: impl Into<String>, config: &BreakerConfig) -> Self {
        Self {
            name: name.into(),
            failure_threshold: config.failure_threshold.max(1),
            base_cooldown: config.cooldown(),
            cooldown_multiplier: config.cooldown_multiplier.max(1.0),
            max_cooldown: config.max_cooldown().max(config.cooldown()),
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: Instant::now(),
                cooldown: config.cooldown(),
                trial_in_flight: false,
                generation: 0,
                trips: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state. An Open breaker whose cooldown has elapsed still reports
    /// Open until the next caller claims the trial.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            cooldown: inner.cooldown,
            trips: inner.trips,
        }
    }

    /// Ask to make a call.
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>, CircuitOpen> {
        let mut inner = self.lock();
        let kind = match inner.state {
            CircuitState::Closed => PermitKind::Normal {
                generation: inner.generation,
            },
            CircuitState::Open => {
                let elapsed = inner.opened_at.elapsed();
                if elapsed < inner.cooldown {
                    return Err(CircuitOpen {
                        retry_in: inner.cooldown - elapsed,
                        trial_pending: false,
                    });
                }
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                tracing::debug!(endpoint = %self.name, "Circuit half-open, admitting trial call");
                PermitKind::Trial
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(CircuitOpen {
                        retry_in: TRIAL_PENDING_RETRY,
                        trial_pending: true,
                    });
                }
                inner.trial_in_flight = true;
                PermitKind::Trial
            }
        };

        Ok(BreakerPermit {
            breaker: self,
            kind,
            reported: false,
        })
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_success(&self, kind: PermitKind) {
        let mut inner = self.lock();
        match kind {
            PermitKind::Trial => {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.cooldown = self.base_cooldown;
                inner.trial_in_flight = false;
                tracing::info!(endpoint = %self.name, "Circuit closed after successful trial");
            }
            PermitKind::Normal { generation } => {
                if inner.state == CircuitState::Closed && inner.generation == generation {
                    inner.consecutive_failures = 0;
                }
            }
        }
    }

    fn on_failure(&self, kind: PermitKind) {
        let mut inner = self.lock();
        match kind {
            PermitKind::Trial => {
                let grown = inner.cooldown.as_secs_f64() * self.cooldown_multiplier;
                inner.cooldown = Duration::from_secs_f64(grown.min(self.max_cooldown.as_secs_f64()))
                    .max(inner.cooldown);
                inner.trial_in_flight = false;
                Self::trip(&mut inner);
                tracing::warn!(
                    endpoint = %self.name,
                    "Circuit trial failed, reopening for {}s",
                    inner.cooldown.as_secs()
                );
            }
            PermitKind::Normal { generation } => {
                if inner.state != CircuitState::Closed || inner.generation != generation {
                    return;
                }
                inner.consecutive_failures += 1;
                tracing::debug!(
                    endpoint = %self.name,
                    failures = inner.consecutive_failures,
                    "Circuit recorded failure"
                );
                if inner.consecutive_failures >= self.failure_threshold {
                    Self::trip(&mut inner);
                    tracing::warn!(
                        endpoint = %self.name,
                        "Circuit opened after {} consecutive failures, cooling down {}s",
                        inner.consecutive_failures,
                        inner.cooldown.as_secs()
                    );
                }
            }
        }
    }

    fn on_abandon(&self, kind: PermitKind) {
        if kind == PermitKind::Trial {
            let mut inner = self.lock();
            if inner.state == CircuitState::HalfOpen {
                inner.trial_in_flight = false;
            }
        }
    }

    fn trip(inner: &mut BreakerInner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Instant::now();
        inner.generation += 1;
        inner.trips += 1;
    }
}

impl BreakerPermit<'_> {
    /// Whether this permit is the single half-open trial.
    pub fn is_trial(&self) -> bool {
        self.kind == PermitKind::Trial
    }

    pub fn success(mut self) {
        self.reported = true;
        self.breaker.on_success(self.kind);
    }

    pub fn failure(mut self) {
        self.reported = true;
        self.breaker.on_failure(self.kind);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.reported {
            self.breaker.on_abandon(self.kind);
        }
    }
}
