//! Circuit breaker protecting calls to external providers
//!
//! A breaker wraps each call in a small state machine:
//! `closed → open → half_open → {closed | open}`. Bookkeeping is guarded by a
//! single mutex that is released while the wrapped call runs, so one breaker
//! can be shared by any number of concurrent callers.

mod registry;

pub use registry::{CircuitBreakerRegistry, CircuitBreakerSnapshot};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// Configuration for a circuit breaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Cooldown before an open circuit admits trial calls
    pub reset_timeout: Duration,
    /// Trial calls admitted while half-open; this many successes close the circuit
    pub half_open_max_calls: u32,
}

impl CircuitBreakerConfig {
    /// Create a configuration. Thresholds below 1 are raised to 1.
    pub fn new(failure_threshold: u32, reset_timeout: Duration, half_open_max_calls: u32) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            half_open_max_calls: half_open_max_calls.max(1),
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
        }
    }
}

/// Returned instead of calling through while the circuit is open
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("circuit '{name}' is open; retry after {retry_after:?}")]
pub struct CircuitOpenError {
    /// Name of the protected resource
    pub name: String,
    /// Remaining cooldown, if known
    pub retry_after: Option<Duration>,
}

/// Outcome of a call routed through a breaker
#[derive(Error, Debug)]
pub enum CallError<E> {
    /// The breaker refused the call; the wrapped function was not invoked
    #[error(transparent)]
    Open(CircuitOpenError),

    /// The wrapped function ran and failed
    #[error(transparent)]
    Failed(E),
}

impl<E> CallError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open(_))
    }

    /// The underlying failure, if the call actually ran
    pub fn into_failure(self) -> Option<E> {
        match self {
            Self::Open(_) => None,
            Self::Failed(e) => Some(e),
        }
    }
}

/// Public-facing circuit state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStateKind {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitStateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Snapshot of a breaker for observability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitStateKind,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub half_open_max_calls: u32,
    pub half_open_successes: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Set while open; zero once the next call would be admitted as a trial
    pub cooldown_remaining_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open,
    HalfOpen { successes: u32, in_flight: u32 },
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    last_failure_time: Option<DateTime<Utc>>,
    /// Bumped on every transition so late results from an older state are not
    /// counted against the current one.
    generation: u64,
}

/// Ticket issued when a call is admitted
#[derive(Debug, Clone, Copy)]
struct Admission {
    generation: u64,
    trial: bool,
}

/// Circuit breaker state machine, shareable across threads
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a new breaker with a stable name
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
                last_failure_time: None,
                generation: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `f` through the breaker
    ///
    /// The error from a failing `f` is always handed back after bookkeeping;
    /// only a refused call produces [`CallError::Open`].
    pub fn call<T, E, F>(&self, f: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let admission = self.admit().map_err(CallError::Open)?;

        match f() {
            Ok(value) => {
                self.record_success(admission);
                Ok(value)
            }
            Err(e) => {
                self.record_failure(admission);
                Err(CallError::Failed(e))
            }
        }
    }

    /// Last recorded state
    ///
    /// An open circuit whose cooldown has elapsed still reports `Open`; the
    /// next `call` moves it to half-open. `stats().cooldown_remaining_ms` is
    /// `Some(0)` in that case.
    pub fn state(&self) -> CircuitStateKind {
        self.stats().state
    }

    /// Snapshot for reporting; never used for control flow
    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.lock();
        let (state, half_open_successes) = match inner.state {
            CircuitState::Closed => (CircuitStateKind::Closed, 0),
            CircuitState::Open => (CircuitStateKind::Open, 0),
            CircuitState::HalfOpen { successes, .. } => (CircuitStateKind::HalfOpen, successes),
        };
        let cooldown_remaining_ms = match inner.state {
            CircuitState::Open => Some(
                inner
                    .last_failure_at
                    .and_then(|at| self.config.reset_timeout.checked_sub(at.elapsed()))
                    .map_or(0, |d| d.as_millis() as u64),
            ),
            _ => None,
        };

        CircuitBreakerStats {
            name: self.name.clone(),
            state,
            failure_count: inner.failure_count,
            failure_threshold: self.config.failure_threshold,
            reset_timeout_ms: self.config.reset_timeout.as_millis() as u64,
            half_open_max_calls: self.config.half_open_max_calls,
            half_open_successes,
            last_failure_time: inner.last_failure_time,
            cooldown_remaining_ms,
        }
    }

    /// Clear counters and force the circuit closed
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure_at = None;
        inner.last_failure_time = None;
        inner.generation += 1;
        info!(circuit = %self.name, "Circuit reset");
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn admit(&self) -> Result<Admission, CircuitOpenError> {
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => Ok(Admission {
                generation: inner.generation,
                trial: false,
            }),
            CircuitState::Open => {
                let elapsed = inner.last_failure_at.map(|at| at.elapsed());
                match elapsed {
                    Some(elapsed) if elapsed < self.config.reset_timeout => Err(CircuitOpenError {
                        name: self.name.clone(),
                        retry_after: self.config.reset_timeout.checked_sub(elapsed),
                    }),
                    _ => {
                        inner.state = CircuitState::HalfOpen {
                            successes: 0,
                            in_flight: 1,
                        };
                        inner.generation += 1;
                        info!(circuit = %self.name, "Circuit transitioned to half-open after cooldown");
                        Ok(Admission {
                            generation: inner.generation,
                            trial: true,
                        })
                    }
                }
            }
            CircuitState::HalfOpen {
                successes,
                in_flight,
            } => {
                if successes + in_flight >= self.config.half_open_max_calls {
                    return Err(CircuitOpenError {
                        name: self.name.clone(),
                        retry_after: None,
                    });
                }
                inner.state = CircuitState::HalfOpen {
                    successes,
                    in_flight: in_flight + 1,
                };
                Ok(Admission {
                    generation: inner.generation,
                    trial: true,
                })
            }
        }
    }

    fn record_success(&self, admission: Admission) {
        let mut inner = self.lock();
        if admission.generation != inner.generation {
            return;
        }

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen {
                successes,
                in_flight,
            } if admission.trial => {
                let successes = successes + 1;
                if successes >= self.config.half_open_max_calls {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.generation += 1;
                    info!(circuit = %self.name, "Circuit closed after successful trial calls");
                } else {
                    inner.state = CircuitState::HalfOpen {
                        successes,
                        in_flight: in_flight.saturating_sub(1),
                    };
                }
            }
            CircuitState::HalfOpen { .. } | CircuitState::Open => {}
        }
    }

    fn record_failure(&self, admission: Admission) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);

        if admission.generation != inner.generation {
            // Result of a call admitted under an earlier state: counted, no transition.
            return;
        }

        inner.last_failure_at = Some(Instant::now());
        inner.last_failure_time = Some(Utc::now());

        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.generation += 1;
                    warn!(
                        circuit = %self.name,
                        failures = inner.failure_count,
                        threshold = self.config.failure_threshold,
                        "Circuit opened after consecutive failures"
                    );
                }
            }
            CircuitState::HalfOpen { .. } => {
                inner.state = CircuitState::Open;
                inner.generation += 1;
                warn!(circuit = %self.name, "Circuit re-opened after half-open failure");
            }
            CircuitState::Open => {}
        }
    }
}
