//! Property-based tests for the circuit breaker.
//!
//! Verifies the state machine against a simple model:
//! - consecutive failures reaching the threshold open the circuit
//! - a success while closed resets the failure streak
//! - an open circuit refuses calls without invoking them
//! - half-open: enough trial successes close, any failure re-opens
//! - concurrent callers never lose bookkeeping

use proptest::prelude::*;
use sift::breaker::{CallError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitStateKind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn outcome(ok: bool) -> Result<(), &'static str> {
    if ok {
        Ok(())
    } else {
        Err("provider down")
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_config_thresholds_at_least_one(
        failures in 0u32..=10,
        trials in 0u32..=10,
        reset_ms in 0u64..=60_000,
    ) {
        let config = CircuitBreakerConfig::new(failures, Duration::from_millis(reset_ms), trials);
        prop_assert!(config.failure_threshold >= 1);
        prop_assert!(config.half_open_max_calls >= 1);
    }

    /// With a long cooldown the breaker behaves like a streak counter that
    /// latches open.
    #[test]
    fn prop_matches_streak_model(
        threshold in 1u32..=6,
        outcomes in prop::collection::vec(any::<bool>(), 0..40),
    ) {
        let breaker = CircuitBreaker::new(
            "model",
            CircuitBreakerConfig::new(threshold, Duration::from_secs(3600), 1),
        );
        let invoked = AtomicUsize::new(0);

        let mut streak = 0u32;
        let mut open = false;
        let mut expected_invocations = 0usize;

        for ok in outcomes {
            let result = breaker.call(|| {
                invoked.fetch_add(1, Ordering::SeqCst);
                outcome(ok)
            });

            if open {
                prop_assert!(matches!(result, Err(CallError::Open(_))));
            } else {
                expected_invocations += 1;
                if ok {
                    streak = 0;
                    prop_assert!(result.is_ok());
                } else {
                    streak += 1;
                    prop_assert!(matches!(result, Err(CallError::Failed(_))));
                    open = streak >= threshold;
                }
            }

            let expected_state = if open { CircuitStateKind::Open } else { CircuitStateKind::Closed };
            prop_assert_eq!(breaker.state(), expected_state);
        }

        prop_assert_eq!(invoked.load(Ordering::SeqCst), expected_invocations);
    }

    /// With no cooldown an open circuit admits trial calls immediately.
    #[test]
    fn prop_half_open_successes_close(threshold in 1u32..=5, trials in 1u32..=5) {
        let breaker = CircuitBreaker::new(
            "trial",
            CircuitBreakerConfig::new(threshold, Duration::ZERO, trials),
        );
        for _ in 0..threshold {
            let _ = breaker.call(|| outcome(false));
        }
        prop_assert_eq!(breaker.state(), CircuitStateKind::Open);

        for i in 0..trials {
            prop_assert!(breaker.call(|| outcome(true)).is_ok());
            let expected = if i + 1 == trials { CircuitStateKind::Closed } else { CircuitStateKind::HalfOpen };
            prop_assert_eq!(breaker.state(), expected);
        }
        prop_assert_eq!(breaker.stats().failure_count, 0);
    }

    #[test]
    fn prop_half_open_failure_reopens(threshold in 1u32..=5, trials in 2u32..=5, before in 0u32..4) {
        let breaker = CircuitBreaker::new(
            "trial",
            CircuitBreakerConfig::new(threshold, Duration::ZERO, trials),
        );
        for _ in 0..threshold {
            let _ = breaker.call(|| outcome(false));
        }

        let successes = before.min(trials - 1);
        for _ in 0..successes {
            prop_assert!(breaker.call(|| outcome(true)).is_ok());
        }
        prop_assert!(matches!(breaker.call(|| outcome(false)), Err(CallError::Failed(_))));
        prop_assert_eq!(breaker.state(), CircuitStateKind::Open);
    }
}

#[test]
fn test_reset_closes_open_circuit() {
    let breaker = CircuitBreaker::new(
        "embeddings",
        CircuitBreakerConfig::new(1, Duration::from_secs(3600), 1),
    );
    let _ = breaker.call(|| outcome(false));
    assert!(breaker.call(|| outcome(true)).unwrap_err().is_open());

    breaker.reset();
    assert_eq!(breaker.state(), CircuitStateKind::Closed);
    assert!(breaker.call(|| outcome(true)).is_ok());
}

#[test]
fn test_concurrent_failures_are_all_counted() {
    let breaker = Arc::new(CircuitBreaker::new(
        "shared",
        CircuitBreakerConfig::new(1000, Duration::from_secs(3600), 1),
    ));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let breaker = Arc::clone(&breaker);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    let _ = breaker.call(|| outcome(false));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = breaker.stats();
    assert_eq!(stats.failure_count, 400);
    assert_eq!(stats.state, CircuitStateKind::Closed);
}

#[test]
fn test_registry_shares_breakers_by_name() {
    let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::new(
        1,
        Duration::from_secs(3600),
        1,
    ));

    let first = registry.get_or_register("ollama");
    let again = registry.get_or_register("ollama");
    let _ = first.call(|| outcome(false));

    assert_eq!(again.state(), CircuitStateKind::Open);
    assert_eq!(registry.snapshots().len(), 1);

    registry.reset_all();
    assert_eq!(first.state(), CircuitStateKind::Closed);
}
