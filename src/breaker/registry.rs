//! Named breakers shared by every call site that talks to the same resource

use super::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Snapshot of a named circuit breaker for reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub stats: CircuitBreakerStats,
}

/// Owned registry of breakers keyed by resource name
///
/// Built once at startup and handed to each component that makes external
/// calls; two clients for the same provider share one breaker.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    breakers: RwLock<BTreeMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            breakers: RwLock::new(BTreeMap::new()),
        }
    }

    /// Get the breaker for `name`, creating it with the registry default
    pub fn get_or_register(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_register_with(name, self.default_config.clone())
    }

    /// Get the breaker for `name`, creating it with `config` if absent
    pub fn get_or_register_with(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        if let Ok(read_guard) = self.breakers.read() {
            if let Some(existing) = read_guard.get(name) {
                return Arc::clone(existing);
            }
        }

        let mut write_guard = match self.breakers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        write_guard
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config)))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        let read_guard = match self.breakers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        read_guard.get(name).cloned()
    }

    /// Stats for every registered breaker, ordered by name
    pub fn snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let read_guard = match self.breakers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        read_guard
            .iter()
            .map(|(name, breaker)| CircuitBreakerSnapshot {
                name: name.clone(),
                stats: breaker.stats(),
            })
            .collect()
    }

    /// Reset every registered breaker
    pub fn reset_all(&self) {
        let read_guard = match self.breakers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for breaker in read_guard.values() {
            breaker.reset();
        }
    }
}
