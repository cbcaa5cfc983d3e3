//! Named-instance registry.
//!
//! Multiple call sites that hit the same logical dependency must share one
//! breaker, so trips observed by one caller protect the others. The
//! registry maps a dependency name to its breaker; it is an explicitly
//! constructed object that callers pass down, which keeps tests isolated.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::breaker::{BreakerOptions, CircuitBreaker};
use crate::error::RegistryError;
use crate::state::CircuitState;

/// Per-breaker entry in the diagnostics snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerStatus {
    pub state: CircuitState,
}

/// Registry of circuit breakers keyed by dependency name
///
/// At most one breaker exists per name; concurrent creation for the same
/// unseen name converges on a single instance.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an existing breaker
    ///
    /// Fails with [`RegistryError::NotRegistered`] if nothing was created
    /// under `name` yet; each dependency's breaker must be initialized with
    /// [`get_or_create`](Self::get_or_create) before plain lookups.
    pub fn get(&self, name: &str) -> Result<Arc<CircuitBreaker>, RegistryError> {
        self.breakers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotRegistered(name.to_string()))
    }

    /// Return the breaker registered under `name`, creating it if absent
    ///
    /// The first registration is authoritative: when the name already
    /// exists the supplied options are ignored and the existing instance is
    /// returned, so callers may pass their initialization options
    /// unconditionally.
    pub fn get_or_create(
        &self,
        name: &str,
        options: impl Into<BreakerOptions>,
    ) -> Result<Arc<CircuitBreaker>, RegistryError> {
        if let Some(existing) = self.breakers.read().get(name) {
            return Ok(Arc::clone(existing));
        }

        let options = options.into();
        options
            .config()
            .validate()
            .map_err(|source| RegistryError::InvalidConfig {
                name: name.to_string(),
                source,
            })?;

        let mut breakers = self.breakers.write();
        match breakers.entry(name.to_string()) {
            // Another caller won the race; its configuration stands.
            Entry::Occupied(entry) => {
                debug!(circuit = %name, "breaker already registered, ignoring options");
                Ok(Arc::clone(entry.get()))
            }
            Entry::Vacant(entry) => {
                let breaker = CircuitBreaker::with_options(name, options);
                info!(
                    circuit = %name,
                    failure_threshold = breaker.config().failure_threshold,
                    reset_timeout_ms = breaker.config().reset_timeout.as_millis() as u64,
                    "registered circuit breaker"
                );
                Ok(Arc::clone(entry.insert(breaker)))
            }
        }
    }

    /// Delete the named breaker; returns whether one existed
    pub fn remove(&self, name: &str) -> bool {
        self.breakers.write().remove(name).is_some()
    }

    /// Reset the named breaker if present; no-op otherwise
    pub fn reset(&self, name: &str) {
        let breaker = self.breakers.read().get(name).cloned();
        if let Some(breaker) = breaker {
            breaker.reset();
        }
    }

    /// Reset every registered breaker
    pub fn reset_all(&self) {
        let breakers: Vec<_> = self.breakers.read().values().cloned().collect();
        for breaker in breakers {
            breaker.reset();
        }
    }

    /// Snapshot mapping each name to its current state, for diagnostics
    pub fn status(&self) -> HashMap<String, BreakerStatus> {
        self.breakers
            .read()
            .iter()
            .map(|(name, breaker)| {
                (
                    name.clone(),
                    BreakerStatus {
                        state: breaker.state(),
                    },
                )
            })
            .collect()
    }

    /// Number of registered breakers
    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }
}
