//! Error types for circuit breakers and the registry.

use std::time::Duration;

use thiserror::Error;

use crate::state::CircuitState;

/// Errors produced by a protected call
///
/// The two variants are deliberately distinguishable: `Open` means the
/// dependency was never contacted, while `Operation` carries the
/// dependency's own error unchanged.
#[derive(Debug, Error)]
pub enum CircuitBreakerError<E: std::error::Error + 'static> {
    /// The call was rejected without invoking the wrapped operation
    #[error("circuit '{name}' is {state} - service unavailable, retry in {}ms", .retry_after.as_millis())]
    Open {
        name: String,
        state: CircuitState,
        /// Remaining open window; zero when rejected because the single
        /// half-open trial slot is already taken.
        retry_after: Duration,
    },
    /// The wrapped operation itself failed
    #[error("operation failed in circuit '{name}': {source}")]
    Operation {
        name: String,
        #[source]
        source: E,
    },
}

impl<E: std::error::Error + 'static> CircuitBreakerError<E> {
    /// True iff the call was rejected by the breaker rather than failed by
    /// the dependency
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open { .. })
    }

    /// Recover the wrapped operation's error, if there is one
    pub fn into_source(self) -> Option<E> {
        match self {
            CircuitBreakerError::Open { .. } => None,
            CircuitBreakerError::Operation { source, .. } => Some(source),
        }
    }
}

/// Errors raised by [`CircuitBreakerRegistry`](crate::CircuitBreakerRegistry) operations
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("circuit breaker '{0}' does not exist and no options were provided to create it")]
    NotRegistered(String),

    #[error("invalid configuration for circuit breaker '{name}'")]
    InvalidConfig {
        name: String,
        #[source]
        source: ConfigError,
    },
}

/// Configuration validation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("failure_threshold must be at least 1")]
    ZeroFailureThreshold,

    #[error("reset_timeout must be non-zero")]
    ZeroResetTimeout,
}
