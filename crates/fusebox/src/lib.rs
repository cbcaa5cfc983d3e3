//! Circuit breakers for unreliable async dependencies
//!
//! This crate provides a failure-isolation primitive for services that call
//! out to dependencies they do not control - credential stores, LLM
//! providers, mail APIs. Each dependency gets one named [`CircuitBreaker`]
//! shared by every call site through a [`CircuitBreakerRegistry`], so
//! failures observed anywhere protect callers everywhere.
//!
//! # Architecture
//!
//! ```text
//!     +---------+   failure threshold    +--------+
//!     | CLOSED  | ---------------------> |  OPEN  |
//!     +---------+                        +--------+
//!          ^                                  |
//!          |  trial succeeds                  |  reset timeout elapses
//!          |                                  v
//!          |                           +-------------+
//!          +-------------------------- |  HALF-OPEN  | --+
//!                                      +-------------+   |
//!                                             ^          |  trial fails
//!                                             |          v
//!                                             |       (OPEN, new window)
//! ```
//!
//! While open, calls are rejected without reaching the dependency. Once the
//! reset timeout elapses, exactly one call is admitted as a trial; its
//! outcome decides whether the circuit closes or re-opens.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use fusebox::{BreakerOptions, CircuitBreakerRegistry};
//!
//! // One registry per process, constructed at startup and passed down.
//! let registry = CircuitBreakerRegistry::new();
//!
//! // Each dependency registers once with its own tolerances.
//! registry.get_or_create(
//!     "credentials",
//!     BreakerOptions::new()
//!         .failure_threshold(3)
//!         .reset_timeout(Duration::from_secs(10))
//!         .on_state_change(|new, old| tracing::info!(%new, %old, "credentials circuit")),
//! )?;
//!
//! // Call sites fetch the shared instance and wrap their operations.
//! let breaker = registry.get("credentials")?;
//! let tokens = breaker
//!     .call(|| store.fetch_oauth_tokens(user_id))
//!     .await?;
//!
//! // Or absorb failures into a degraded response.
//! let reply = breaker
//!     .call_with_fallback(
//!         || llm.complete(prompt.clone()),
//!         |_err| async { Reply::unavailable() },
//!     )
//!     .await;
//! ```
//!
//! The breaker imposes no timeout of its own: a wrapped operation that
//! never settles is the caller's responsibility to bound (for example with
//! `tokio::time::timeout`). A trial call dropped that way releases its
//! slot so the circuit can still recover.

pub mod breaker;
pub mod config;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod state;

// Re-export the public surface at the crate root
pub use breaker::{BreakerOptions, CircuitBreaker, CircuitBreakerBuilder, StateChangeListener};
pub use config::CircuitBreakerConfig;
pub use error::{CircuitBreakerError, ConfigError, RegistryError};
pub use metrics::{CircuitBreakerMetrics, MetricsSnapshot};
pub use registry::{BreakerStatus, CircuitBreakerRegistry};
pub use state::CircuitState;
