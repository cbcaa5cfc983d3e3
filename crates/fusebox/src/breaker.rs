//! Circuit breaker core: admission control and state transitions.
//!
//! A breaker guards one logical dependency. All in-flight calls for that
//! dependency share its state: consecutive failures trip the circuit open,
//! the open window rejects calls without contacting the dependency, and a
//! single trial call probes for recovery once the window elapses.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;
use crate::error::CircuitBreakerError;
use crate::metrics::CircuitBreakerMetrics;
use crate::state::CircuitState;

/// Listener invoked with `(new, previous)` on every state transition
pub type StateChangeListener = Box<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

/// Mutable breaker state, guarded by a single mutex
///
/// The lock is never held across an `.await` or while user callbacks run.
#[derive(Debug)]
struct Inner {
    state: CircuitState,
    /// Consecutive failures observed while closed, plus any half-open trial failure
    failure_count: u32,
    /// Deadline after which an open circuit admits a trial call
    next_attempt_at: Option<Instant>,
    /// Whether the single half-open trial slot is taken
    trial_in_flight: bool,
}

/// Outcome of the admission check for one incoming call
enum Admission {
    /// Call may proceed; `trial` marks the half-open probe
    Allowed { trial: bool },
    Rejected {
        state: CircuitState,
        retry_after: Duration,
    },
}

/// Circuit breaker for one protected dependency
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    listener: Option<StateChangeListener>,
    metrics: CircuitBreakerMetrics,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("inner", &self.inner)
            .field("listener", &self.listener.as_ref().map(|_| "<listener>"))
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Arc<Self> {
        Self::with_options(name, BreakerOptions::from(config))
    }

    /// Create a circuit breaker from registry-style options
    pub fn with_options(name: impl Into<String>, options: BreakerOptions) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            config: options.config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                next_attempt_at: None,
                trial_in_flight: false,
            }),
            listener: options.listener,
            metrics: CircuitBreakerMetrics::new(),
        })
    }

    /// Create a new circuit breaker builder
    pub fn builder(name: impl Into<String>) -> CircuitBreakerBuilder {
        CircuitBreakerBuilder::new(name)
    }

    /// Get the breaker's name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current state
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// True iff the circuit is open
    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Current consecutive-failure count
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Get the metrics counters
    pub fn metrics(&self) -> &CircuitBreakerMetrics {
        &self.metrics
    }

    /// Execute an operation under circuit breaker protection
    ///
    /// The closure is only invoked if the call is admitted, so a rejected
    /// call never constructs the operation's future. Errors from the
    /// operation surface as [`CircuitBreakerError::Operation`]; rejections
    /// as [`CircuitBreakerError::Open`].
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        match self.admit() {
            Admission::Rejected { state, retry_after } => {
                self.metrics.record_rejected();
                debug!(circuit = %self.name, state = %state, "call rejected");
                Err(CircuitBreakerError::Open {
                    name: self.name.clone(),
                    state,
                    retry_after,
                })
            }
            Admission::Allowed { trial } => {
                let guard = TrialGuard::new(self, trial);
                let result = op().await;
                guard.disarm();
                match result {
                    Ok(value) => {
                        self.on_success(trial);
                        Ok(value)
                    }
                    Err(source) => {
                        self.on_failure(trial);
                        Err(CircuitBreakerError::Operation {
                            name: self.name.clone(),
                            source,
                        })
                    }
                }
            }
        }
    }

    /// Execute an operation, absorbing failures into a fallback
    ///
    /// The fallback receives the triggering error - either the synthetic
    /// open-circuit rejection or the operation's own failure - and its
    /// result is returned as if the call had succeeded.
    pub async fn call_with_fallback<F, Fut, T, E, FB, FbFut>(&self, op: F, fallback: FB) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
        FB: FnOnce(CircuitBreakerError<E>) -> FbFut,
        FbFut: Future<Output = T>,
    {
        match self.call(op).await {
            Ok(value) => value,
            Err(err) => fallback(err).await,
        }
    }

    /// Wrap an async function with circuit breaker protection
    ///
    /// The returned closure has the same calling convention as `f`; it only
    /// differs in that it may fail with [`CircuitBreakerError::Open`]
    /// without invoking `f`.
    pub fn wrap<A, F, Fut, T, E>(
        self: &Arc<Self>,
        f: F,
    ) -> impl Clone + Send + Sync + Fn(A) -> BoxFuture<'static, Result<T, CircuitBreakerError<E>>>
    where
        A: Send + 'static,
        F: Fn(A) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: std::error::Error + Send + 'static,
    {
        let breaker = Arc::clone(self);
        move |args: A| {
            let breaker = Arc::clone(&breaker);
            let f = f.clone();
            async move { breaker.call(move || f(args)).await }.boxed()
        }
    }

    /// Wrap an async function, absorbing failures into a fallback
    ///
    /// The fallback receives the triggering error and a clone of the
    /// original arguments, and its result replaces the failed call's.
    pub fn wrap_with_fallback<A, F, Fut, T, E, FB, FbFut>(
        self: &Arc<Self>,
        f: F,
        fallback: FB,
    ) -> impl Clone + Send + Sync + Fn(A) -> BoxFuture<'static, T>
    where
        A: Clone + Send + 'static,
        F: Fn(A) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: std::error::Error + Send + 'static,
        FB: Fn(CircuitBreakerError<E>, A) -> FbFut + Clone + Send + Sync + 'static,
        FbFut: Future<Output = T> + Send + 'static,
    {
        let breaker = Arc::clone(self);
        move |args: A| {
            let breaker = Arc::clone(&breaker);
            let f = f.clone();
            let fallback = fallback.clone();
            let fallback_args = args.clone();
            async move {
                match breaker.call(move || f(args)).await {
                    Ok(value) => value,
                    Err(err) => fallback(err, fallback_args).await,
                }
            }
            .boxed()
        }
    }

    /// Force the circuit closed and clear the failure count
    ///
    /// Cancels any pending open window and frees the trial slot.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count = 0;
        inner.next_attempt_at = None;
        inner.trial_in_flight = false;
        let previous = inner.state;
        if previous != CircuitState::Closed {
            inner.state = CircuitState::Closed;
            drop(inner);
            self.notify_transition(CircuitState::Closed, previous);
        }
    }

    /// Force the circuit open with a fresh open window
    ///
    /// For operator-triggered isolation of a dependency known to be down.
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        inner.next_attempt_at = Some(Instant::now() + self.config.reset_timeout);
        let previous = inner.state;
        if previous != CircuitState::Open {
            inner.state = CircuitState::Open;
            drop(inner);
            self.notify_transition(CircuitState::Open, previous);
        }
    }

    // =========================================================================
    // Private methods
    // =========================================================================

    /// Decide whether an incoming call may proceed
    ///
    /// The deadline check, the open-to-half-open transition, and the claim
    /// of the trial slot happen under one lock so exactly one caller
    /// becomes the trial.
    fn admit(&self) -> Admission {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Admission::Allowed { trial: false },
            CircuitState::Open => {
                let now = Instant::now();
                match inner.next_attempt_at {
                    Some(deadline) if now < deadline => Admission::Rejected {
                        state: CircuitState::Open,
                        retry_after: deadline - now,
                    },
                    _ => {
                        let previous = inner.state;
                        inner.state = CircuitState::HalfOpen;
                        inner.trial_in_flight = true;
                        drop(inner);
                        self.notify_transition(CircuitState::HalfOpen, previous);
                        Admission::Allowed { trial: true }
                    }
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Admission::Rejected {
                        state: CircuitState::HalfOpen,
                        retry_after: Duration::ZERO,
                    }
                } else {
                    inner.trial_in_flight = true;
                    Admission::Allowed { trial: true }
                }
            }
        }
    }

    fn on_success(&self, trial: bool) {
        self.metrics.record_success();
        let mut inner = self.inner.lock();
        if trial {
            inner.trial_in_flight = false;
        }
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen if trial => {
                inner.failure_count = 0;
                inner.next_attempt_at = None;
                let previous = inner.state;
                inner.state = CircuitState::Closed;
                drop(inner);
                self.notify_transition(CircuitState::Closed, previous);
            }
            // Late result from a call admitted under an earlier state
            _ => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        self.metrics.record_failure();
        let mut inner = self.inner.lock();
        if trial {
            inner.trial_in_flight = false;
        }
        inner.failure_count = inner.failure_count.saturating_add(1);
        debug!(
            circuit = %self.name,
            failures = inner.failure_count,
            "recorded failure"
        );
        let should_open = match inner.state {
            CircuitState::Closed => inner.failure_count >= self.config.failure_threshold,
            // Any failure during the probe window re-opens the circuit
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if should_open {
            inner.next_attempt_at = Some(Instant::now() + self.config.reset_timeout);
            let previous = inner.state;
            inner.state = CircuitState::Open;
            drop(inner);
            self.notify_transition(CircuitState::Open, previous);
        }
    }

    /// Record, log, and publish an actual state change
    ///
    /// Called after the state lock has been released; the listener must not
    /// be able to deadlock against the breaker.
    fn notify_transition(&self, new: CircuitState, previous: CircuitState) {
        self.metrics.record_transition(previous, new);
        match new {
            CircuitState::Open => {
                warn!(circuit = %self.name, from = %previous, "circuit opened");
            }
            CircuitState::HalfOpen => {
                info!(circuit = %self.name, "circuit half-open, probing for recovery");
            }
            CircuitState::Closed => {
                info!(circuit = %self.name, from = %previous, "circuit closed");
            }
        }
        if let Some(listener) = &self.listener {
            listener(new, previous);
        }
    }
}

/// Releases the half-open trial slot if the probe is dropped before settling
///
/// A caller-side timeout that cancels the probe future would otherwise
/// leave the slot taken forever.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl<'a> TrialGuard<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            armed: trial,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = self.breaker.inner.lock();
            inner.trial_in_flight = false;
            drop(inner);
            debug!(
                circuit = %self.breaker.name,
                "trial call dropped before settling; releasing trial slot"
            );
        }
    }
}

/// Creation options for a circuit breaker: a configuration plus an
/// optional state-change listener
///
/// This is what the registry stores a new breaker from; the first
/// registration under a name is authoritative.
#[derive(Default)]
pub struct BreakerOptions {
    pub(crate) config: CircuitBreakerConfig,
    pub(crate) listener: Option<StateChangeListener>,
}

impl BreakerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration
    pub fn with_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the failure threshold
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Set the reset timeout
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.config.reset_timeout = timeout;
        self
    }

    /// Install a state-change listener
    pub fn on_state_change<L>(mut self, listener: L) -> Self
    where
        L: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.listener = Some(Box::new(listener));
        self
    }

    /// Get the configuration these options would create a breaker with
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }
}

impl From<CircuitBreakerConfig> for BreakerOptions {
    fn from(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            listener: None,
        }
    }
}

impl std::fmt::Debug for BreakerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerOptions")
            .field("config", &self.config)
            .field("listener", &self.listener.as_ref().map(|_| "<listener>"))
            .finish()
    }
}

/// Builder for a standalone circuit breaker
pub struct CircuitBreakerBuilder {
    name: String,
    options: BreakerOptions,
}

impl CircuitBreakerBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: BreakerOptions::new(),
        }
    }

    pub fn config(mut self, config: CircuitBreakerConfig) -> Self {
        self.options = self.options.with_config(config);
        self
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.options = self.options.failure_threshold(threshold);
        self
    }

    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.options = self.options.reset_timeout(timeout);
        self
    }

    pub fn on_state_change<L>(mut self, listener: L) -> Self
    where
        L: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.options = self.options.on_state_change(listener);
        self
    }

    pub fn build(self) -> Arc<CircuitBreaker> {
        CircuitBreaker::with_options(self.name, self.options)
    }
}
