//! Circuit breaker state machine
//!
//! A breaker guards one downstream dependency. It tallies requests in
//! generations: every transition (and every interval expiry while closed)
//! starts a new generation with fresh counters. A call remembers the
//! generation it was admitted in, and its outcome is dropped if the
//! breaker has moved on by the time it completes.
//!
//! ```text
//! Closed   --(requests >= checkpoint && failure ratio >= max)--> Open
//! Open     --(timeout elapsed, next call)-------------------->  HalfOpen
//! HalfOpen --(max_requests consecutive successes)----------->  Closed
//! HalfOpen --(any failure)---------------------------------->  Open
//! ```

use crate::{
    callbacks::Callbacks,
    classifier::{DefaultClassifier, FailureClassifier, FailureContext},
    clock::{Clock, MonotonicClock},
    counts::Counts,
    errors::CircuitError,
};
use parking_lot::Mutex;
use state_machines::state_machine;
use std::any::Any;
use std::convert::Infallible;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// Name given to breakers configured without one
pub const DEFAULT_NAME: &str = "default-breaker";

/// Breaker configuration
///
/// Zero or out-of-range values are replaced with defaults when a breaker
/// is built (see [`Config::normalized`]).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct Config {
    /// Calls admitted while half-open, and consecutive successes needed to close
    pub max_requests: u32,

    /// Period after which closed-state counters are cleared.
    /// `None` means 2 × timeout; `Some(Duration::ZERO)` means never.
    pub interval: Option<Duration>,

    /// How long the circuit stays open before admitting a trial
    pub timeout: Duration,

    /// Minimum requests in a generation before the failure ratio is evaluated
    pub total_request_checkpoint: u32,

    /// Failure ratio (0.0-1.0] at or above which the circuit trips
    pub max_failure_ratio: f64,

    /// Jitter factor for the open timeout (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: timeout * (1 - jitter + rand * jitter)
    pub jitter_factor: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }
}

impl Config {
    /// Default settings for a given open timeout
    ///
    /// The interval is left unset so it keeps following the timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            max_requests: 10,
            interval: None,
            timeout,
            total_request_checkpoint: 100,
            max_failure_ratio: 0.6,
            jitter_factor: 0.0,
        }
    }

    /// Copy of this config with missing or invalid fields backfilled
    pub fn normalized(&self) -> Self {
        let defaults = Self::default();
        let timeout = if self.timeout.is_zero() {
            defaults.timeout
        } else {
            self.timeout
        };

        Self {
            max_requests: if self.max_requests == 0 {
                defaults.max_requests
            } else {
                self.max_requests
            },
            interval: Some(
                self.interval
                    .unwrap_or_else(|| timeout.saturating_mul(2)),
            ),
            timeout,
            total_request_checkpoint: if self.total_request_checkpoint == 0 {
                defaults.total_request_checkpoint
            } else {
                self.total_request_checkpoint
            },
            max_failure_ratio: if self.max_failure_ratio > 0.0 {
                self.max_failure_ratio.min(1.0)
            } else {
                defaults.max_failure_ratio
            },
            jitter_factor: if self.jitter_factor.is_finite() {
                self.jitter_factor.clamp(0.0, 1.0)
            } else {
                0.0
            },
        }
    }

    /// Whether closed-state counters warrant opening the circuit
    pub fn ready_to_trip(&self, counts: &Counts) -> bool {
        counts.requests >= self.total_request_checkpoint
            && counts.failure_ratio() >= self.max_failure_ratio
    }
}

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Closed,
    HalfOpen,
    Open,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Closed => "closed",
            State::HalfOpen => "half-open",
            State::Open => "open",
        }
    }

    fn from_machine(name: &str) -> Self {
        match name {
            "Open" => State::Open,
            "HalfOpen" => State::HalfOpen,
            _ => State::Closed,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context carried by the transition machine
#[derive(Debug, Clone, Default)]
pub struct CircuitContext {
    pub name: String,
}

// Legal transitions; admission and trip decisions live in CircuitBreaker
state_machine! {
    name: Circuit,
    context: CircuitContext,
    dynamic: true,

    initial: Closed,
    states: [
        Closed,
        Open,
        HalfOpen,
    ],
    events {
        trip {
            transition: { from: [Closed, HalfOpen], to: Open }
        }
        attempt_reset {
            transition: { from: Open, to: HalfOpen }
        }
        close {
            transition: { from: HalfOpen, to: Closed }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Rejection {
    Open,
    TooManyRequests,
}

impl Rejection {
    fn into_error<E>(self, circuit: &str) -> CircuitError<E> {
        let circuit = circuit.to_string();
        match self {
            Rejection::Open => CircuitError::Open { circuit },
            Rejection::TooManyRequests => CircuitError::TooManyRequests { circuit },
        }
    }
}

struct Inner {
    machine: DynamicCircuit,
    generation: u64,
    counts: Counts,
    /// Clock reading at which the current state is re-evaluated
    expiry: Option<Duration>,
}

impl Inner {
    fn state(&self) -> State {
        State::from_machine(self.machine.current_state())
    }
}

/// Circuit breaker public API
///
/// Shared by reference across threads; all bookkeeping is serialized by
/// one internal mutex that is never held while the protected call runs.
pub struct CircuitBreaker {
    name: String,
    config: Config,
    classifier: Arc<dyn FailureClassifier>,
    callbacks: Callbacks,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker (use builder() for more options)
    pub fn new(name: impl Into<String>, config: Config) -> Self {
        Self::from_parts(
            name.into(),
            config,
            Arc::new(DefaultClassifier),
            Callbacks::new(),
            Arc::new(MonotonicClock::new()),
        )
    }

    /// Create a new circuit breaker builder
    pub fn builder(name: impl Into<String>) -> crate::builder::CircuitBuilder {
        crate::builder::CircuitBuilder::new(name)
    }

    pub(crate) fn from_parts(
        name: String,
        config: Config,
        classifier: Arc<dyn FailureClassifier>,
        callbacks: Callbacks,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let name = if name.is_empty() {
            DEFAULT_NAME.to_string()
        } else {
            name
        };
        let config = config.normalized();
        let now = clock.now();

        let inner = Inner {
            machine: DynamicCircuit::new(CircuitContext { name: name.clone() }),
            generation: 0,
            counts: Counts::default(),
            expiry: closed_expiry(&config, now),
        };

        Self {
            name,
            config,
            classifier,
            callbacks,
            clock,
            inner: Mutex::new(inner),
        }
    }

    /// Execute a fallible operation with circuit breaker protection
    ///
    /// Rejections return immediately without running `f`. A panic inside
    /// `f` is recorded as a failure and then resumed.
    pub fn execute<T, E, F>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: fmt::Display + 'static,
    {
        let generation = self
            .before_request()
            .map_err(|rejection| rejection.into_error::<E>(&self.name))?;
        let started = self.clock.now();

        let result = match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(result) => result,
            Err(payload) => {
                self.after_request(generation, false);
                panic::resume_unwind(payload);
            }
        };

        let success = match &result {
            Ok(_) => true,
            Err(err) => !self.should_trip(err, self.clock.now().saturating_sub(started)),
        };
        self.after_request(generation, success);

        result.map_err(CircuitError::Execution)
    }

    /// Admit a call whose outcome is reported later through the returned permit
    ///
    /// # Examples
    ///
    /// ```rust
    /// use outbound_machines::CircuitBreaker;
    ///
    /// let breaker = CircuitBreaker::builder("ledger").build();
    /// if let Ok(permit) = breaker.allow() {
    ///     // ... perform the call ...
    ///     permit.success();
    /// }
    /// assert_eq!(breaker.counts().total_successes, 1);
    /// ```
    pub fn allow(&self) -> Result<Permit<'_>, CircuitError<Infallible>> {
        let generation = self
            .before_request()
            .map_err(|rejection| rejection.into_error::<Infallible>(&self.name))?;

        Ok(Permit {
            breaker: self,
            generation,
            started: self.clock.now(),
            done: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Effective (backfilled) configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current state, after applying any expired timeout or interval
    pub fn state(&self) -> State {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        self.current_state(&mut inner, now)
    }

    pub fn state_name(&self) -> &'static str {
        self.state().as_str()
    }

    pub fn is_open(&self) -> bool {
        self.state() == State::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state() == State::Closed
    }

    pub fn is_half_open(&self) -> bool {
        self.state() == State::HalfOpen
    }

    /// Snapshot of the current generation's counters
    pub fn counts(&self) -> Counts {
        self.inner.lock().counts
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Force the circuit closed and start a fresh generation
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        let from = inner.state();

        inner.machine = DynamicCircuit::new(CircuitContext {
            name: self.name.clone(),
        });
        self.to_new_generation(&mut inner, now);

        if from != State::Closed {
            tracing::info!(circuit = %self.name, %from, to = %State::Closed, "circuit breaker reset");
            self.callbacks.trigger(&self.name, from, State::Closed);
        }
    }

    fn before_request(&self) -> Result<u64, Rejection> {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        let state = self.current_state(&mut inner, now);

        let rejection = match state {
            State::Open => Some(Rejection::Open),
            State::HalfOpen if inner.counts.requests >= self.config.max_requests => {
                Some(Rejection::TooManyRequests)
            }
            _ => None,
        };
        if let Some(rejection) = rejection {
            tracing::debug!(circuit = %self.name, %state, ?rejection, "call rejected");
            return Err(rejection);
        }

        inner.counts.on_request();
        Ok(inner.generation)
    }

    fn after_request(&self, before: u64, success: bool) {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        let state = self.current_state(&mut inner, now);

        // Admitted in an earlier generation
        if inner.generation != before {
            return;
        }

        if success {
            self.on_success(&mut inner, state, now);
        } else {
            self.on_failure(&mut inner, state, now);
        }
    }

    fn release_request(&self, before: u64) {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        self.current_state(&mut inner, now);

        if inner.generation == before {
            inner.counts.on_release();
        }
    }

    fn on_success(&self, inner: &mut Inner, state: State, now: Duration) {
        inner.counts.on_success();
        if state == State::HalfOpen && inner.counts.consecutive_successes >= self.config.max_requests
        {
            self.set_state(inner, State::Closed, now);
        }
    }

    fn on_failure(&self, inner: &mut Inner, state: State, now: Duration) {
        inner.counts.on_failure();
        match state {
            State::Closed if self.config.ready_to_trip(&inner.counts) => {
                self.set_state(inner, State::Open, now);
            }
            State::HalfOpen => self.set_state(inner, State::Open, now),
            _ => {}
        }
    }

    fn current_state(&self, inner: &mut Inner, now: Duration) -> State {
        let expired = inner.expiry.is_some_and(|at| at <= now);
        match inner.state() {
            State::Closed if expired => self.to_new_generation(inner, now),
            State::Open if expired => self.set_state(inner, State::HalfOpen, now),
            _ => {}
        }
        inner.state()
    }

    fn set_state(&self, inner: &mut Inner, to: State, now: Duration) {
        let from = inner.state();
        if from == to {
            return;
        }

        let event = match to {
            State::Open => CircuitEvent::Trip,
            State::HalfOpen => CircuitEvent::AttemptReset,
            State::Closed => CircuitEvent::Close,
        };
        if inner.machine.handle(event).is_err() {
            tracing::error!(circuit = %self.name, %from, %to, "illegal circuit transition");
            return;
        }

        self.to_new_generation(inner, now);

        if to == State::Open {
            tracing::warn!(circuit = %self.name, %from, %to, "circuit breaker state changed");
        } else {
            tracing::info!(circuit = %self.name, %from, %to, "circuit breaker state changed");
        }
        self.callbacks.trigger(&self.name, from, to);
    }

    fn to_new_generation(&self, inner: &mut Inner, now: Duration) {
        inner.generation = inner.generation.wrapping_add(1);
        inner.counts.clear();
        inner.expiry = match inner.state() {
            State::Closed => closed_expiry(&self.config, now),
            State::Open => Some(now.saturating_add(self.open_timeout())),
            State::HalfOpen => None,
        };
    }

    fn open_timeout(&self) -> Duration {
        let timeout = self.config.timeout;
        if self.config.jitter_factor <= 0.0 {
            return timeout;
        }

        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let policy = chrono_machines::Policy {
            max_attempts: 1,
            base_delay_ms: timeout_ms,
            multiplier: 1.0,
            max_delay_ms: timeout_ms,
        };
        let delay_ms = policy.calculate_delay(1, self.config.jitter_factor);
        Duration::from_millis(delay_ms)
    }

    fn should_trip<E>(&self, err: &E, duration: Duration) -> bool
    where
        E: fmt::Display + 'static,
    {
        let message = err.to_string();
        let ctx = FailureContext {
            circuit_name: &self.name,
            error: err as &dyn Any,
            message: &message,
            duration,
        };
        self.classifier.should_trip(&ctx)
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &inner.state())
            .field("generation", &inner.generation)
            .field("counts", &inner.counts)
            .field("classifier", &self.classifier)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

fn closed_expiry(config: &Config, now: Duration) -> Option<Duration> {
    config
        .interval
        .filter(|interval| !interval.is_zero())
        .map(|interval| now.saturating_add(interval))
}

/// Admission obtained from [`CircuitBreaker::allow`]
///
/// Dropping an unfinished permit records a failure.
#[must_use = "an unfinished permit is recorded as a failure when dropped"]
#[derive(Debug)]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    started: Duration,
    done: bool,
}

impl Permit<'_> {
    pub fn success(self) {
        self.finish(true);
    }

    pub fn failure(self) {
        self.finish(false);
    }

    /// Report the call's outcome
    pub fn finish(mut self, success: bool) {
        self.done = true;
        self.breaker.after_request(self.generation, success);
    }

    /// Report a failed call; the breaker's classifier decides whether it counts
    pub fn error<E>(self, err: &E)
    where
        E: fmt::Display + 'static,
    {
        let elapsed = self.breaker.clock.now().saturating_sub(self.started);
        let success = !self.breaker.should_trip(err, elapsed);
        self.finish(success);
    }

    /// Hand the admission back without recording an outcome
    ///
    /// For calls that were never really attempted, such as ones another
    /// breaker further down refused.
    pub fn release(mut self) {
        self.done = true;
        self.breaker.release_request(self.generation);
    }

    /// Generation the call was admitted in
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.breaker.after_request(self.generation, false);
        }
    }
}
