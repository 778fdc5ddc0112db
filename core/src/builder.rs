//! Fluent breaker construction

use crate::{
    callbacks::Callbacks,
    circuit::{CircuitBreaker, Config, State},
    classifier::{DefaultClassifier, FailureClassifier},
    clock::{Clock, MonotonicClock},
};
use std::sync::Arc;
use std::time::Duration;

/// Collects breaker settings, hooks and collaborators
///
/// Unset or invalid values fall back to [`Config::default`] when the
/// breaker is built.
pub struct CircuitBuilder {
    name: String,
    config: Config,
    failure_classifier: Option<Arc<dyn FailureClassifier>>,
    clock: Option<Arc<dyn Clock>>,
    callbacks: Callbacks,
}

impl CircuitBuilder {
    /// Builder for the named circuit, starting from `Config::default()`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Config::default(),
            failure_classifier: None,
            clock: None,
            callbacks: Callbacks::new(),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Calls admitted while half-open, and successes needed to close
    pub fn max_requests(mut self, max_requests: u32) -> Self {
        self.config.max_requests = max_requests;
        self
    }

    /// Period after which closed-state counters are cleared
    /// (`Duration::ZERO` disables clearing)
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = Some(interval);
        self
    }

    /// How long the circuit stays open before admitting a trial
    ///
    /// An interval that was never set explicitly follows the timeout (2 × timeout).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Minimum requests per generation before the failure ratio is checked
    pub fn total_request_checkpoint(mut self, requests: u32) -> Self {
        self.config.total_request_checkpoint = requests;
        self
    }

    /// Failure ratio (0.0-1.0] at or above which the circuit trips
    pub fn max_failure_ratio(mut self, ratio: f64) -> Self {
        self.config.max_failure_ratio = ratio;
        self
    }

    /// Set the jitter factor (0.0 = no jitter, 1.0 = full jitter)
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.config.jitter_factor = factor;
        self
    }

    /// Decide which errors count as failures
    ///
    /// # Examples
    ///
    /// ```rust
    /// use outbound_machines::{CircuitBreaker, StatusTextClassifier};
    /// use std::sync::Arc;
    ///
    /// let breaker = CircuitBreaker::builder("profile-rpc")
    ///     .failure_classifier(Arc::new(StatusTextClassifier::grpc_ok()))
    ///     .build();
    /// ```
    pub fn failure_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.failure_classifier = Some(classifier);
        self
    }

    /// Use a custom time source
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Observe every transition as `(name, from, to)`
    ///
    /// Runs under the breaker's lock: it must not block, panic, or call
    /// back into the breaker.
    pub fn on_state_change<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, State, State) + Send + Sync + 'static,
    {
        self.callbacks.on_state_change = Some(Arc::new(f));
        self
    }

    /// Hook run on every transition into Open
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_open = Some(Arc::new(f));
        self
    }

    /// Hook run when a HalfOpen trial run closes the circuit
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_close = Some(Arc::new(f));
        self
    }

    /// Hook run when the open timeout lapses
    pub fn on_half_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.on_half_open = Some(Arc::new(f));
        self
    }

    /// Finish the breaker; unset fields fall back to defaults
    pub fn build(self) -> CircuitBreaker {
        let classifier = self
            .failure_classifier
            .unwrap_or_else(|| Arc::new(DefaultClassifier));
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));

        CircuitBreaker::from_parts(self.name, self.config, classifier, self.callbacks, clock)
    }
}
