//! One shared breaker per downstream dependency
//!
//! Failure statistics must never mix between unrelated services, and the
//! same service must never get two breakers. Clients look their breaker
//! up by dependency name at construction time and keep the `Arc`.

use crate::{builder::CircuitBuilder, circuit::CircuitBreaker, circuit::Config};
use dashmap::DashMap;
use std::sync::Arc;

/// Process-local map from dependency name to its breaker
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    defaults: Config,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose breakers start from the given configuration
    pub fn with_defaults(defaults: Config) -> Self {
        Self {
            breakers: DashMap::new(),
            defaults,
        }
    }

    /// Breaker for `name`, created from the registry defaults on first use
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_create_with(name, |builder| builder)
    }

    /// Breaker for `name`; `customize` runs only when it has to be created
    ///
    /// # Examples
    ///
    /// ```rust
    /// use outbound_machines::BreakerRegistry;
    /// use std::time::Duration;
    ///
    /// let registry = BreakerRegistry::new();
    /// let search = registry.get_or_create_with("search", |b| b.timeout(Duration::from_secs(5)));
    /// let again = registry.get_or_create("search");
    /// assert!(std::sync::Arc::ptr_eq(&search, &again));
    /// ```
    pub fn get_or_create_with<F>(&self, name: &str, customize: F) -> Arc<CircuitBreaker>
    where
        F: FnOnce(CircuitBuilder) -> CircuitBuilder,
    {
        if let Some(existing) = self.breakers.get(name) {
            return Arc::clone(existing.value());
        }

        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                let builder = CircuitBreaker::builder(name).config(self.defaults.clone());
                tracing::debug!(circuit = name, "registering circuit breaker");
                Arc::new(customize(builder).build())
            })
            .value()
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Names of all registered dependencies
    pub fn names(&self) -> Vec<String> {
        self.breakers.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
