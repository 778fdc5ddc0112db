//! Observer hooks for breaker state transitions
//!
//! Hooks run while the breaker holds its internal lock. They must return
//! quickly, must not call back into the same breaker, and must not panic.

use crate::circuit::State;
use std::sync::Arc;

/// Observer invoked once per transition with `(name, from, to)`
pub type StateChangeFn = Arc<dyn Fn(&str, State, State) + Send + Sync>;

/// Hook invoked with the breaker name when a specific state is entered
pub type StateHookFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Callbacks for breaker events
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_state_change: Option<StateChangeFn>,
    pub on_open: Option<StateHookFn>,
    pub on_close: Option<StateHookFn>,
    pub on_half_open: Option<StateHookFn>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notify observers of a transition
    pub fn trigger(&self, circuit: &str, from: State, to: State) {
        if let Some(ref callback) = self.on_state_change {
            callback(circuit, from, to);
        }

        let hook = match to {
            State::Open => &self.on_open,
            State::Closed => &self.on_close,
            State::HalfOpen => &self.on_half_open,
        };
        if let Some(callback) = hook {
            callback(circuit);
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_state_change", &self.on_state_change.is_some())
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_half_open", &self.on_half_open.is_some())
            .finish()
    }
}
