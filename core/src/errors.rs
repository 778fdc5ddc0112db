//! Error types for breaker and pipeline operations

use std::convert::Infallible;
use thiserror::Error;

/// Boxed error produced by a transport
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by [`CircuitBreaker::execute`](crate::CircuitBreaker::execute)
///
/// `Open` and `TooManyRequests` are rejections: the breaker declined the
/// call and the closure never ran. `Execution` carries the closure's own
/// error untouched.
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// Circuit is open, calls are being rejected
    #[error("circuit '{circuit}' is open")]
    Open { circuit: String },
    /// Half-open trial budget has been used up
    #[error("circuit '{circuit}' half-open request limit reached")]
    TooManyRequests { circuit: String },
    /// The wrapped operation failed
    #[error("circuit execution failed: {0}")]
    Execution(E),
}

impl<E> CircuitError<E> {
    /// True when the breaker refused to attempt the call
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Open { .. } | Self::TooManyRequests { .. })
    }

    /// The wrapped operation's error, if the call was attempted
    pub fn into_execution(self) -> Option<E> {
        match self {
            Self::Execution(e) => Some(e),
            _ => None,
        }
    }
}

/// Error flowing through a middleware pipeline
#[derive(Debug, Error)]
pub enum CallError {
    /// A breaker stage rejected the call because its circuit is open
    #[error("circuit '{circuit}' is open")]
    Open { circuit: String },
    /// A breaker stage rejected the call, half-open trial budget used up
    #[error("circuit '{circuit}' half-open request limit reached")]
    TooManyRequests { circuit: String },
    /// The caller's deadline passed before the transport was invoked
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// A stage was invoked before the pipeline linked its successor
    #[error("stage '{stage}' has no successor")]
    Unlinked { stage: &'static str },
    /// The transport reported a failure
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),
}

impl CallError {
    pub fn transport(err: impl Into<BoxError>) -> Self {
        Self::Transport(err.into())
    }

    /// True when a breaker refused the call (as opposed to the call failing)
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Open { .. } | Self::TooManyRequests { .. })
    }
}

impl From<CircuitError<CallError>> for CallError {
    fn from(err: CircuitError<CallError>) -> Self {
        match err {
            CircuitError::Open { circuit } => Self::Open { circuit },
            CircuitError::TooManyRequests { circuit } => Self::TooManyRequests { circuit },
            CircuitError::Execution(inner) => inner,
        }
    }
}

impl From<CircuitError<Infallible>> for CallError {
    fn from(err: CircuitError<Infallible>) -> Self {
        match err {
            CircuitError::Open { circuit } => Self::Open { circuit },
            CircuitError::TooManyRequests { circuit } => Self::TooManyRequests { circuit },
            CircuitError::Execution(never) => match never {},
        }
    }
}
