//! Outcome classification for breaker bookkeeping
//!
//! A successful closure result always counts as a success. When the
//! closure returns an error, a classifier decides whether that error
//! counts against the dependency. Returning `false` from
//! [`FailureClassifier::should_trip`] records the call as a success.

use std::any::Any;
use std::time::Duration;

/// Status text an upstream RPC client wraps around an HTTP 200 response
pub const GRPC_OK_STATUS_TEXT: &str = "desc = OK: HTTP status code 200";

/// What a classifier sees about one failed call
#[derive(Debug)]
pub struct FailureContext<'a> {
    /// Breaker that admitted the call
    pub circuit_name: &'a str,
    /// The returned error, downcastable to its concrete type
    pub error: &'a dyn Any,
    /// The error's display text
    pub message: &'a str,
    /// How long the call ran before failing
    pub duration: Duration,
}

/// Decides whether an error counts as a failure for the breaker
///
/// # Examples
///
/// ```rust
/// use outbound_machines::{FailureClassifier, FailureContext};
///
/// #[derive(Debug)]
/// struct SlowOnly;
///
/// impl FailureClassifier for SlowOnly {
///     fn should_trip(&self, ctx: &FailureContext<'_>) -> bool {
///         ctx.duration.as_secs() >= 1
///     }
/// }
/// ```
pub trait FailureClassifier: Send + Sync + std::fmt::Debug {
    /// Returns `true` if the error should count as a failure
    fn should_trip(&self, ctx: &FailureContext<'_>) -> bool;
}

/// Every error is a failure
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl FailureClassifier for DefaultClassifier {
    fn should_trip(&self, _ctx: &FailureContext<'_>) -> bool {
        true
    }
}

/// Classifier backed by a closure
pub struct PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    predicate: F,
}

impl<F> PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> FailureClassifier for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn should_trip(&self, ctx: &FailureContext<'_>) -> bool {
        (self.predicate)(ctx)
    }
}

impl<F> std::fmt::Debug for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateClassifier")
            .field("predicate", &"<closure>")
            .finish()
    }
}

/// Treats errors whose text contains a marker as successes
///
/// Some transports surface a successful upstream response as an error
/// value. This classifier opts into counting those as successes.
#[derive(Debug, Clone)]
pub struct StatusTextClassifier {
    marker: String,
}

impl StatusTextClassifier {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    /// Classifier for RPC errors that wrap an HTTP 200 status
    pub fn grpc_ok() -> Self {
        Self::new(GRPC_OK_STATUS_TEXT)
    }
}

impl FailureClassifier for StatusTextClassifier {
    fn should_trip(&self, ctx: &FailureContext<'_>) -> bool {
        !ctx.message.contains(&self.marker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context<'a>(error: &'a dyn Any, message: &'a str, duration: Duration) -> FailureContext<'a> {
        FailureContext {
            circuit_name: "test",
            error,
            message,
            duration,
        }
    }

    #[test]
    fn test_default_classifier_trips_all() {
        let ctx = context(&"any error", "any error", Duration::from_millis(100));
        assert!(DefaultClassifier.should_trip(&ctx));
    }

    #[test]
    fn test_predicate_classifier() {
        let classifier = PredicateClassifier::new(|ctx| ctx.duration > Duration::from_secs(1));

        let fast = context(&"fast error", "fast error", Duration::from_millis(500));
        let slow = context(&"slow error", "slow error", Duration::from_secs(2));

        assert!(!classifier.should_trip(&fast));
        assert!(classifier.should_trip(&slow));
    }

    #[test]
    fn test_error_type_downcast() {
        #[derive(Debug)]
        struct StatusError {
            code: u16,
        }

        let classifier = PredicateClassifier::new(|ctx| {
            ctx.error
                .downcast_ref::<StatusError>()
                .map(|e| e.code >= 500)
                .unwrap_or(true)
        });

        let server = StatusError { code: 503 };
        let client = StatusError { code: 404 };

        assert!(classifier.should_trip(&context(&server, "503", Duration::ZERO)));
        assert!(!classifier.should_trip(&context(&client, "404", Duration::ZERO)));
    }

    #[test]
    fn test_status_text_classifier() {
        let classifier = StatusTextClassifier::grpc_ok();
        let ok_text = format!("rpc error: code = Unknown {GRPC_OK_STATUS_TEXT}");

        assert!(!classifier.should_trip(&context(&(), &ok_text, Duration::ZERO)));
        assert!(classifier.should_trip(&context(
            &(),
            "rpc error: code = Unavailable desc = connection refused",
            Duration::ZERO
        )));
    }
}
