//! Circuit breaker stage
//!
//! Everything downstream of this stage becomes the protected call. When
//! the breaker rejects, the downstream stages and the transport never run;
//! stages upstream still see the rejection as a `CallError`. A rejection
//! coming back from a breaker further down is passed through without
//! counting against this one.

use super::{CallContext, Middleware, Next};
use crate::circuit::CircuitBreaker;
use crate::errors::CallError;
use std::sync::Arc;

/// Run `invoke` under `breaker`
///
/// Success and ordinary errors are recorded as outcomes (errors through the
/// breaker's classifier). A panic is recorded as a failure. An error that
/// is itself a breaker rejection releases the admission uncounted.
pub fn guard<T, F>(breaker: &CircuitBreaker, invoke: F) -> Result<T, CallError>
where
    F: FnOnce() -> Result<T, CallError>,
{
    let permit = breaker.allow()?;
    let result = invoke();

    match &result {
        Ok(_) => permit.success(),
        Err(err) if err.is_rejection() => permit.release(),
        Err(err) => permit.error(err),
    }
    result
}

/// Routes the rest of the chain through a shared breaker
pub struct BreakerStage<Req, Res> {
    breaker: Arc<CircuitBreaker>,
    next: Next<Req, Res>,
}

impl<Req, Res> BreakerStage<Req, Res> {
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            breaker,
            next: Next::unlinked("breaker"),
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

impl<Req, Res> Middleware<Req, Res> for BreakerStage<Req, Res> {
    fn name(&self) -> &'static str {
        "breaker"
    }

    fn process(&self, ctx: &CallContext, request: Req) -> Result<Res, CallError> {
        guard(&self.breaker, || self.next.process(ctx, request))
    }

    fn set_next(&mut self, next: Arc<dyn Middleware<Req, Res>>) {
        self.next.set(next);
    }
}
