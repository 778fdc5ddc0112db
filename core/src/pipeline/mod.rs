//! Interceptor chain for outbound calls
//!
//! A pipeline is a singly linked list of [`Middleware`] stages ending in a
//! [`Runner`] that hands the request to the transport. Each stage does its
//! pre-call work, calls `next`, then does post-call work on the result.
//! A stage may skip `next` entirely to fail fast.
//!
//! ```text
//! Pipeline::call
//!     → Logger   (log request, time it)
//!     → Metric   (count + latency by status)
//!     → Breaker  (admit or reject)
//!     → Runner   (transport call)
//! ```
//!
//! The chain is linked once and frozen behind `Arc`s, so concurrent calls
//! share it without locking.

pub mod breaker;
pub mod logger;
pub mod metric;

pub use breaker::BreakerStage;
pub use logger::LoggerStage;
pub use metric::{
    CallSample, CallStatus, FacadeSink, MetricNames, MetricSink, MetricStage, ServiceIdentity,
};

use crate::errors::CallError;
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// Per-call context passed down the chain
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    request_id: Option<String>,
    deadline: Option<Instant>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline (`None` without a deadline)
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= Instant::now())
    }
}

/// Request-side description used for logs and metric labels
///
/// Only `operation` and `target` are required; the rest enrich request
/// logs when the request type can provide them.
pub trait CallSite {
    /// Verb or short method name (`GET`, `GetProfile`)
    fn operation(&self) -> &str;

    /// Path or fully qualified method (`/v1/users`, `/users.Users/GetProfile`)
    fn target(&self) -> &str;

    /// Full address including scheme, authority and query
    fn url(&self) -> Option<String> {
        None
    }

    fn host(&self) -> Option<&str> {
        None
    }

    fn user_agent(&self) -> Option<&str> {
        None
    }

    /// Outgoing headers or RPC metadata
    fn header_fields(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Payload rendered as text, when it can be read without consuming it
    fn body_text(&self) -> Option<String> {
        None
    }

    /// Protocol-specific call shape (`unary` for RPC)
    fn call_type(&self) -> Option<&'static str> {
        None
    }
}

/// Response-side classification
pub trait Reply {
    fn status_code(&self) -> Option<u16> {
        None
    }

    /// A response that arrived but reports failure (e.g. HTTP 5xx)
    fn is_error(&self) -> bool {
        false
    }

    fn header_fields(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn body_text(&self) -> Option<String> {
        None
    }
}

impl Reply for () {}

/// The actual call performed at the end of the chain
pub trait Transport<Req, Res>: Send + Sync {
    fn call(&self, ctx: &CallContext, request: Req) -> Result<Res, CallError>;
}

impl<Req, Res, F> Transport<Req, Res> for F
where
    F: Fn(&CallContext, Req) -> Result<Res, CallError> + Send + Sync,
{
    fn call(&self, ctx: &CallContext, request: Req) -> Result<Res, CallError> {
        self(ctx, request)
    }
}

/// One stage of the pipeline
pub trait Middleware<Req, Res>: Send + Sync {
    /// Stage name for introspection and diagnostics
    fn name(&self) -> &'static str;

    /// Handle one call, normally by delegating to the successor exactly once
    fn process(&self, ctx: &CallContext, request: Req) -> Result<Res, CallError>;

    /// Link the successor; called once while the pipeline is built
    fn set_next(&mut self, next: Arc<dyn Middleware<Req, Res>>);
}

/// Successor slot held by a stage
pub struct Next<Req, Res> {
    stage: &'static str,
    next: Option<Arc<dyn Middleware<Req, Res>>>,
}

impl<Req, Res> Next<Req, Res> {
    /// Empty slot owned by the named stage
    pub fn unlinked(stage: &'static str) -> Self {
        Self { stage, next: None }
    }

    pub fn set(&mut self, next: Arc<dyn Middleware<Req, Res>>) {
        self.next = Some(next);
    }

    pub fn is_linked(&self) -> bool {
        self.next.is_some()
    }

    /// Forward the call to the successor
    pub fn process(&self, ctx: &CallContext, request: Req) -> Result<Res, CallError> {
        match &self.next {
            Some(next) => next.process(ctx, request),
            None => Err(CallError::Unlinked { stage: self.stage }),
        }
    }
}

impl<Req, Res> std::fmt::Debug for Next<Req, Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("stage", &self.stage)
            .field("next", &self.next.as_ref().map(|next| next.name()))
            .finish()
    }
}

/// Terminal stage that performs the transport call
pub struct Runner<Req, Res> {
    transport: Arc<dyn Transport<Req, Res>>,
}

impl<Req, Res> Runner<Req, Res> {
    pub fn new(transport: Arc<dyn Transport<Req, Res>>) -> Self {
        Self { transport }
    }
}

impl<Req, Res> Middleware<Req, Res> for Runner<Req, Res> {
    fn name(&self) -> &'static str {
        "runner"
    }

    fn process(&self, ctx: &CallContext, request: Req) -> Result<Res, CallError> {
        if ctx.is_expired() {
            return Err(CallError::DeadlineExceeded);
        }
        self.transport.call(ctx, request)
    }

    fn set_next(&mut self, _next: Arc<dyn Middleware<Req, Res>>) {
        // the runner is always last
    }
}

/// Frozen chain of stages
pub struct Pipeline<Req, Res> {
    head: Arc<dyn Middleware<Req, Res>>,
    stages: Vec<&'static str>,
}

impl<Req: 'static, Res: 'static> Pipeline<Req, Res> {
    pub fn builder() -> PipelineBuilder<Req, Res> {
        PipelineBuilder::new()
    }

    /// Run one call through every stage
    pub fn call(&self, ctx: &CallContext, request: Req) -> Result<Res, CallError> {
        self.head.process(ctx, request)
    }

    /// Stage names from head to runner
    pub fn stages(&self) -> &[&'static str] {
        &self.stages
    }
}

impl<Req, Res> std::fmt::Debug for Pipeline<Req, Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("stages", &self.stages).finish()
    }
}

/// Collects stages in call order
pub struct PipelineBuilder<Req, Res> {
    middlewares: Vec<Box<dyn Middleware<Req, Res>>>,
}

impl<Req: 'static, Res: 'static> PipelineBuilder<Req, Res> {
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
        }
    }

    /// Append a stage; earlier stages wrap later ones
    pub fn with(mut self, middleware: impl Middleware<Req, Res> + 'static) -> Self {
        self.middlewares.push(Box::new(middleware));
        self
    }

    pub fn push(&mut self, middleware: Box<dyn Middleware<Req, Res>>) {
        self.middlewares.push(middleware);
    }

    /// Link every stage to its successor and terminate with a runner
    pub fn build(self, transport: Arc<dyn Transport<Req, Res>>) -> Pipeline<Req, Res> {
        let mut stages: Vec<&'static str> = self.middlewares.iter().map(|m| m.name()).collect();
        stages.push("runner");

        let mut next: Arc<dyn Middleware<Req, Res>> = Arc::new(Runner::new(transport));
        for mut middleware in self.middlewares.into_iter().rev() {
            middleware.set_next(next);
            next = Arc::from(middleware);
        }

        Pipeline { head: next, stages }
    }
}

impl<Req: 'static, Res: 'static> Default for PipelineBuilder<Req, Res> {
    fn default() -> Self {
        Self::new()
    }
}

/// Outbound client that links its pipeline on first use
///
/// Middlewares registered after the first call are ignored.
pub struct Client<Req, Res> {
    transport: Arc<dyn Transport<Req, Res>>,
    /// Stages awaiting the build; `None` once the pipeline has taken them
    pending: Mutex<Option<Vec<Box<dyn Middleware<Req, Res>>>>>,
    pipeline: OnceLock<Pipeline<Req, Res>>,
}

impl<Req: 'static, Res: 'static> Client<Req, Res> {
    pub fn new(transport: Arc<dyn Transport<Req, Res>>) -> Self {
        Self {
            transport,
            pending: Mutex::new(Some(Vec::new())),
            pipeline: OnceLock::new(),
        }
    }

    /// Register a stage after those already registered
    ///
    /// Returns `false`, and logs a warning, when the pipeline was already
    /// built and the stage is ignored.
    pub fn use_middleware(&self, middleware: impl Middleware<Req, Res> + 'static) -> bool {
        let mut pending = self.pending.lock();
        match pending.as_mut() {
            Some(stages) => {
                stages.push(Box::new(middleware));
                true
            }
            None => {
                tracing::warn!(
                    stage = middleware.name(),
                    "pipeline already built, middleware ignored"
                );
                false
            }
        }
    }

    pub fn exec(&self, ctx: &CallContext, request: Req) -> Result<Res, CallError> {
        self.pipeline().call(ctx, request)
    }

    /// The linked pipeline, building it if needed
    pub fn pipeline(&self) -> &Pipeline<Req, Res> {
        self.pipeline.get_or_init(|| {
            let mut builder = PipelineBuilder::new();
            for middleware in self.pending.lock().take().unwrap_or_default() {
                builder.push(middleware);
            }
            builder.build(Arc::clone(&self.transport))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{CircuitBreaker, Config};
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records `name:before` / `name:after` around the successor
    struct Trace {
        label: &'static str,
        journal: Arc<Mutex<Vec<String>>>,
        next: Next<u32, u32>,
    }

    impl Trace {
        fn new(label: &'static str, journal: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                label,
                journal: Arc::clone(journal),
                next: Next::unlinked("trace"),
            }
        }
    }

    impl Middleware<u32, u32> for Trace {
        fn name(&self) -> &'static str {
            self.label
        }

        fn process(&self, ctx: &CallContext, request: u32) -> Result<u32, CallError> {
            self.journal.lock().push(format!("{}:before", self.label));
            let result = self.next.process(ctx, request + 1);
            self.journal.lock().push(format!("{}:after", self.label));
            result
        }

        fn set_next(&mut self, next: Arc<dyn Middleware<u32, u32>>) {
            self.next.set(next);
        }
    }

    /// Rejects every call without delegating
    struct Reject {
        next: Next<u32, u32>,
    }

    impl Middleware<u32, u32> for Reject {
        fn name(&self) -> &'static str {
            "reject"
        }

        fn process(&self, _ctx: &CallContext, _request: u32) -> Result<u32, CallError> {
            Err(CallError::Open {
                circuit: "reject".into(),
            })
        }

        fn set_next(&mut self, next: Arc<dyn Middleware<u32, u32>>) {
            self.next.set(next);
        }
    }

    fn echo(journal: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Transport<u32, u32>> {
        let journal = Arc::clone(journal);
        Arc::new(move |_ctx: &CallContext, request: u32| {
            journal.lock().push(format!("runner:{request}"));
            Ok::<_, CallError>(request * 10)
        })
    }

    #[test]
    fn test_stages_run_in_order() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder()
            .with(Trace::new("outer", &journal))
            .with(Trace::new("inner", &journal))
            .build(echo(&journal));

        let result = pipeline.call(&CallContext::new(), 1);

        assert_eq!(result.unwrap(), 30);
        assert_eq!(pipeline.stages(), &["outer", "inner", "runner"]);
        assert_eq!(
            *journal.lock(),
            vec![
                "outer:before",
                "inner:before",
                "runner:3",
                "inner:after",
                "outer:after"
            ]
        );
    }

    #[test]
    fn test_empty_pipeline_is_just_runner() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let pipeline = PipelineBuilder::new().build(echo(&journal));

        assert_eq!(pipeline.call(&CallContext::new(), 4).unwrap(), 40);
        assert_eq!(pipeline.stages(), &["runner"]);
    }

    #[test]
    fn test_short_circuit_skips_downstream_only() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder()
            .with(Trace::new("outer", &journal))
            .with(Reject {
                next: Next::unlinked("reject"),
            })
            .with(Trace::new("inner", &journal))
            .build(echo(&journal));

        let result = pipeline.call(&CallContext::new(), 1);

        assert!(matches!(result, Err(CallError::Open { .. })));
        assert_eq!(*journal.lock(), vec!["outer:before", "outer:after"]);
    }

    #[test]
    fn test_unlinked_stage_reports_error() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let stage = Trace::new("lonely", &journal);

        let result = stage.process(&CallContext::new(), 1);

        assert!(matches!(result, Err(CallError::Unlinked { stage: "trace" })));
    }

    #[test]
    fn test_runner_ignores_set_next() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut runner = Runner::new(echo(&journal));
        runner.set_next(Arc::new(Reject {
            next: Next::unlinked("reject"),
        }));

        assert_eq!(runner.process(&CallContext::new(), 2).unwrap(), 20);
    }

    #[test]
    fn test_expired_deadline_never_reaches_transport() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let transport: Arc<dyn Transport<u32, u32>> =
            Arc::new(move |_ctx: &CallContext, request: u32| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, CallError>(request)
            });
        let pipeline = PipelineBuilder::new().build(transport);

        let ctx = CallContext::new().with_deadline(Instant::now() - Duration::from_millis(1));
        let result = pipeline.call(&ctx, 1);

        assert!(matches!(result, Err(CallError::DeadlineExceeded)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_deadline_failure_counts_against_breaker() {
        let breaker = Arc::new(
            CircuitBreaker::builder("slow")
                .config(Config {
                    total_request_checkpoint: 1,
                    max_failure_ratio: 1.0,
                    ..Config::default()
                })
                .clock(Arc::new(ManualClock::new()))
                .build(),
        );
        let transport: Arc<dyn Transport<u32, u32>> =
            Arc::new(|_ctx: &CallContext, request: u32| Ok::<_, CallError>(request));
        let pipeline = Pipeline::builder()
            .with(BreakerStage::new(Arc::clone(&breaker)))
            .build(transport);

        let ctx = CallContext::new().with_deadline(Instant::now() - Duration::from_millis(1));
        let _ = pipeline.call(&ctx, 1);

        assert!(breaker.is_open());
    }

    #[test]
    fn test_concurrent_calls_share_chain() {
        use std::thread;

        let journal = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Arc::new(
            Pipeline::builder()
                .with(Trace::new("outer", &journal))
                .build(echo(&journal)),
        );

        let handles: Vec<_> = (0..4u32)
            .map(|i| {
                let pipeline = Arc::clone(&pipeline);
                thread::spawn(move || pipeline.call(&CallContext::new(), i).unwrap())
            })
            .collect();
        let mut results: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        results.sort_unstable();

        assert_eq!(results, vec![10, 20, 30, 40]);
        assert_eq!(journal.lock().len(), 12);
    }

    #[test]
    fn test_client_builds_once() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let client = Client::new(echo(&journal));
        assert!(client.use_middleware(Trace::new("first", &journal)));

        assert_eq!(client.exec(&CallContext::new(), 1).unwrap(), 20);

        assert!(!client.use_middleware(Trace::new("late", &journal)));
        assert_eq!(client.exec(&CallContext::new(), 1).unwrap(), 20);
        assert_eq!(client.pipeline().stages(), &["first", "runner"]);
    }

    #[test]
    fn test_registration_racing_first_call_is_never_lost() {
        use std::thread;

        for _ in 0..20 {
            let journal = Arc::new(Mutex::new(Vec::new()));
            let client = Arc::new(Client::new(echo(&journal)));

            let registrars: Vec<_> = ["a", "b", "c", "d"]
                .into_iter()
                .map(|label| {
                    let client = Arc::clone(&client);
                    let journal = Arc::clone(&journal);
                    thread::spawn(move || client.use_middleware(Trace::new(label, &journal)))
                })
                .collect();
            let caller = {
                let client = Arc::clone(&client);
                thread::spawn(move || client.exec(&CallContext::new(), 0).is_ok())
            };

            let accepted = registrars
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|accepted| *accepted)
                .count();
            assert!(caller.join().unwrap());

            // every accepted stage made it into the chain, plus the runner
            assert_eq!(client.pipeline().stages().len(), accepted + 1);
        }
    }

    #[test]
    fn test_call_context() {
        let ctx = CallContext::new()
            .with_request_id("req-42")
            .with_timeout(Duration::from_secs(60));

        assert_eq!(ctx.request_id(), Some("req-42"));
        assert!(!ctx.is_expired());
        assert!(ctx.remaining().is_some_and(|left| left > Duration::from_secs(50)));
        assert!(CallContext::new().remaining().is_none());
    }
}
