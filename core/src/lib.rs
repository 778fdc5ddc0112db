//! OutboundMachines - Circuit breaking and interceptor pipelines for outbound calls
//!
//! This crate provides:
//! - A generation-based circuit breaker (Closed → Open → HalfOpen) driven by
//!   request counters and a failure ratio
//! - A linked middleware pipeline for outbound HTTP and unary RPC calls
//! - Logging, metric and breaker stages that compose in any order
//! - A registry handing out one shared breaker per downstream dependency
//!
//! # Example
//!
//! ```rust
//! use outbound_machines::CircuitBreaker;
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::builder("payment_api")
//!     .total_request_checkpoint(3)
//!     .max_failure_ratio(0.6)
//!     .timeout(Duration::from_secs(5))
//!     .on_open(|name| println!("Circuit {} opened!", name))
//!     .build();
//!
//! // Execute with circuit protection
//! let result = breaker.execute(|| {
//!     // Your service call here
//!     Ok::<_, String>("success")
//! });
//! assert!(result.is_ok());
//!
//! // Check circuit state
//! if breaker.is_open() {
//!     println!("Circuit is open, skipping call");
//! }
//! ```
//!
//! # Pipelines
//!
//! ```rust
//! use outbound_machines::pipeline::{BreakerStage, CallContext, LoggerStage, Pipeline, Transport};
//! use outbound_machines::{CallError, CircuitBreaker};
//! use std::sync::Arc;
//!
//! let breaker = Arc::new(CircuitBreaker::builder("users").build());
//! let transport: Arc<dyn Transport<http::Request<()>, http::Response<()>>> =
//!     Arc::new(|_ctx: &CallContext, _req: http::Request<()>| {
//!         http::Response::builder().status(200).body(()).map_err(CallError::transport)
//!     });
//!
//! let pipeline = Pipeline::builder()
//!     .with(LoggerStage::new("users"))
//!     .with(BreakerStage::new(breaker))
//!     .build(transport);
//!
//! let request = http::Request::get("http://users/v1/users/7").body(()).unwrap();
//! let response = pipeline.call(&CallContext::new(), request).unwrap();
//! assert_eq!(response.status(), 200);
//! ```

pub mod builder;
pub mod callbacks;
pub mod circuit;
pub mod classifier;
pub mod clock;
pub mod counts;
pub mod errors;
pub mod http;
pub mod pipeline;
pub mod registry;
pub mod rpc;

pub use builder::CircuitBuilder;
pub use callbacks::Callbacks;
pub use circuit::{CircuitBreaker, Config, DEFAULT_NAME, Permit, State};
pub use classifier::{
    DefaultClassifier, FailureClassifier, FailureContext, GRPC_OK_STATUS_TEXT, PredicateClassifier,
    StatusTextClassifier,
};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use counts::Counts;
pub use errors::{BoxError, CallError, CircuitError};
pub use pipeline::{
    BreakerStage, CallContext, CallSite, Client, LoggerStage, MetricStage, Middleware, Pipeline,
    Reply, Transport,
};
pub use registry::BreakerRegistry;
