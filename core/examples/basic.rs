//! Outbound HTTP pipeline with logging, metrics and a circuit breaker
//!
//! Run with `RUST_LOG=debug cargo run --example basic` to see every stage.

use outbound_machines::pipeline::{
    BreakerStage, CallContext, LoggerStage, MetricNames, MetricStage, Pipeline, ServiceIdentity,
    Transport,
};
use outbound_machines::{BreakerRegistry, CallError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "outbound_machines=info,basic=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let registry = BreakerRegistry::new();
    let breaker = registry.get_or_create_with("payments", |builder| {
        builder
            .total_request_checkpoint(3)
            .max_failure_ratio(0.6)
            .max_requests(2)
            .timeout(Duration::from_millis(300))
            .on_open(|name| tracing::warn!(circuit = name, "payments circuit opened"))
            .on_close(|name| tracing::info!(circuit = name, "payments circuit closed"))
    });

    // Simulated upstream that can be switched off
    let healthy = Arc::new(AtomicBool::new(true));
    let upstream = Arc::clone(&healthy);
    let transport: Arc<dyn Transport<http::Request<()>, http::Response<()>>> =
        Arc::new(move |_ctx: &CallContext, _request: http::Request<()>| {
            if upstream.load(Ordering::SeqCst) {
                http::Response::builder()
                    .status(200)
                    .body(())
                    .map_err(CallError::transport)
            } else {
                Err(CallError::transport("connection refused"))
            }
        });

    let pipeline = Pipeline::builder()
        .with(LoggerStage::new("payments"))
        .with(MetricStage::new(
            "payments",
            Arc::new(ServiceIdentity::from_env()),
            MetricNames::HTTP,
        ))
        .with(BreakerStage::new(Arc::clone(&breaker)))
        .build(transport);

    tracing::info!(stages = ?pipeline.stages(), "pipeline ready");

    let charge = |id: u32| -> Result<http::Response<()>, CallError> {
        let ctx = CallContext::new()
            .with_request_id(format!("req-{id}"))
            .with_timeout(Duration::from_secs(2));
        let request = http::Request::post("http://payments.internal/v1/charges")
            .body(())
            .map_err(CallError::transport)?;
        pipeline.call(&ctx, request)
    };

    for id in 1..=2 {
        let _ = charge(id);
    }

    healthy.store(false, Ordering::SeqCst);
    for id in 3..=6 {
        let _ = charge(id);
    }
    tracing::info!(state = %breaker.state(), counts = ?breaker.counts(), "after outage");

    healthy.store(true, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(350));
    for id in 7..=8 {
        let _ = charge(id);
    }
    tracing::info!(state = %breaker.state(), "after recovery");

    Ok(())
}
