//! Request count and latency stage
//!
//! # Metrics
//! - `<prefix>_requests_total` (counter)
//! - `<prefix>_requests_latency_seconds` (histogram)
//!
//! Labels: `app_name`, `pod_name`, `namespace`, `external_service_name`,
//! `method`, `path`, `status` (`success` | `error` | `rejected`).

use super::{CallContext, CallSite, Middleware, Next, Reply};
use crate::errors::CallError;
use metrics::Label;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Identity of the calling process, resolved once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    pub app_name: String,
    pub pod_name: String,
    pub namespace: String,
}

impl Default for ServiceIdentity {
    fn default() -> Self {
        Self {
            app_name: "unknown service".to_string(),
            pod_name: "unknown pod".to_string(),
            namespace: "default".to_string(),
        }
    }
}

impl ServiceIdentity {
    /// Read `APP_NAME`, `POD_NAME` and `NAMESPACE`, falling back to defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve identity from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let read = |key: &str, fallback: String| {
            lookup(key)
                .filter(|value| !value.is_empty())
                .unwrap_or(fallback)
        };

        Self {
            app_name: read("APP_NAME", defaults.app_name),
            pod_name: read("POD_NAME", defaults.pod_name),
            namespace: read("NAMESPACE", defaults.namespace),
        }
    }
}

/// Metric family names for one protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricNames {
    pub requests_total: &'static str,
    pub latency_seconds: &'static str,
}

impl MetricNames {
    pub const HTTP: Self = Self {
        requests_total: "external_api_requests_total",
        latency_seconds: "external_api_requests_latency_seconds",
    };

    pub const GRPC: Self = Self {
        requests_total: "external_grpc_requests_total",
        latency_seconds: "external_grpc_requests_latency_seconds",
    };
}

/// Outcome label of one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Success,
    Error,
    /// A breaker refused the call before it reached the transport
    Rejected,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Success => "success",
            CallStatus::Error => "error",
            CallStatus::Rejected => "rejected",
        }
    }
}

/// One observed call
#[derive(Debug, Clone)]
pub struct CallSample<'a> {
    pub names: MetricNames,
    pub identity: &'a ServiceIdentity,
    pub service: &'a str,
    pub method: &'a str,
    pub path: &'a str,
    pub status: CallStatus,
    pub latency: Duration,
}

impl CallSample<'_> {
    pub fn labels(&self) -> Vec<Label> {
        vec![
            Label::new("app_name", self.identity.app_name.clone()),
            Label::new("pod_name", self.identity.pod_name.clone()),
            Label::new("namespace", self.identity.namespace.clone()),
            Label::new("external_service_name", self.service.to_string()),
            Label::new("method", self.method.to_string()),
            Label::new("path", self.path.to_string()),
            Label::new("status", self.status.as_str()),
        ]
    }
}

/// Destination for call samples
pub trait MetricSink: Send + Sync {
    fn record(&self, sample: &CallSample<'_>);
}

/// Sink that emits through the `metrics` facade
///
/// Whatever recorder the application installed (Prometheus exporter,
/// statsd, ...) receives the samples; without one they are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct FacadeSink;

impl MetricSink for FacadeSink {
    fn record(&self, sample: &CallSample<'_>) {
        let labels = sample.labels();
        metrics::counter!(sample.names.requests_total, labels.clone()).increment(1);
        metrics::histogram!(sample.names.latency_seconds, labels)
            .record(sample.latency.as_secs_f64());
    }
}

/// Counts calls and measures their latency by outcome
pub struct MetricStage<Req, Res> {
    service: String,
    identity: Arc<ServiceIdentity>,
    names: MetricNames,
    sink: Arc<dyn MetricSink>,
    next: Next<Req, Res>,
}

impl<Req, Res> MetricStage<Req, Res> {
    /// Stage reporting through the `metrics` facade
    pub fn new(
        service: impl Into<String>,
        identity: Arc<ServiceIdentity>,
        names: MetricNames,
    ) -> Self {
        Self::with_sink(service, identity, names, Arc::new(FacadeSink))
    }

    pub fn with_sink(
        service: impl Into<String>,
        identity: Arc<ServiceIdentity>,
        names: MetricNames,
        sink: Arc<dyn MetricSink>,
    ) -> Self {
        Self {
            service: service.into(),
            identity,
            names,
            sink,
            next: Next::unlinked("metric"),
        }
    }
}

impl<Req, Res> Middleware<Req, Res> for MetricStage<Req, Res>
where
    Req: CallSite,
    Res: Reply,
{
    fn name(&self) -> &'static str {
        "metric"
    }

    fn process(&self, ctx: &CallContext, request: Req) -> Result<Res, CallError> {
        let method = request.operation().to_string();
        let path = request.target().to_string();
        let started = Instant::now();

        let result = self.next.process(ctx, request);

        let status = match &result {
            Ok(reply) if !reply.is_error() => CallStatus::Success,
            Ok(_) => CallStatus::Error,
            Err(err) if err.is_rejection() => CallStatus::Rejected,
            Err(_) => CallStatus::Error,
        };
        self.sink.record(&CallSample {
            names: self.names,
            identity: &self.identity,
            service: &self.service,
            method: &method,
            path: &path,
            status,
            latency: started.elapsed(),
        });

        result
    }

    fn set_next(&mut self, next: Arc<dyn Middleware<Req, Res>>) {
        self.next.set(next);
    }
}
