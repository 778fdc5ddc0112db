//! Structured request/response logging stage

use super::{CallContext, CallSite, Middleware, Next, Reply};
use crate::errors::CallError;
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Instant;

/// Longest request or response body logged before it is cut
pub const MAX_LOGGED_BODY: usize = 10_000;

/// Header values never written to logs
const REDACTED_HEADERS: [&str; 4] = ["authorization", "proxy-authorization", "cookie", "set-cookie"];

/// Cut `body` after `limit` characters, marking the cut with `...`
///
/// ```rust
/// use outbound_machines::pipeline::logger::truncate_body;
///
/// assert_eq!(truncate_body("abcdef", 3), "abc...");
/// assert_eq!(truncate_body("abc", 3), "abc");
/// ```
pub fn truncate_body(body: &str, limit: usize) -> Cow<'_, str> {
    match body.char_indices().nth(limit) {
        Some((cut, _)) => Cow::Owned(format!("{}...", &body[..cut])),
        None => Cow::Borrowed(body),
    }
}

fn loggable_headers(fields: Vec<(String, String)>) -> Vec<(String, String)> {
    fields
        .into_iter()
        .map(|(name, value)| {
            if REDACTED_HEADERS
                .iter()
                .any(|hidden| name.eq_ignore_ascii_case(hidden))
            {
                (name, "[redacted]".to_string())
            } else {
                (name, value)
            }
        })
        .collect()
}

fn loggable_body(body: Option<String>) -> Option<String> {
    body.map(|body| truncate_body(&body, MAX_LOGGED_BODY).into_owned())
}

/// Logs every call before and after the rest of the chain runs
///
/// The measured duration covers every stage downstream of this one.
pub struct LoggerStage<Req, Res> {
    service: String,
    next: Next<Req, Res>,
}

impl<Req, Res> LoggerStage<Req, Res> {
    /// Stage logging calls made to the named external service
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            next: Next::unlinked("logger"),
        }
    }
}

impl<Req, Res> Middleware<Req, Res> for LoggerStage<Req, Res>
where
    Req: CallSite,
    Res: Reply,
{
    fn name(&self) -> &'static str {
        "logger"
    }

    fn process(&self, ctx: &CallContext, request: Req) -> Result<Res, CallError> {
        let operation = request.operation().to_string();
        let target = request.target().to_string();
        let url = request.url();
        let call_type = request.call_type();
        let req_headers = loggable_headers(request.header_fields());
        let req_body = loggable_body(request.body_text());
        let started = Instant::now();

        tracing::info!(
            service = %self.service,
            request_id = ctx.request_id(),
            %operation,
            %target,
            url = url.as_deref(),
            host = request.host(),
            user_agent = request.user_agent(),
            call_type,
            req_headers = ?req_headers,
            req_body = req_body.as_deref(),
            "sending request"
        );

        let result = self.next.process(ctx, request);
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match &result {
            Err(err) if err.is_rejection() => tracing::warn!(
                service = %self.service,
                request_id = ctx.request_id(),
                %operation,
                %target,
                url = url.as_deref(),
                call_type,
                duration_ms,
                error = %err,
                "request rejected by circuit breaker"
            ),
            Err(err) => tracing::error!(
                service = %self.service,
                request_id = ctx.request_id(),
                %operation,
                %target,
                url = url.as_deref(),
                call_type,
                duration_ms,
                error = %err,
                "request failed"
            ),
            Ok(reply) => {
                let res_headers = loggable_headers(reply.header_fields());
                let res_body = loggable_body(reply.body_text());
                if reply.is_error() {
                    tracing::error!(
                        service = %self.service,
                        request_id = ctx.request_id(),
                        %operation,
                        %target,
                        url = url.as_deref(),
                        call_type,
                        status = reply.status_code(),
                        duration_ms,
                        res_headers = ?res_headers,
                        res_body = res_body.as_deref(),
                        "request returned non-OK status"
                    );
                } else {
                    tracing::info!(
                        service = %self.service,
                        request_id = ctx.request_id(),
                        %operation,
                        %target,
                        url = url.as_deref(),
                        call_type,
                        status = reply.status_code(),
                        duration_ms,
                        res_headers = ?res_headers,
                        res_body = res_body.as_deref(),
                        "received response"
                    );
                }
            }
        }

        result
    }

    fn set_next(&mut self, next: Arc<dyn Middleware<Req, Res>>) {
        self.next.set(next);
    }
}
