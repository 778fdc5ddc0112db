//! Unary RPC bindings
//!
//! A unary call is identified by its fully qualified method
//! (`/package.Service/Method`). Logs and metrics use the short method name
//! as the operation and the full method as the target.

use crate::circuit::CircuitBreaker;
use crate::errors::CallError;
use crate::pipeline::{CallSite, Reply};
use std::fmt;

/// Short method name from a fully qualified one
///
/// `"/users.Users/GetProfile"` yields `"GetProfile"`. Input without two
/// separators comes back unchanged.
///
/// ```rust
/// use outbound_machines::rpc::method_name;
///
/// assert_eq!(method_name("/users.Users/GetProfile"), "GetProfile");
/// assert_eq!(method_name("GetProfile"), "GetProfile");
/// ```
pub fn method_name(full_method: &str) -> &str {
    full_method.split('/').nth(2).unwrap_or(full_method)
}

/// Outgoing unary request
#[derive(Debug, Clone, PartialEq)]
pub struct UnaryCall<M> {
    full_method: String,
    metadata: Vec<(String, String)>,
    pub message: M,
}

impl<M> UnaryCall<M> {
    pub fn new(full_method: impl Into<String>, message: M) -> Self {
        Self {
            full_method: full_method.into(),
            metadata: Vec::new(),
            message,
        }
    }

    /// Attach one outgoing metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    pub fn full_method(&self) -> &str {
        &self.full_method
    }

    pub fn metadata(&self) -> &[(String, String)] {
        &self.metadata
    }

    pub fn into_message(self) -> M {
        self.message
    }
}

impl<M: fmt::Debug> CallSite for UnaryCall<M> {
    fn operation(&self) -> &str {
        method_name(&self.full_method)
    }

    fn target(&self) -> &str {
        &self.full_method
    }

    fn header_fields(&self) -> Vec<(String, String)> {
        self.metadata.clone()
    }

    fn body_text(&self) -> Option<String> {
        Some(format!("{:?}", self.message))
    }

    fn call_type(&self) -> Option<&'static str> {
        Some("unary")
    }
}

/// Unary response; RPC failures travel as `Err`, never as a reply
#[derive(Debug, Clone, PartialEq)]
pub struct RpcReply<M>(pub M);

impl<M> RpcReply<M> {
    pub fn into_inner(self) -> M {
        self.0
    }
}

impl<M: fmt::Debug> Reply for RpcReply<M> {
    fn body_text(&self) -> Option<String> {
        Some(format!("{:?}", self.0))
    }
}

/// Run one unary invocation under `breaker`
///
/// Rejections come back as [`CallError::Open`] or
/// [`CallError::TooManyRequests`] without calling `invoke`; invocation
/// errors come back unchanged.
pub fn guard_unary<T, F>(breaker: &CircuitBreaker, invoke: F) -> Result<T, CallError>
where
    F: FnOnce() -> Result<T, CallError>,
{
    crate::pipeline::breaker::guard(breaker, invoke)
}
