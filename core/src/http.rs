//! `http` crate bindings for the pipeline
//!
//! Requests are described by method and URI path, responses by status
//! code. Any HTTP client can sit behind the [`Transport`](crate::pipeline::Transport)
//! as long as it speaks `http::Request` / `http::Response`.

use crate::pipeline::{CallSite, Reply};
use ::http::header::{HOST, USER_AGENT};
use ::http::{HeaderMap, Request, Response};

/// Body types whose content can be shown in request logs
///
/// Streaming bodies return `None`; reading them for a log line would
/// consume them.
pub trait BodyText {
    fn body_text(&self) -> Option<String>;
}

impl BodyText for () {
    fn body_text(&self) -> Option<String> {
        None
    }
}

impl BodyText for String {
    fn body_text(&self) -> Option<String> {
        Some(self.clone())
    }
}

impl BodyText for &str {
    fn body_text(&self) -> Option<String> {
        Some((*self).to_string())
    }
}

impl BodyText for Vec<u8> {
    fn body_text(&self) -> Option<String> {
        Some(String::from_utf8_lossy(self).into_owned())
    }
}

impl BodyText for &[u8] {
    fn body_text(&self) -> Option<String> {
        Some(String::from_utf8_lossy(self).into_owned())
    }
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

impl<B: BodyText> CallSite for Request<B> {
    fn operation(&self) -> &str {
        self.method().as_str()
    }

    fn target(&self) -> &str {
        self.uri().path()
    }

    fn url(&self) -> Option<String> {
        Some(self.uri().to_string())
    }

    /// `Host` header, falling back to the URI authority
    fn host(&self) -> Option<&str> {
        self.headers()
            .get(HOST)
            .and_then(|value| value.to_str().ok())
            .or_else(|| self.uri().host())
    }

    fn user_agent(&self) -> Option<&str> {
        self.headers()
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
    }

    fn header_fields(&self) -> Vec<(String, String)> {
        header_pairs(self.headers())
    }

    fn body_text(&self) -> Option<String> {
        self.body().body_text()
    }
}

impl<B: BodyText> Reply for Response<B> {
    fn status_code(&self) -> Option<u16> {
        Some(self.status().as_u16())
    }

    /// 4xx and 5xx responses count as errors in logs and metrics
    fn is_error(&self) -> bool {
        let status = self.status();
        status.is_client_error() || status.is_server_error()
    }

    fn header_fields(&self) -> Vec<(String, String)> {
        header_pairs(self.headers())
    }

    fn body_text(&self) -> Option<String> {
        self.body().body_text()
    }
}
