//! Request/response exchange with a single broker.
//!
//! The transport only moves JSON back and forth. It reports connectivity
//! failures and HTTP status failures as distinct [`TransportFailure`]s so
//! that callers can treat an unreachable broker differently from a broker
//! that refused a request.
pub mod http;
mod normalize;

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

pub use normalize::normalize_response;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportFailure {
    #[error("{0}")]
    Connection(String),
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("cannot decode response: {0}")]
    Decode(String),
}

pub type TransportResult = Result<Value, TransportFailure>;
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = TransportResult> + Send + 'a>>;

pub trait Transport: Send + Sync {
    /// Send one request to the broker. Paths are relative to the broker API root.
    fn send_request(&self, method: Method, path: &str, body: Option<Value>) -> TransportFuture<'_>;

    /// Identity this transport is authenticated as on its broker, if known.
    fn logged_in_username(&self) -> Option<String>;
}
