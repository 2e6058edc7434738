//! Error types for the request object.
//!
//! # Design
//! Only caller contract violations come back as `Err` from the public
//! methods. Transport and file failures are routed through the request's
//! error path and observed via status, events and the error flag; they reach
//! this enum only as the payload recorded in `status_text`. The redirect-loop
//! error is the exception: it is fatal and surfaces from `poll`/`wait`.

use thiserror::Error;

/// Errors returned by `XmlHttpRequest` and its collaborators.
#[derive(Debug, Error)]
pub enum XhrError {
    /// The operation is not allowed in the current ready state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// The method passed to `open` is forbidden (TRACE, TRACK, CONNECT).
    #[error("security error: {0}")]
    Security(String),

    /// The URL scheme is not one of http, https, file or empty.
    #[error("protocol not supported: {0}")]
    ProtocolNotSupported(String),

    /// `file:` URLs only accept GET.
    #[error("method not supported for file URLs: {0}")]
    MethodNotSupported(String),

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// More than `limit` redirects were followed for one send.
    #[error("too many redirects (limit {limit})")]
    TooManyRedirects { limit: u32 },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The configured timeout elapsed before the request completed.
    #[error("request timed out")]
    Timeout,

    /// The sync bridge worker went away without producing an artifact.
    #[error("sync bridge failure: {0}")]
    Bridge(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A config document or sync bridge artifact failed to (de)serialize.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A failure reported by a `Transport` (DNS, connect, TLS, stream).
///
/// Plain data so that transports living outside this crate only need to
/// produce a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport error: {message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl XhrError {
    /// Full diagnostic text including the source chain, used as the
    /// response body when a request fails.
    pub fn diagnostics(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            let text = err.to_string();
            // variants that embed their source in Display already
            if !out.ends_with(&text) {
                out.push_str(": ");
                out.push_str(&text);
            }
            source = err.source();
        }
        out
    }
}
