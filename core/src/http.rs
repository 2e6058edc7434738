//! Transport contract for the host-does-IO pattern.
//!
//! # Design
//! The request object never touches a socket. It hands a fully resolved
//! `TransportRequest` (plain owned data) to a `Transport`, which streams
//! back `TransportEvent`s through an `EventSink`. The sink is the sending
//! half of a channel owned by the in-flight operation; once the operation
//! is released (abort, timeout, re-open) the receiver is dropped and every
//! sink method returns `false`, telling the transport to stop.
//!
//! All fields use owned types so a transport can move them onto its own
//! thread without lifetime concerns.

use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use crate::error::TransportError;

/// One HTTP request, resolved down to what goes on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub method: String,
    pub host: String,
    pub port: u16,
    /// Path plus query string.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub secure: bool,
    pub with_credentials: bool,
    /// Time left for the whole exchange. Transports give up once it
    /// elapses, so a released operation never outlives its deadline.
    pub timeout: Option<Duration>,
}

impl TransportRequest {
    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "https"
        } else {
            "http"
        }
    }

    /// Absolute URI for transports that take one.
    pub fn uri(&self) -> String {
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        format!("{}://{}:{}{}", self.scheme(), host, self.port, self.path)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What a transport reports while a request is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Status line and headers arrived.
    Head {
        status: u16,
        status_text: String,
        headers: Vec<(String, String)>,
    },
    /// A chunk of the response body.
    Data(Vec<u8>),
    /// The response body is complete.
    End,
    /// The request failed; nothing further follows.
    Error(TransportError),
}

/// Everything delivered on a request's channel.
#[derive(Debug)]
pub(crate) enum Delivery {
    Transport(TransportEvent),
    /// Outcome of an asynchronous `file:` read.
    File(std::io::Result<Vec<u8>>),
}

/// Sending half handed to a `Transport`.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<Delivery>,
}

impl EventSink {
    /// Returns `false` once nobody listens any more.
    pub fn send(&self, event: TransportEvent) -> bool {
        self.tx.send(Delivery::Transport(event)).is_ok()
    }

    pub fn head(&self, status: u16, status_text: impl Into<String>, headers: Vec<(String, String)>) -> bool {
        self.send(TransportEvent::Head {
            status,
            status_text: status_text.into(),
            headers,
        })
    }

    pub fn data(&self, chunk: Vec<u8>) -> bool {
        self.send(TransportEvent::Data(chunk))
    }

    pub fn end(&self) -> bool {
        self.send(TransportEvent::End)
    }

    pub fn error(&self, error: TransportError) -> bool {
        self.send(TransportEvent::Error(error))
    }

    pub(crate) fn file(&self, outcome: std::io::Result<Vec<u8>>) -> bool {
        self.tx.send(Delivery::File(outcome)).is_ok()
    }
}

/// Receiving half, owned by the in-flight operation.
#[derive(Debug)]
pub struct EventStream {
    rx: Receiver<Delivery>,
}

impl EventStream {
    pub(crate) fn receiver(&self) -> &Receiver<Delivery> {
        &self.rx
    }
}

/// Create a connected sink/stream pair.
pub fn event_channel() -> (EventSink, EventStream) {
    let (tx, rx) = mpsc::channel();
    (EventSink { tx }, EventStream { rx })
}

/// Handle on one in-flight transport operation.
pub trait TransportHandle: Send {
    /// Cancel the operation. Must be safe to call more than once.
    fn abort(&mut self);
}

/// Performs HTTP(S) requests on behalf of the request object.
///
/// `request` must return promptly; the response is delivered through
/// `sink`, typically from another thread.
pub trait Transport: Send + Sync {
    fn request(
        &self,
        request: TransportRequest,
        sink: EventSink,
    ) -> Result<Box<dyn TransportHandle>, TransportError>;
}

/// Handle for operations with nothing to cancel.
#[derive(Debug, Default)]
pub struct NoopHandle;

impl TransportHandle for NoopHandle {
    fn abort(&mut self) {}
}
