//! Default collaborators: a ureq-backed `Transport` and a filesystem
//! `FileReader`.
//!
//! # Design
//! `UreqTransport` runs each request on a dedicated thread with ureq's own
//! redirect following and status-as-error behavior turned off, so the
//! request object sees every 3xx and every 4xx/5xx as plain data. The body
//! is streamed to the sink in fixed-size chunks. Abort flips a shared flag
//! that the worker checks between reads; a read already blocked on the
//! socket finishes first, and its output is dropped because the receiving
//! side is gone by then. A request that carries a timeout runs on an agent
//! with that global timeout, so its thread exits once the deadline passes
//! even if the peer never answers.

use std::io::{ErrorKind, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::debug;
use ureq::http;

use crate::error::TransportError;
use crate::http::{EventSink, Transport, TransportHandle, TransportRequest};

const CHUNK_SIZE: usize = 8 * 1024;

/// HTTP/1.1 transport on top of a shared `ureq::Agent`.
#[derive(Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl std::fmt::Debug for UreqTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UreqTransport").finish_non_exhaustive()
    }
}

impl UreqTransport {
    pub fn new() -> Self {
        Self {
            agent: build_agent(None),
        }
    }

    fn agent_for(&self, request: &TransportRequest) -> ureq::Agent {
        match request.timeout {
            Some(limit) => build_agent(Some(limit)),
            None => self.agent.clone(),
        }
    }
}

fn build_agent(timeout: Option<Duration>) -> ureq::Agent {
    ureq::Agent::config_builder()
        .http_status_as_error(false)
        .max_redirects(0)
        .timeout_global(timeout)
        .build()
        .new_agent()
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for UreqTransport {
    fn request(
        &self,
        request: TransportRequest,
        sink: EventSink,
    ) -> Result<Box<dyn TransportHandle>, TransportError> {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let agent = self.agent_for(&request);

        thread::Builder::new()
            .name("xhr-transport".to_string())
            .spawn(move || {
                if let Err(err) = perform(&agent, &request, &sink, &flag) {
                    if !flag.load(Ordering::Acquire) {
                        sink.error(err);
                    }
                }
            })
            .map_err(|e| TransportError::new(format!("failed to spawn transport thread: {e}")))?;

        Ok(Box::new(FlagHandle { cancelled }))
    }
}

/// Cancels a worker through a shared flag.
#[derive(Debug)]
pub struct FlagHandle {
    cancelled: Arc<AtomicBool>,
}

impl FlagHandle {
    pub fn new(cancelled: Arc<AtomicBool>) -> Self {
        Self { cancelled }
    }
}

impl TransportHandle for FlagHandle {
    fn abort(&mut self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

fn perform(
    agent: &ureq::Agent,
    request: &TransportRequest,
    sink: &EventSink,
    cancelled: &AtomicBool,
) -> Result<(), TransportError> {
    let uri = request.uri();
    debug!("{} {}", request.method, uri);

    let mut builder = http::Request::builder()
        .method(request.method.as_str())
        .uri(uri.as_str());
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    let result = if request.body.is_empty() {
        let req = builder.body(()).map_err(to_transport_error)?;
        agent.run(req)
    } else {
        let req = builder
            .body(request.body.clone())
            .map_err(to_transport_error)?;
        agent.run(req)
    };
    let mut response = result.map_err(to_transport_error)?;

    if cancelled.load(Ordering::Acquire) {
        return Ok(());
    }

    let status = response.status();
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    if !sink.head(status.as_u16(), status.canonical_reason().unwrap_or(""), headers) {
        return Ok(());
    }

    let mut reader = response.body_mut().as_reader();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        if cancelled.load(Ordering::Acquire) {
            return Ok(());
        }
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(to_transport_error(e)),
        };
        if !sink.data(buf[..n].to_vec()) {
            return Ok(());
        }
    }
    sink.end();
    Ok(())
}

fn to_transport_error(err: impl std::fmt::Display) -> TransportError {
    TransportError::new(err.to_string())
}

/// Reads local files for `file:` URLs.
pub trait FileReader: Send + Sync {
    fn read_all(&self, path: &Path) -> std::io::Result<Vec<u8>>;
}

/// `FileReader` over `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsReader;

impl FileReader for FsReader {
    fn read_all(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        std::fs::read(path)
    }
}
