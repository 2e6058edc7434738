//! The request object: XHR ready-state machine over a pluggable transport.
//!
//! # Design
//! `XmlHttpRequest` is single-threaded and owns everything about one request
//! lifecycle. `send` resolves the target and hands it to a collaborator:
//!
//! - asynchronous HTTP(S) goes to the `Transport`, which streams deliveries
//!   into a channel owned by the in-flight operation. Nothing is applied
//!   until the owner calls `poll` or `wait`, so transport callbacks are
//!   always serialized with caller calls on the owner's thread.
//! - synchronous HTTP(S) goes through the `SyncBridge`, which blocks until
//!   the complete response (or the deadline) and then jumps straight to
//!   DONE.
//! - `file:` URLs go to the `FileReader`, on a worker thread when
//!   asynchronous.
//!
//! Handlers run with `&mut XmlHttpRequest` and may call back into it,
//! including `abort` and `open`. Every method that dispatches re-checks the
//! send generation afterwards and stops if a handler started over. The
//! in-flight operation lives in an `Option` and is taken exactly once, so
//! its transport handle is released exactly once whichever path gets there
//! first.

use std::fmt;
use std::path::PathBuf;
use std::sync::mpsc::{RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, warn};
use url::Url;

use crate::config::Config;
use crate::error::{TransportError, XhrError};
use crate::events::{self, Event, EventKind, EventOwner, EventTarget, Listener};
use crate::headers::{is_forbidden_header, is_forbidden_method, HeaderTable, COOKIE_RESPONSE_HEADERS};
use crate::http::{event_channel, Delivery, EventStream, Transport, TransportEvent, TransportHandle, TransportRequest};
use crate::prepare::{self, parse_url, Target};
use crate::sync_bridge::{ArtifactStore, SyncBridge};
use crate::transport::{FileReader, FsReader, UreqTransport};
use crate::types::{normalize_method, ReadyState, Settings};

/// A handler bound to an `XmlHttpRequest`.
pub type XhrListener = Listener<XmlHttpRequest>;

/// One operation currently owned by the request.
struct InFlight {
    handle: Option<Box<dyn TransportHandle>>,
    events: EventStream,
    /// The request on the wire, kept for redirect hops. `None` for file reads.
    request: Option<TransportRequest>,
    redirects: u32,
    deadline: Option<Instant>,
}

/// What the event loop picked up next.
enum Step {
    Deliver(Delivery),
    TimedOut,
    Closed,
}

/// Client-side HTTP request object with XMLHttpRequest semantics.
pub struct XmlHttpRequest {
    config: Config,
    transport: Arc<dyn Transport>,
    reader: Arc<dyn FileReader>,
    events: EventTarget<XmlHttpRequest>,

    settings: Option<Settings>,
    request_headers: HeaderTable,
    ready_state: ReadyState,
    send_flag: bool,
    error_flag: bool,
    /// Bumped by every abort; lets dispatching code notice that a handler
    /// restarted the object.
    generation: u64,

    status: u16,
    status_text: String,
    response_headers: HeaderTable,
    response: Vec<u8>,

    timeout: Duration,
    with_credentials: bool,
    disable_header_check: bool,

    in_flight: Option<InFlight>,
}

impl XmlHttpRequest {
    pub fn new() -> Self {
        Self::with_parts(Config::default(), Arc::new(UreqTransport::new()), Arc::new(FsReader))
    }

    pub fn with_config(config: Config) -> Self {
        Self::with_parts(config, Arc::new(UreqTransport::new()), Arc::new(FsReader))
    }

    /// Build with injected collaborators.
    pub fn with_parts(config: Config, transport: Arc<dyn Transport>, reader: Arc<dyn FileReader>) -> Self {
        let mut xhr = Self {
            config,
            transport,
            reader,
            events: EventTarget::new(),
            settings: None,
            request_headers: HeaderTable::new(),
            ready_state: ReadyState::Unsent,
            send_flag: false,
            error_flag: false,
            generation: 0,
            status: 0,
            status_text: String::new(),
            response_headers: HeaderTable::new(),
            response: Vec::new(),
            timeout: Duration::ZERO,
            with_credentials: false,
            disable_header_check: false,
            in_flight: None,
        };
        xhr.reset_request_headers();
        xhr
    }

    // -----------------------------------------------------------------------
    // Properties
    // -----------------------------------------------------------------------

    pub fn ready_state(&self) -> ReadyState {
        self.ready_state
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// Accumulated body decoded as UTF-8 (lossy).
    pub fn response_text(&self) -> String {
        String::from_utf8_lossy(&self.response).into_owned()
    }

    pub fn response_bytes(&self) -> &[u8] {
        &self.response
    }

    /// XML documents are never produced.
    pub fn response_xml(&self) -> Option<&str> {
        None
    }

    /// URL of the last hop, after redirects.
    pub fn response_url(&self) -> Option<&Url> {
        self.settings.as_ref().map(|s| &s.url)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Zero disables the timeout. Takes effect at the next `send`.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn with_credentials(&self) -> bool {
        self.with_credentials
    }

    pub fn set_with_credentials(&mut self, value: bool) -> Result<(), XhrError> {
        if self.ready_state > ReadyState::Opened || self.send_flag {
            return Err(XhrError::InvalidState(
                "withCredentials can only be set before send",
            ));
        }
        self.with_credentials = value;
        Ok(())
    }

    pub fn disable_header_check(&self) -> bool {
        self.disable_header_check
    }

    /// Bypass the forbidden header and method lists.
    pub fn set_disable_header_check(&mut self, value: bool) {
        self.disable_header_check = value;
    }

    pub fn error_flag(&self) -> bool {
        self.error_flag
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    pub fn add_event_listener(&mut self, kind: EventKind, listener: XhrListener) {
        self.events.add_listener(kind, listener);
    }

    pub fn remove_event_listener(&mut self, kind: EventKind, listener: &XhrListener) -> bool {
        self.events.remove_listener(kind, listener)
    }

    /// The `on<kind>` handler.
    pub fn set_event_handler(&mut self, kind: EventKind, handler: Option<XhrListener>) {
        self.events.set_slot(kind, handler);
    }

    pub fn event_handler(&self, kind: EventKind) -> Option<&XhrListener> {
        self.events.slot(kind)
    }

    fn fire(&mut self, event: Event) {
        events::dispatch(self, &event);
    }

    /// Dispatch and report whether the current lifecycle survived the
    /// handlers.
    fn fire_checked(&mut self, event: Event) -> bool {
        let generation = self.generation;
        self.fire(event);
        generation == self.generation
    }

    // -----------------------------------------------------------------------
    // Headers
    // -----------------------------------------------------------------------

    /// Add a request header. Forbidden names are logged and ignored.
    pub fn set_request_header(&mut self, name: &str, value: &str) -> Result<(), XhrError> {
        if self.ready_state != ReadyState::Opened {
            return Err(XhrError::InvalidState(
                "setRequestHeader can only be called when state is OPENED",
            ));
        }
        if !self.disable_header_check && is_forbidden_header(name) {
            warn!("refused to set unsafe header \"{name}\"");
            return Ok(());
        }
        if self.send_flag {
            return Err(XhrError::InvalidState("send has already been called"));
        }
        self.request_headers.append(name, value);
        Ok(())
    }

    pub fn get_request_header(&self, name: &str) -> Option<&str> {
        self.request_headers.get(name)
    }

    pub fn get_response_header(&self, name: &str) -> Option<&str> {
        if self.ready_state <= ReadyState::Opened || self.error_flag {
            return None;
        }
        self.response_headers.get(name)
    }

    /// `name: value` lines joined by CRLF, without cookie-setting headers.
    /// `None` before headers arrive or after a failure.
    pub fn get_all_response_headers(&self) -> Option<String> {
        if self.ready_state < ReadyState::HeadersReceived || self.error_flag {
            return None;
        }
        let mut out = String::new();
        for (name, value) in self.response_headers.iter() {
            if COOKIE_RESPONSE_HEADERS.iter().any(|c| c.eq_ignore_ascii_case(name)) {
                continue;
            }
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        if out.ends_with("\r\n") {
            out.truncate(out.len() - 2);
        }
        Some(out)
    }

    /// Back to the default set: `User-Agent` and `Accept` from the config,
    /// replaced by the caller's first explicit value.
    fn reset_request_headers(&mut self) {
        self.request_headers.clear();
        self.request_headers.seed_default("User-Agent", &self.config.user_agent);
        self.request_headers.seed_default("Accept", &self.config.accept);
    }

    fn set_response_headers(&mut self, headers: Vec<(String, String)>) {
        self.response_headers.clear();
        for (name, value) in headers {
            self.response_headers.append(&name.to_ascii_lowercase(), &value);
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Asynchronous `open` without credentials.
    pub fn open(&mut self, method: &str, url: &str) -> Result<(), XhrError> {
        self.open_with(method, url, true, None, None)
    }

    pub fn open_with(
        &mut self,
        method: &str,
        url: &str,
        asynchronous: bool,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<(), XhrError> {
        self.abort();
        self.error_flag = false;

        if !self.disable_header_check && is_forbidden_method(method) {
            return Err(XhrError::Security(format!("method {method} is not allowed")));
        }
        let url = parse_url(url)?;
        let method = normalize_method(method);
        debug!("open {method} {url} (async: {asynchronous})");

        self.settings = Some(Settings {
            method,
            url,
            asynchronous,
            user: user.map(str::to_string),
            password: password.map(str::to_string),
        });
        self.reset_request_headers();
        self.reset_response();
        self.set_state(ReadyState::Opened);
        Ok(())
    }

    pub fn send(&mut self, body: Option<&str>) -> Result<(), XhrError> {
        self.send_bytes(body.map(str::as_bytes).unwrap_or_default())
    }

    pub fn send_bytes(&mut self, body: &[u8]) -> Result<(), XhrError> {
        if self.ready_state != ReadyState::Opened {
            return Err(XhrError::InvalidState(
                "connection must be opened before send() is called",
            ));
        }
        let Some(settings) = self.settings.clone() else {
            return Err(XhrError::InvalidState("open() has not been called"));
        };
        if self.send_flag {
            return Err(XhrError::InvalidState("send has already been called"));
        }

        let target = prepare::prepare(
            &settings,
            &mut self.request_headers,
            body,
            &self.config,
            self.with_credentials,
        )?;
        self.error_flag = false;

        if !self.fire_checked(Event::new(EventKind::LoadStart)) {
            return Ok(());
        }

        match target {
            Target::File(path) => self.send_file(path, settings.asynchronous),
            Target::Http(request) if settings.asynchronous => self.send_async(request),
            Target::Http(request) => {
                self.send_sync(request);
                Ok(())
            }
        }
    }

    /// `None` when no timeout is set, or when it is too large to be a
    /// point in time.
    fn deadline(&self) -> Option<Instant> {
        if self.timeout.is_zero() {
            return None;
        }
        Instant::now().checked_add(self.timeout)
    }

    fn send_async(&mut self, request: TransportRequest) -> Result<(), XhrError> {
        self.send_flag = true;
        if !self.fire_checked(Event::new(EventKind::ReadyStateChange)) {
            return Ok(());
        }
        debug!("send {} {}", request.method, request.uri());
        let deadline = self.deadline();
        self.start_transport(request, 0, deadline);
        Ok(())
    }

    fn start_transport(&mut self, mut request: TransportRequest, redirects: u32, deadline: Option<Instant>) {
        request.timeout = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        let (sink, stream) = event_channel();
        match self.transport.request(request.clone(), sink) {
            Ok(handle) => {
                self.in_flight = Some(InFlight {
                    handle: Some(handle),
                    events: stream,
                    request: Some(request),
                    redirects,
                    deadline,
                });
            }
            Err(e) => self.handle_error(e.into(), EventKind::Error),
        }
    }

    fn send_sync(&mut self, mut request: TransportRequest) {
        let deadline = if self.timeout.is_zero() {
            self.config.sync_timeout()
        } else {
            Some(self.timeout)
        };
        request.timeout = deadline.filter(|limit| Instant::now().checked_add(*limit).is_some());
        debug!("send (sync) {} {}", request.method, request.uri());
        self.send_flag = true;

        let bridge = SyncBridge::new(
            Arc::clone(&self.transport),
            ArtifactStore::new(self.config.artifact_dir.clone()),
            self.config.poll_interval(),
        );
        match bridge.execute(request, deadline) {
            Ok(response) => {
                self.status = response.status;
                self.status_text = response.status_text;
                self.set_response_headers(response.headers);
                self.response = response.body;
                self.send_flag = false;
                self.set_state(ReadyState::Done);
            }
            Err(XhrError::Timeout) => self.handle_error(XhrError::Timeout, EventKind::Timeout),
            Err(e) => self.handle_error(e, EventKind::Error),
        }
    }

    fn send_file(&mut self, path: PathBuf, asynchronous: bool) -> Result<(), XhrError> {
        debug!("send file {}", path.display());
        if !asynchronous {
            match self.reader.read_all(&path) {
                Ok(bytes) => self.complete_file(bytes),
                Err(e) => self.handle_error(e.into(), EventKind::Error),
            }
            return Ok(());
        }

        let (sink, stream) = event_channel();
        let reader = Arc::clone(&self.reader);
        thread::Builder::new()
            .name("xhr-file".to_string())
            .spawn(move || {
                sink.file(reader.read_all(&path));
            })?;
        self.send_flag = true;
        self.in_flight = Some(InFlight {
            handle: None,
            events: stream,
            request: None,
            redirects: 0,
            deadline: self.deadline(),
        });
        Ok(())
    }

    fn complete_file(&mut self, bytes: Vec<u8>) {
        self.status = 200;
        self.status_text = "OK".to_string();
        self.response = bytes;
        self.send_flag = false;
        self.set_state(ReadyState::Done);
    }

    /// Cancel whatever is in flight and return to UNSENT.
    pub fn abort(&mut self) {
        self.generation += 1;
        self.release_in_flight(true);
        self.reset_request_headers();
        self.reset_response();
        self.error_flag = true;

        let mid_flight = self.ready_state != ReadyState::Unsent
            && (self.ready_state != ReadyState::Opened || self.send_flag)
            && self.ready_state != ReadyState::Done;
        if mid_flight {
            self.send_flag = false;
            self.set_state(ReadyState::Done);
        }
        self.ready_state = ReadyState::Unsent;
        self.send_flag = false;
        self.fire(Event::new(EventKind::Abort));
    }

    fn reset_response(&mut self) {
        self.status = 0;
        self.status_text.clear();
        self.response_headers.clear();
        self.response.clear();
    }

    fn release_in_flight(&mut self, cancel: bool) {
        if let Some(mut op) = self.in_flight.take() {
            if cancel {
                if let Some(handle) = op.handle.as_mut() {
                    handle.abort();
                }
            }
        }
    }

    /// Failure path shared by transport errors, file errors and timeouts.
    fn handle_error(&mut self, err: XhrError, kind: EventKind) {
        error!("request failed: {err}");
        self.release_in_flight(true);
        self.status = 0;
        self.status_text = err.to_string();
        self.response = err.diagnostics().into_bytes();
        self.error_flag = true;
        self.send_flag = false;

        if !self.fire_checked(Event::with_detail(kind, err.to_string())) {
            return;
        }
        self.set_state(ReadyState::Done);
    }

    fn set_state(&mut self, state: ReadyState) {
        if self.ready_state == state && state != ReadyState::Loading {
            return;
        }
        debug!("readyState {} -> {state}", self.ready_state);
        self.ready_state = state;

        let asynchronous = self.settings.as_ref().map_or(true, |s| s.asynchronous);
        let generation = self.generation;
        if asynchronous || state < ReadyState::Opened || state == ReadyState::Done {
            self.fire(Event::new(EventKind::ReadyStateChange));
        }
        if state == ReadyState::Done {
            if !self.error_flag && generation == self.generation {
                self.fire(Event::new(EventKind::Load));
            }
            self.fire(Event::new(EventKind::LoadEnd));
        }
    }

    // -----------------------------------------------------------------------
    // Event loop
    // -----------------------------------------------------------------------

    /// Apply every delivery already queued, and fire the timeout if its
    /// deadline passed. Never blocks.
    pub fn poll(&mut self) -> Result<(), XhrError> {
        loop {
            let step = match &self.in_flight {
                None => return Ok(()),
                Some(op) if op.deadline.is_some_and(|d| Instant::now() >= d) => Step::TimedOut,
                Some(op) => match op.events.receiver().try_recv() {
                    Ok(delivery) => Step::Deliver(delivery),
                    Err(TryRecvError::Empty) => return Ok(()),
                    Err(TryRecvError::Disconnected) => Step::Closed,
                },
            };
            self.step(step)?;
        }
    }

    /// Block until nothing is in flight: DONE, aborted, or failed.
    pub fn wait(&mut self) -> Result<(), XhrError> {
        loop {
            let step = match &self.in_flight {
                None => return Ok(()),
                Some(op) => match op.deadline {
                    Some(deadline) => {
                        let left = deadline.saturating_duration_since(Instant::now());
                        match op.events.receiver().recv_timeout(left) {
                            Ok(delivery) => Step::Deliver(delivery),
                            Err(RecvTimeoutError::Timeout) => Step::TimedOut,
                            Err(RecvTimeoutError::Disconnected) => Step::Closed,
                        }
                    }
                    None => match op.events.receiver().recv() {
                        Ok(delivery) => Step::Deliver(delivery),
                        Err(_) => Step::Closed,
                    },
                },
            };
            self.step(step)?;
        }
    }

    fn step(&mut self, step: Step) -> Result<(), XhrError> {
        match step {
            Step::TimedOut => self.handle_error(XhrError::Timeout, EventKind::Timeout),
            Step::Closed => self.handle_error(
                TransportError::new("transport closed before the response ended").into(),
                EventKind::Error,
            ),
            Step::Deliver(Delivery::File(Ok(bytes))) => {
                self.release_in_flight(false);
                self.complete_file(bytes);
            }
            Step::Deliver(Delivery::File(Err(e))) => self.handle_error(e.into(), EventKind::Error),
            Step::Deliver(Delivery::Transport(event)) => return self.on_transport_event(event),
        }
        Ok(())
    }

    fn on_transport_event(&mut self, event: TransportEvent) -> Result<(), XhrError> {
        match event {
            TransportEvent::Head {
                status,
                status_text,
                headers,
            } => {
                if matches!(status, 301 | 302 | 303 | 307) {
                    let location = headers
                        .iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case("location"))
                        .map(|(_, v)| v.clone());
                    if let Some(location) = location {
                        return self.follow_redirect(status, &location);
                    }
                }
                self.status = status;
                self.status_text = status_text;
                self.set_response_headers(headers);
                self.set_state(ReadyState::HeadersReceived);
            }
            TransportEvent::Data(chunk) => {
                self.response.extend_from_slice(&chunk);
                if self.send_flag {
                    self.set_state(ReadyState::Loading);
                }
            }
            TransportEvent::End => {
                if self.send_flag {
                    self.release_in_flight(false);
                    self.send_flag = false;
                    self.set_state(ReadyState::Done);
                }
            }
            TransportEvent::Error(e) => self.handle_error(e.into(), EventKind::Error),
        }
        Ok(())
    }

    /// Re-issue the request to `location` without surfacing the hop.
    fn follow_redirect(&mut self, status: u16, location: &str) -> Result<(), XhrError> {
        let Some(mut op) = self.in_flight.take() else {
            return Ok(());
        };
        if let Some(handle) = op.handle.as_mut() {
            handle.abort();
        }
        let Some(previous) = op.request.take() else {
            return Ok(());
        };

        let redirects = op.redirects + 1;
        if redirects > self.config.max_redirects {
            warn!("giving up after {} redirects", self.config.max_redirects);
            self.send_flag = false;
            self.error_flag = true;
            return Err(XhrError::TooManyRedirects {
                limit: self.config.max_redirects,
            });
        }

        let current = match &self.settings {
            Some(settings) => settings.url.clone(),
            None => return Ok(()),
        };
        let next = match current.join(location) {
            Ok(url) => url,
            Err(e) => {
                self.handle_error(e.into(), EventKind::Error);
                return Ok(());
            }
        };
        let request = match prepare::redirect(&previous, status, &next) {
            Ok(request) => request,
            Err(e) => {
                self.handle_error(e, EventKind::Error);
                return Ok(());
            }
        };

        debug!("redirect {redirects}: {status} -> {next}");
        if let Some(settings) = self.settings.as_mut() {
            settings.url = next;
        }
        self.start_transport(request, redirects, op.deadline);
        Ok(())
    }
}

impl Default for XmlHttpRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for XmlHttpRequest {
    fn drop(&mut self) {
        self.release_in_flight(true);
    }
}

impl EventOwner for XmlHttpRequest {
    fn event_target(&self) -> &EventTarget<Self> {
        &self.events
    }
}

impl fmt::Debug for XmlHttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XmlHttpRequest")
            .field("settings", &self.settings)
            .field("ready_state", &self.ready_state)
            .field("status", &self.status)
            .field("send_flag", &self.send_flag)
            .field("error_flag", &self.error_flag)
            .field("in_flight", &self.in_flight.is_some())
            .finish_non_exhaustive()
    }
}
