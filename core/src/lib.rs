//! XMLHttpRequest-style HTTP client core.
//!
//! # Overview
//! `XmlHttpRequest` drives the browser request lifecycle (UNSENT, OPENED,
//! HEADERS_RECEIVED, LOADING, DONE) with its event model, redirect
//! following, timeouts, abort and synchronous mode. The network and the
//! filesystem sit behind the `Transport` and `FileReader` traits, so the
//! state machine is deterministic under test and any HTTP stack can be
//! plugged in. `UreqTransport` and `FsReader` are the defaults.
//!
//! # Design
//! - The request object is single-threaded. Collaborators deliver into a
//!   channel and the owner applies deliveries from `poll`/`wait`.
//! - Header policy (forbidden names, defaults, `Host`, auth, length) lives
//!   in `prepare`, apart from the state machine.
//! - Synchronous sends run on a worker through `SyncBridge` and hand the
//!   response back as a JSON artifact.
//! - Caller contract violations are `Err`; network failures go through the
//!   error event path.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod headers;
pub mod http;
pub mod prepare;
pub mod sync_bridge;
pub mod transport;
pub mod types;

pub use client::{XhrListener, XmlHttpRequest};
pub use config::Config;
pub use error::{TransportError, XhrError};
pub use events::{listener, Event, EventKind};
pub use http::{event_channel, EventSink, EventStream, Transport, TransportEvent, TransportHandle, TransportRequest};
pub use transport::{FileReader, FsReader, UreqTransport};
pub use types::ReadyState;
