//! Blocking sends on top of the asynchronous `Transport`.
//!
//! # Design
//! A synchronous send runs the whole request on a dedicated worker thread.
//! The worker accumulates status, headers and body, writes them as a JSON
//! completion artifact (body base64-encoded) into the configured directory
//! under a per-invocation UUID name, then signals the caller over a channel.
//! The caller blocks on that channel with a timed wait instead of polling
//! the filesystem. On timeout it raises the cancel flag; the worker aborts
//! its transport handle within one poll interval and exits. The caller
//! always joins the worker before returning, and the artifact guard removes
//! the file on every path.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{TransportError, XhrError};
use crate::http::{event_channel, Delivery, Transport, TransportEvent, TransportRequest};

/// Hands out uniquely named artifact paths inside one directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn allocate(&self) -> Artifact {
        let id = Uuid::new_v4();
        Artifact {
            id,
            path: self.dir.join(format!(".xhr-sync-{id}.json")),
        }
    }
}

/// A completion artifact location; the file is removed on drop.
#[derive(Debug)]
pub struct Artifact {
    id: Uuid,
    path: PathBuf,
}

impl Artifact {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Artifact {
    fn drop(&mut self) {
        remove_quietly(&self.path);
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            warn!("failed to remove sync artifact {}: {e}", path.display());
        }
    }
}

/// What the worker writes once the request finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub id: Uuid,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Response(SyncResponse),
    Error { message: String },
}

/// A fully received response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    #[serde(with = "base64_body")]
    pub body: Vec<u8>,
}

mod base64_body {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Runs one request to completion while the caller blocks.
pub struct SyncBridge {
    transport: Arc<dyn Transport>,
    store: ArtifactStore,
    poll_interval: Duration,
}

impl SyncBridge {
    pub fn new(transport: Arc<dyn Transport>, store: ArtifactStore, poll_interval: Duration) -> Self {
        Self {
            transport,
            store,
            poll_interval,
        }
    }

    /// Perform `request`, blocking for at most `deadline` (forever if
    /// `None`). Transport failures come back as `XhrError::Transport`,
    /// an expired deadline as `XhrError::Timeout`.
    pub fn execute(
        &self,
        request: TransportRequest,
        deadline: Option<Duration>,
    ) -> Result<SyncResponse, XhrError> {
        let artifact = self.store.allocate();
        let id = artifact.id();
        let path = artifact.path().to_path_buf();
        let cancel = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let worker = {
            let cancel = Arc::clone(&cancel);
            let transport = Arc::clone(&self.transport);
            let poll = self.poll_interval;
            thread::Builder::new()
                .name("xhr-sync".to_string())
                .spawn(move || {
                    let Some(outcome) = collect(transport.as_ref(), request, &cancel, poll) else {
                        return;
                    };
                    let completion = Completion { id, outcome };
                    if let Err(e) = write_artifact(&path, &completion) {
                        error!("failed to write sync artifact {}: {e}", path.display());
                        return;
                    }
                    if cancel.load(Ordering::Acquire) {
                        remove_quietly(&path);
                        return;
                    }
                    let _ = done_tx.send(());
                })?
        };
        debug!("sync request {id} started");

        let signal = match deadline {
            Some(limit) => done_rx.recv_timeout(limit),
            None => done_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        if signal.is_err() {
            cancel.store(true, Ordering::Release);
        }
        if worker.join().is_err() {
            return Err(XhrError::Bridge(format!("sync worker {id} panicked")));
        }

        match signal {
            Ok(()) => {
                let completion = read_artifact(artifact.path())?;
                if completion.id != id {
                    return Err(XhrError::Bridge(format!(
                        "artifact id mismatch: expected {id}, found {}",
                        completion.id
                    )));
                }
                match completion.outcome {
                    Outcome::Response(response) => Ok(response),
                    Outcome::Error { message } => Err(TransportError::new(message).into()),
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                debug!("sync request {id} timed out");
                Err(XhrError::Timeout)
            }
            Err(RecvTimeoutError::Disconnected) => Err(XhrError::Bridge(format!(
                "sync worker {id} exited without a completion"
            ))),
        }
    }
}

/// Drive the transport until the response is complete. `None` means the
/// caller cancelled.
fn collect(
    transport: &dyn Transport,
    request: TransportRequest,
    cancel: &AtomicBool,
    poll: Duration,
) -> Option<Outcome> {
    let (sink, stream) = event_channel();
    let mut handle = match transport.request(request, sink) {
        Ok(handle) => handle,
        Err(e) => return Some(Outcome::Error { message: e.message }),
    };

    let mut head: Option<(u16, String, Vec<(String, String)>)> = None;
    let mut body = Vec::new();
    loop {
        if cancel.load(Ordering::Acquire) {
            handle.abort();
            return None;
        }
        match stream.receiver().recv_timeout(poll) {
            Ok(Delivery::Transport(TransportEvent::Head {
                status,
                status_text,
                headers,
            })) => head = Some((status, status_text, headers)),
            Ok(Delivery::Transport(TransportEvent::Data(chunk))) => body.extend_from_slice(&chunk),
            Ok(Delivery::Transport(TransportEvent::End)) => break,
            Ok(Delivery::Transport(TransportEvent::Error(e))) => {
                return Some(Outcome::Error { message: e.message })
            }
            Ok(Delivery::File(_)) | Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                return Some(Outcome::Error {
                    message: "transport closed before the response ended".to_string(),
                })
            }
        }
    }

    Some(match head {
        Some((status, status_text, headers)) => Outcome::Response(SyncResponse {
            status,
            status_text,
            headers,
            body,
        }),
        None => Outcome::Error {
            message: "response ended without headers".to_string(),
        },
    })
}

fn write_artifact(path: &Path, completion: &Completion) -> Result<(), XhrError> {
    let json = serde_json::to_vec(completion)?;
    fs::write(path, json)?;
    Ok(())
}

fn read_artifact(path: &Path) -> Result<Completion, XhrError> {
    let raw = fs::read(path)?;
    Ok(serde_json::from_slice(&raw)?)
}
