//! Local HTTP fixture server for exercising `xhr-core` end to end.
//!
//! # Routes
//! - `ANY /echo`: reflects method, path, headers and body as JSON.
//! - `GET /redirect/{n}`: 302 to `/redirect/{n-1}`; `/redirect/0` answers 200.
//! - `ANY /see-other`: 303 to `/echo`.
//! - `ANY /temporary`: 307 to `/echo`.
//! - `GET /slow/{ms}`: answers after `ms` milliseconds.
//! - `GET /cookies`: sets cookies next to an ordinary header.
//! - `GET /status/{code}`: answers with the given status.
//! - `GET /hits`: number of requests served so far.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

/// What `/echo` saw.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Echo {
    pub method: String,
    pub path: String,
    /// Lower-cased names; repeated headers joined with `", "`.
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

pub type Hits = Arc<AtomicU64>;

pub fn app() -> Router {
    let hits: Hits = Arc::new(AtomicU64::new(0));
    Router::new()
        .route("/echo", any(echo))
        .route("/redirect/{n}", get(redirect_chain))
        .route("/see-other", any(see_other))
        .route("/temporary", any(temporary))
        .route("/slow/{ms}", get(slow))
        .route("/cookies", get(cookies))
        .route("/status/{code}", get(status))
        .route("/hits", get(hit_count))
        .with_state(hits)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        info!("mock server listening on {addr}");
    }
    axum::serve(listener, app()).await
}

fn count(hits: &Hits) {
    hits.fetch_add(1, Ordering::Relaxed);
}

async fn echo(
    State(hits): State<Hits>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Json<Echo> {
    count(&hits);
    debug!("echo {method} {uri}");
    let mut seen: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in &headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        seen.entry(name.as_str().to_string())
            .and_modify(|v| {
                v.push_str(", ");
                v.push_str(&value);
            })
            .or_insert(value);
    }
    Json(Echo {
        method: method.to_string(),
        path: uri.path().to_string(),
        headers: seen,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

fn redirect(status: StatusCode, location: &str) -> Response {
    (status, [(header::LOCATION, location.to_string())]).into_response()
}

async fn redirect_chain(State(hits): State<Hits>, Path(n): Path<u32>) -> Response {
    count(&hits);
    if n == 0 {
        return (StatusCode::OK, "done").into_response();
    }
    redirect(StatusCode::FOUND, &format!("/redirect/{}", n - 1))
}

async fn see_other(State(hits): State<Hits>) -> Response {
    count(&hits);
    redirect(StatusCode::SEE_OTHER, "/echo")
}

async fn temporary(State(hits): State<Hits>) -> Response {
    count(&hits);
    redirect(StatusCode::TEMPORARY_REDIRECT, "/echo")
}

async fn slow(State(hits): State<Hits>, Path(ms): Path<u64>) -> &'static str {
    count(&hits);
    tokio::time::sleep(Duration::from_millis(ms)).await;
    "slow"
}

async fn cookies(State(hits): State<Hits>) -> Response {
    count(&hits);
    (
        [
            (header::SET_COOKIE, "session=abc"),
            (header::HeaderName::from_static("set-cookie2"), "legacy=1"),
            (header::HeaderName::from_static("x-custom"), "visible"),
        ],
        "cookies",
    )
        .into_response()
}

async fn status(State(hits): State<Hits>, Path(code): Path<u16>) -> Result<Response, StatusCode> {
    count(&hits);
    let status = StatusCode::from_u16(code).map_err(|_| StatusCode::BAD_REQUEST)?;
    let reason = status.canonical_reason().unwrap_or("");
    Ok((status, reason.to_string()).into_response())
}

async fn hit_count(State(hits): State<Hits>) -> String {
    hits.load(Ordering::Relaxed).to_string()
}
