//! Request lifecycle types.
//!
//! # Design
//! `ReadyState` mirrors the five XHR phases and orders by its numeric value,
//! so "state before OPENED" comparisons read the same as in the XHR
//! algorithm. `Settings` is captured by `open` and is immutable for the
//! rest of the send except `url`, which is rewritten on each redirect hop.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// Lifecycle phase of one request object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum ReadyState {
    Unsent = 0,
    Opened = 1,
    HeadersReceived = 2,
    Loading = 3,
    Done = 4,
}

impl ReadyState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl From<ReadyState> for u8 {
    fn from(state: ReadyState) -> u8 {
        state.as_u8()
    }
}

impl TryFrom<u8> for ReadyState {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ReadyState::Unsent),
            1 => Ok(ReadyState::Opened),
            2 => Ok(ReadyState::HeadersReceived),
            3 => Ok(ReadyState::Loading),
            4 => Ok(ReadyState::Done),
            other => Err(format!("invalid ready state {other}")),
        }
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReadyState::Unsent => "UNSENT",
            ReadyState::Opened => "OPENED",
            ReadyState::HeadersReceived => "HEADERS_RECEIVED",
            ReadyState::Loading => "LOADING",
            ReadyState::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// Parameters recorded by `open`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub method: String,
    pub url: Url,
    pub asynchronous: bool,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// Upper-case the methods the Fetch standard normalizes; leave others as
/// given.
pub fn normalize_method(method: &str) -> String {
    const NORMALIZED: &[&str] = &["DELETE", "GET", "HEAD", "OPTIONS", "POST", "PUT"];
    NORMALIZED
        .iter()
        .find(|m| m.eq_ignore_ascii_case(method))
        .map(|m| m.to_string())
        .unwrap_or_else(|| method.to_string())
}
