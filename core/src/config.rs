//! Tunables for a request object.
//!
//! Every field has a default, so a JSON document only needs the keys it
//! overrides.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::XhrError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Redirect hops followed per send before giving up.
    pub max_redirects: u32,
    /// Default `User-Agent` when the caller sets none.
    pub user_agent: String,
    /// Default `Accept` when the caller sets none.
    pub accept: String,
    /// Deadline for synchronous sends when the request timeout is 0.
    /// `None` waits for as long as the worker takes.
    pub sync_timeout_ms: Option<u64>,
    /// Where the sync bridge writes completion artifacts.
    pub artifact_dir: PathBuf,
    /// How often workers check for cancellation.
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_redirects: 10,
            user_agent: concat!("xhr-core/", env!("CARGO_PKG_VERSION")).to_string(),
            accept: "*/*".to_string(),
            sync_timeout_ms: None,
            artifact_dir: std::env::temp_dir(),
            poll_interval_ms: 20,
        }
    }
}

impl Config {
    pub fn from_json(raw: &str) -> Result<Self, XhrError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn sync_timeout(&self) -> Option<Duration> {
        self.sync_timeout_ms.map(Duration::from_millis)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
