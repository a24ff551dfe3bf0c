// src/options.rs

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Fewest workers a session will run.
pub const MIN_THREADS: usize = 1;
/// Most workers a session will run.
pub const MAX_THREADS: usize = 8;
pub const DEFAULT_THREADS: usize = 4;

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;
/// Write buffer per worker, also the pause/cancel polling granularity.
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;
pub const DEFAULT_REPORT_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Tunables for a download session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadOptions {
    /// Requested number of concurrent segments.
    pub threads: usize,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub buffer_size: usize,
    pub report_interval_ms: u64,
    pub user_agent: String,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            buffer_size: DEFAULT_BUFFER_SIZE,
            report_interval_ms: DEFAULT_REPORT_INTERVAL_MS,
            user_agent: concat!("segfetch/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl DownloadOptions {
    /// Load options from a JSON file. Missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Requested thread count clamped to `MIN_THREADS..=MAX_THREADS`.
    pub fn effective_threads(&self) -> usize {
        self.threads.clamp(MIN_THREADS, MAX_THREADS)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms.max(1))
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size.max(1)
    }
}
