// src/probe.rs

use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

/// Failure to learn the resource's metadata. Fatal for a session.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("network error probing {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("timed out probing {url}")]
    Timeout { url: String },
    #[error("HTTP {status} probing {url}")]
    Status { url: String, status: u16 },
}

/// What the server told us about the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    /// `None` when no usable `Content-Length` came back.
    pub total_size: Option<u64>,
    /// True only when the server advertised `Accept-Ranges: bytes`.
    pub range_supported: bool,
}

/// Issue a `HEAD` request for `url` and read size and range support.
#[instrument(skip(client), fields(url = %url))]
pub async fn probe(client: &Client, url: &str, timeout: Duration) -> Result<ProbeResult, ProbeError> {
    let resp = client
        .head(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|source| {
            if source.is_timeout() {
                ProbeError::Timeout { url: url.to_string() }
            } else {
                ProbeError::Network {
                    url: url.to_string(),
                    source,
                }
            }
        })?;

    let status = resp.status();
    if !status.is_success() {
        return Err(ProbeError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let total_size = resp
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|&size| size > 0);

    let range_supported = resp
        .headers()
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|unit| unit.trim().eq_ignore_ascii_case("bytes")));

    debug!(?total_size, range_supported, "probe finished");
    Ok(ProbeResult {
        total_size,
        range_supported,
    })
}
