// src/downloader.rs

use crate::models::Chunk;
use crate::progress::ProgressAggregator;
use crate::segment::SegmentStore;
use futures_util::StreamExt;
use reqwest::{Client, Response, StatusCode};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Failure of a single chunk fetch. Siblings keep running.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("network error on chunk {index}: {source}")]
    Network {
        index: usize,
        #[source]
        source: reqwest::Error,
    },
    #[error("HTTP {status} on chunk {index}")]
    Status { index: usize, status: u16 },
    #[error("server ignored the range request for chunk {index}")]
    RangeIgnored { index: usize },
    #[error("read timed out on chunk {index}")]
    Timeout { index: usize },
    #[error("io error on segment {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("chunk {index} ended early: expected {expected} bytes, got {received}")]
    Truncated {
        index: usize,
        expected: u64,
        received: u64,
    },
}

/// How a worker run ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// The segment now holds the whole chunk.
    Completed,
    /// Pause or cancel was observed; the segment keeps what was flushed.
    Interrupted,
}

/// Fetches chunks of one resource into their segments.
///
/// Shared by every worker task of a session; `run` is the per-chunk body.
#[derive(Debug, Clone)]
pub struct DownloadWorker {
    client: Client,
    url: Arc<str>,
    total_size: Option<u64>,
    store: SegmentStore,
    progress: Arc<ProgressAggregator>,
    buffer_size: usize,
    read_timeout: Duration,
}

impl DownloadWorker {
    pub fn new(
        client: Client,
        url: &str,
        total_size: Option<u64>,
        store: SegmentStore,
        progress: Arc<ProgressAggregator>,
        buffer_size: usize,
        read_timeout: Duration,
    ) -> Self {
        Self {
            client,
            url: Arc::from(url),
            total_size,
            store,
            progress,
            buffer_size,
            read_timeout,
        }
    }

    /// Download the missing tail of `chunk` into its segment.
    ///
    /// `cancel` is checked before every read and every write; once it fires
    /// the buffered bytes are flushed and the worker returns `Interrupted`.
    #[instrument(skip(self, chunk, cancel), fields(chunk = chunk.index))]
    pub async fn run(
        &self,
        chunk: &Chunk,
        cancel: &CancellationToken,
    ) -> Result<WorkerOutcome, WorkerError> {
        let index = chunk.index;
        let existing = self
            .store
            .existing_length(chunk)
            .await
            .map_err(|source| self.io_error(chunk, source))?;

        if chunk.is_covered_by(existing) {
            debug!(existing, "segment already complete");
            return Ok(WorkerOutcome::Completed);
        }
        if cancel.is_cancelled() {
            return Ok(WorkerOutcome::Interrupted);
        }

        let mut request = self.client.get(&*self.url);
        if let Some(range) = chunk.range_header(existing) {
            debug!(%range, "requesting range");
            request = request.header(reqwest::header::RANGE, range);
        }

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(WorkerOutcome::Interrupted),
            sent = tokio::time::timeout(self.read_timeout, request.send()) => sent,
        };
        let resp = match sent {
            Err(_) => return Err(WorkerError::Timeout { index }),
            Ok(Err(source)) if source.is_timeout() => return Err(WorkerError::Timeout { index }),
            Ok(Err(source)) => return Err(WorkerError::Network { index, source }),
            Ok(Ok(resp)) => resp,
        };

        let status = resp.status();
        if !status.is_success() {
            return Err(WorkerError::Status {
                index,
                status: status.as_u16(),
            });
        }
        if chunk.is_bounded()
            && status != StatusCode::PARTIAL_CONTENT
            && !self.is_whole_resource(chunk, existing)
        {
            return Err(WorkerError::RangeIgnored { index });
        }

        let file = self
            .store
            .open_for_append(chunk)
            .await
            .map_err(|source| self.io_error(chunk, source))?;
        let mut writer = BufWriter::with_capacity(self.buffer_size, file);
        let remaining = chunk.span().map(|span| span - existing);

        let streamed = self
            .stream_body(chunk, resp, &mut writer, remaining, cancel)
            .await;
        // Flush on every exit path so the segment length is the resume point.
        let flushed = writer
            .flush()
            .await
            .map_err(|source| self.io_error(chunk, source));
        let (outcome, written) = streamed?;
        flushed?;

        if outcome == WorkerOutcome::Completed {
            if let Some(expected) = remaining {
                if written < expected {
                    return Err(WorkerError::Truncated {
                        index,
                        expected,
                        received: written,
                    });
                }
            }
            debug!(written, "chunk finished");
        }
        Ok(outcome)
    }

    async fn stream_body(
        &self,
        chunk: &Chunk,
        resp: Response,
        writer: &mut BufWriter<File>,
        remaining: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<(WorkerOutcome, u64), WorkerError> {
        let index = chunk.index;
        let mut written = 0u64;
        let mut stream = resp.bytes_stream();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok((WorkerOutcome::Interrupted, written)),
                next = tokio::time::timeout(self.read_timeout, stream.next()) => next,
            };
            let bytes = match next {
                Err(_) => return Err(WorkerError::Timeout { index }),
                Ok(None) => break,
                Ok(Some(Err(source))) => return Err(WorkerError::Network { index, source }),
                Ok(Some(Ok(bytes))) => bytes,
            };

            // Never write past the end of a bounded chunk.
            let take = match remaining {
                Some(limit) => (limit - written).min(bytes.len() as u64) as usize,
                None => bytes.len(),
            };
            if cancel.is_cancelled() {
                return Ok((WorkerOutcome::Interrupted, written));
            }
            writer
                .write_all(&bytes[..take])
                .await
                .map_err(|source| self.io_error(chunk, source))?;
            written += take as u64;
            self.progress.record(take as u64);

            if remaining == Some(written) {
                break;
            }
        }
        Ok((WorkerOutcome::Completed, written))
    }

    /// A plain `200` is acceptable for a range request only when the range
    /// asked for is the entire resource.
    fn is_whole_resource(&self, chunk: &Chunk, existing: u64) -> bool {
        chunk.start + existing == 0
            && matches!((chunk.end, self.total_size), (Some(end), Some(total)) if end + 1 == total)
    }

    fn io_error(&self, chunk: &Chunk, source: std::io::Error) -> WorkerError {
        WorkerError::Io {
            path: chunk.segment_path.clone(),
            source,
        }
    }
}
