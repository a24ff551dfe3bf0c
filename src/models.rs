// src/models.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

/// One planned byte range of the remote resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub start: u64,
    /// Inclusive end offset. `None` marks the single unbounded chunk used
    /// when the size is unknown or the server does not serve ranges.
    pub end: Option<u64>,
    pub segment_path: PathBuf,
}

impl Chunk {
    /// Number of bytes covered by the chunk, if it is bounded.
    pub fn span(&self) -> Option<u64> {
        self.end.map(|end| end - self.start + 1)
    }

    pub fn is_bounded(&self) -> bool {
        self.end.is_some()
    }

    /// Whether a segment of `len` bytes already holds the whole chunk.
    pub fn is_covered_by(&self, len: u64) -> bool {
        matches!(self.span(), Some(span) if len >= span)
    }

    /// `Range` header value for the bytes still missing after `existing`.
    pub fn range_header(&self, existing: u64) -> Option<String> {
        self.end
            .map(|end| format!("bytes={}-{}", self.start + existing, end))
    }
}

/// A planned chunk together with its completion flag.
///
/// The flag is set only by the owning worker, after its write loop has
/// ended with the full range on disk.
#[derive(Debug)]
pub struct ChunkSlot {
    pub chunk: Chunk,
    complete: AtomicBool,
}

impl ChunkSlot {
    pub fn new(chunk: Chunk) -> Self {
        Self {
            chunk,
            complete: AtomicBool::new(false),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::SeqCst)
    }

    pub fn mark_complete(&self) {
        self.set_complete(true);
    }

    pub fn set_complete(&self, complete: bool) {
        self.complete.store(complete, Ordering::SeqCst);
    }
}

/// Lifecycle of a download session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionState {
    Planning,
    Downloading,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Cancelled | SessionState::Failed
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Planning => "Planning",
            SessionState::Downloading => "Downloading",
            SessionState::Paused => "Paused",
            SessionState::Completed => "Completed",
            SessionState::Cancelled => "Cancelled",
            SessionState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Record of one transfer, owned by the session controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSession {
    pub url: String,
    pub destination: PathBuf,
    /// Worker count in effect; requested count until planning has run.
    pub workers: usize,
    /// `None` when the server did not report a length.
    pub total_size: Option<u64>,
    pub created_at: SystemTime,
    pub state: SessionState,
}

impl DownloadSession {
    pub fn new(url: String, destination: PathBuf, workers: usize) -> Self {
        Self {
            url,
            destination,
            workers,
            total_size: None,
            created_at: SystemTime::now(),
            state: SessionState::Planning,
        }
    }
}

/// Point-in-time view of transfer progress. Derived, never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub downloaded: u64,
    pub total: Option<u64>,
    pub elapsed: Duration,
    /// Bytes per second over the last sampling period.
    pub speed: f64,
}

impl ProgressSnapshot {
    pub fn percentage(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => Some(self.downloaded as f64 / total as f64 * 100.0),
            _ => None,
        }
    }

    /// Estimated time left; `None` while the size is unknown or nothing is flowing.
    pub fn eta(&self) -> Option<Duration> {
        let total = self.total?;
        if self.speed <= 0.0 {
            return None;
        }
        let remaining = total.saturating_sub(self.downloaded);
        Some(Duration::from_secs_f64(remaining as f64 / self.speed))
    }
}

/// What `SessionController::status` hands back to callers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub percentage: Option<f64>,
    pub state: SessionState,
}

impl StatusReport {
    pub fn new(downloaded_bytes: u64, total_bytes: Option<u64>, state: SessionState) -> Self {
        let percentage = match total_bytes {
            Some(total) if total > 0 => Some(downloaded_bytes as f64 / total as f64 * 100.0),
            _ => None,
        };
        Self {
            downloaded_bytes,
            total_bytes,
            percentage,
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(start: u64, end: Option<u64>) -> Chunk {
        Chunk {
            index: 0,
            start,
            end,
            segment_path: PathBuf::from("file.bin.part0"),
        }
    }

    #[test]
    fn bounded_chunk_reports_span_and_remaining_range() {
        let c = chunk(250_000, Some(499_999));
        assert_eq!(c.span(), Some(250_000));
        assert_eq!(c.range_header(0).as_deref(), Some("bytes=250000-499999"));
        assert_eq!(c.range_header(100_000).as_deref(), Some("bytes=350000-499999"));
        assert!(!c.is_covered_by(249_999));
        assert!(c.is_covered_by(250_000));
    }

    #[test]
    fn unbounded_chunk_is_never_covered() {
        let c = chunk(0, None);
        assert_eq!(c.span(), None);
        assert_eq!(c.range_header(10), None);
        assert!(!c.is_covered_by(u64::MAX));
    }

    #[test]
    fn slot_completion_can_be_withdrawn() {
        let slot = ChunkSlot::new(chunk(0, Some(9)));
        assert!(!slot.is_complete());
        slot.mark_complete();
        assert!(slot.is_complete());
        slot.set_complete(false);
        assert!(!slot.is_complete());
    }

    #[test]
    fn terminal_states() {
        assert!(SessionState::Completed.is_terminal());
        assert!(SessionState::Cancelled.is_terminal());
        assert!(SessionState::Failed.is_terminal());
        assert!(!SessionState::Paused.is_terminal());
        assert!(!SessionState::Downloading.is_terminal());
        assert!(!SessionState::Planning.is_terminal());
    }

    #[test]
    fn snapshot_eta_needs_size_and_speed() {
        let mut snap = ProgressSnapshot {
            downloaded: 500,
            total: Some(1_500),
            elapsed: Duration::from_secs(5),
            speed: 100.0,
        };
        assert_eq!(snap.percentage().map(|p| p.round()), Some(33.0));
        assert_eq!(snap.eta(), Some(Duration::from_secs(10)));

        snap.speed = 0.0;
        assert_eq!(snap.eta(), None);

        snap.total = None;
        snap.speed = 100.0;
        assert_eq!(snap.percentage(), None);
        assert_eq!(snap.eta(), None);
    }

    #[test]
    fn status_report_percentage_only_with_known_size() {
        let report = StatusReport::new(1_000_000, Some(1_000_000), SessionState::Completed);
        assert_eq!(report.percentage, Some(100.0));

        let report = StatusReport::new(42, None, SessionState::Downloading);
        assert_eq!(report.percentage, None);
    }
}
