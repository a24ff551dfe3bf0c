// src/progress.rs

use crate::models::{ProgressSnapshot, SessionState};
use crate::util::{format_bytes, format_duration};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const BAR_WIDTH: usize = 30;

/// Receives progress from the engine. Every method defaults to a no-op so
/// a front end only implements what it renders.
pub trait ProgressSink: Send + Sync {
    /// Called by workers after each write to a segment.
    fn on_progress(&self, _bytes_delta: u64) {}

    /// Called by the reporter once per interval while downloading.
    fn on_snapshot(&self, _snapshot: &ProgressSnapshot) {}

    fn on_state(&self, _state: SessionState) {}
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ProgressSink for NoopSink {}

/// Shared byte counter. Workers only ever add to it.
pub struct ProgressAggregator {
    downloaded: AtomicU64,
    sink: Arc<dyn ProgressSink>,
}

impl ProgressAggregator {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            downloaded: AtomicU64::new(0),
            sink,
        }
    }

    pub fn record(&self, bytes: u64) {
        self.downloaded.fetch_add(bytes, Ordering::SeqCst);
        self.sink.on_progress(bytes);
    }

    pub fn downloaded(&self) -> u64 {
        self.downloaded.load(Ordering::SeqCst)
    }

    /// Reset the counter to the bytes already on disk. Only called while no
    /// worker is running, before a run starts.
    pub fn rebase(&self, bytes_on_disk: u64) {
        self.downloaded.store(bytes_on_disk, Ordering::SeqCst);
    }

    pub fn sink(&self) -> &Arc<dyn ProgressSink> {
        &self.sink
    }
}

impl std::fmt::Debug for ProgressAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressAggregator")
            .field("downloaded", &self.downloaded())
            .finish_non_exhaustive()
    }
}

/// Turns successive counter readings into snapshots.
#[derive(Debug)]
pub struct Sampler {
    total: Option<u64>,
    started_at: Instant,
    last_bytes: u64,
    last_at: Instant,
}

impl Sampler {
    pub fn new(total: Option<u64>, downloaded: u64, now: Instant) -> Self {
        Self {
            total,
            started_at: now,
            last_bytes: downloaded,
            last_at: now,
        }
    }

    pub fn sample(&mut self, downloaded: u64, now: Instant) -> ProgressSnapshot {
        let delta_bytes = downloaded.saturating_sub(self.last_bytes);
        let delta_time = now.saturating_duration_since(self.last_at).as_secs_f64();
        let speed = if delta_time > 0.0 {
            delta_bytes as f64 / delta_time
        } else {
            0.0
        };
        self.last_bytes = downloaded;
        self.last_at = now;

        ProgressSnapshot {
            downloaded,
            total: self.total,
            elapsed: now.saturating_duration_since(self.started_at),
            speed,
        }
    }
}

/// Spawn the periodic reporter. It samples the counter every `interval`
/// and hands the snapshot to the sink until `token` is cancelled.
pub fn spawn_reporter(
    progress: Arc<ProgressAggregator>,
    total: Option<u64>,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sampler = Sampler::new(total, progress.downloaded(), Instant::now());
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let snapshot = sampler.sample(progress.downloaded(), Instant::now());
                    progress.sink().on_snapshot(&snapshot);
                }
            }
        }
    })
}

/// One-line console rendering of a snapshot.
pub fn progress_line(snapshot: &ProgressSnapshot) -> String {
    let speed = format!("{}/s", format_bytes(snapshot.speed as u64));
    match (snapshot.total, snapshot.percentage()) {
        (Some(total), Some(percentage)) => {
            let eta = snapshot
                .eta()
                .map(|d| format_duration(d.as_secs()))
                .unwrap_or_else(|| "Unknown".to_string());
            format!(
                "[{}] {:.1}% | {}/{} | Speed: {} | ETA: {}",
                progress_bar(percentage),
                percentage,
                format_bytes(snapshot.downloaded),
                format_bytes(total),
                speed,
                eta
            )
        }
        _ => format!(
            "Downloaded: {} | Speed: {} | Time: {}",
            format_bytes(snapshot.downloaded),
            speed,
            format_duration(snapshot.elapsed.as_secs())
        ),
    }
}

fn progress_bar(percentage: f64) -> String {
    let filled = ((percentage.clamp(0.0, 100.0) / 100.0) * BAR_WIDTH as f64) as usize;
    let mut bar = "█".repeat(filled);
    bar.push_str(&"░".repeat(BAR_WIDTH - filled));
    bar
}
