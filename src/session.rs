// src/session.rs

use crate::downloader::{DownloadWorker, WorkerOutcome};
use crate::merger::{self, MergeError};
use crate::models::{Chunk, ChunkSlot, DownloadSession, SessionState, StatusReport};
use crate::options::DownloadOptions;
use crate::planner;
use crate::probe::{self, ProbeError};
use crate::progress::{self, NoopSink, ProgressAggregator, ProgressSink};
use crate::segment::SegmentStore;
use crate::util;
use reqwest::Client;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("cannot {op} a session that is {state}")]
    InvalidTransition {
        op: &'static str,
        state: SessionState,
    },
    #[error("probe failed: {0}")]
    Probe(#[from] ProbeError),
    #[error("merge failed: {0}")]
    Merge(#[from] MergeError),
    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything fixed once the probe has answered.
struct Plan {
    slots: Vec<ChunkSlot>,
    worker: DownloadWorker,
    pool: Arc<Semaphore>,
    total_size: Option<u64>,
}

/// Handles of the current run. A new run gets a new token, since a
/// cancelled token cannot be reused.
#[derive(Default)]
struct RunHandles {
    token: CancellationToken,
    reporter_token: CancellationToken,
    reporter: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

/// Drives one download from probe to merge and owns its state machine.
///
/// Wrap it in an `Arc`: worker tasks hold a reference back to the
/// controller so the last finishing chunk can trigger the merge.
pub struct SessionController {
    client: Client,
    options: DownloadOptions,
    store: SegmentStore,
    session: Mutex<DownloadSession>,
    plan: OnceLock<Plan>,
    progress: Arc<ProgressAggregator>,
    run: StdMutex<RunHandles>,
    // Serializes start/pause/resume/cancel.
    control: Mutex<()>,
    // Completion check and merge run under this lock, and so do the state
    // changes of pause and cancel.
    merge_lock: Mutex<()>,
    created: Instant,
}

impl SessionController {
    pub fn new(
        url: impl Into<String>,
        destination: impl Into<PathBuf>,
        options: DownloadOptions,
    ) -> Result<Self, SessionError> {
        let client = Client::builder()
            .user_agent(options.user_agent.clone())
            .connect_timeout(options.connect_timeout())
            .build()?;
        let destination = destination.into();
        let session = DownloadSession::new(url.into(), destination.clone(), options.effective_threads());

        Ok(Self {
            client,
            store: SegmentStore::new(destination),
            session: Mutex::new(session),
            plan: OnceLock::new(),
            progress: Arc::new(ProgressAggregator::new(Arc::new(NoopSink))),
            run: StdMutex::new(RunHandles::default()),
            control: Mutex::new(()),
            merge_lock: Mutex::new(()),
            created: Instant::now(),
            options,
        })
    }

    /// Route progress, snapshots and state changes to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Arc::new(ProgressAggregator::new(sink));
        self
    }

    pub fn store(&self) -> &SegmentStore {
        &self.store
    }

    /// Probe the resource, plan the chunks and launch the workers.
    ///
    /// Segments left by an earlier run against the same destination are
    /// picked up: their lengths become the workers' starting offsets.
    pub async fn start(self: &Arc<Self>) -> Result<(), SessionError> {
        let _control = self.control.lock().await;
        let url = {
            let session = self.session.lock().await;
            if session.state != SessionState::Planning || self.plan.get().is_some() {
                return Err(SessionError::InvalidTransition {
                    op: "start",
                    state: session.state,
                });
            }
            session.url.clone()
        };
        if !util::is_valid_url(&url) {
            return Err(SessionError::InvalidUrl(url));
        }

        let token = CancellationToken::new();
        self.lock_run().token = token.clone();

        info!(url = %url, destination = %self.store.destination().display(), "probing");
        let probed = tokio::select! {
            _ = token.cancelled() => {
                debug!("start interrupted by cancel");
                return Ok(());
            }
            probed = probe::probe(&self.client, &url, self.options.probe_timeout()) => probed,
        };
        let probed = match probed {
            Ok(probed) => probed,
            Err(e) => {
                util::log_error("probe failed", &e);
                self.set_state(SessionState::Failed).await;
                return Err(e.into());
            }
        };

        let chunks = planner::plan_chunks(
            probed.total_size,
            probed.range_supported,
            self.options.effective_threads(),
            &self.store,
        );
        if probed.total_size.is_some() && chunks.len() == 1 && !chunks[0].is_bounded() {
            info!("server does not accept ranges, using a single stream");
        }
        let worker_count = chunks.len();
        let slots: Vec<ChunkSlot> = chunks.into_iter().map(ChunkSlot::new).collect();
        let on_disk = self.reconcile_segments(&slots).await?;
        self.progress.rebase(on_disk);

        let worker = DownloadWorker::new(
            self.client.clone(),
            &url,
            probed.total_size,
            self.store.clone(),
            self.progress.clone(),
            self.options.buffer_size(),
            self.options.read_timeout(),
        );
        let plan = Plan {
            slots,
            worker,
            pool: Arc::new(Semaphore::new(worker_count)),
            total_size: probed.total_size,
        };
        if self.plan.set(plan).is_err() {
            let state = self.session.lock().await.state;
            return Err(SessionError::InvalidTransition { op: "start", state });
        }

        if token.is_cancelled() {
            debug!("start interrupted by cancel");
            return Ok(());
        }
        {
            let mut session = self.session.lock().await;
            session.total_size = probed.total_size;
            session.workers = worker_count;
            session.state = SessionState::Downloading;
        }
        info!(
            total_size = ?probed.total_size,
            workers = worker_count,
            resumed_bytes = on_disk,
            "download started"
        );
        self.progress.sink().on_state(SessionState::Downloading);
        self.launch(token);
        Ok(())
    }

    /// Stop the workers, keeping whatever each segment already holds.
    pub async fn pause(self: &Arc<Self>) -> Result<(), SessionError> {
        let _control = self.control.lock().await;
        {
            let _merge = self.merge_lock.lock().await;
            let mut session = self.session.lock().await;
            if session.state != SessionState::Downloading {
                return Err(SessionError::InvalidTransition {
                    op: "pause",
                    state: session.state,
                });
            }
            session.state = SessionState::Paused;
        }
        info!("download paused");
        self.progress.sink().on_state(SessionState::Paused);
        self.stop_run().await;
        Ok(())
    }

    /// Restart workers for every chunk that is not complete yet.
    pub async fn resume(self: &Arc<Self>) -> Result<(), SessionError> {
        let _control = self.control.lock().await;
        let state = self.session.lock().await.state;
        if state != SessionState::Paused {
            return Err(SessionError::InvalidTransition { op: "resume", state });
        }
        let Some(plan) = self.plan.get() else {
            return Err(SessionError::InvalidTransition { op: "resume", state });
        };

        let on_disk = self.reconcile_segments(&plan.slots).await?;
        self.progress.rebase(on_disk);

        let token = CancellationToken::new();
        self.lock_run().token = token.clone();
        self.session.lock().await.state = SessionState::Downloading;
        info!(resumed_bytes = on_disk, "download resumed");
        self.progress.sink().on_state(SessionState::Downloading);
        self.launch(token);
        Ok(())
    }

    /// Stop everything and mark the session cancelled. Segments stay on disk.
    pub async fn cancel(self: &Arc<Self>) -> Result<(), SessionError> {
        // Fire the signal first so an in-flight probe or worker lets go of
        // the control lock promptly.
        self.lock_run().token.cancel();

        let _control = self.control.lock().await;
        {
            let _merge = self.merge_lock.lock().await;
            let mut session = self.session.lock().await;
            if session.state.is_terminal() {
                return Err(SessionError::InvalidTransition {
                    op: "cancel",
                    state: session.state,
                });
            }
            session.state = SessionState::Cancelled;
        }
        info!("download cancelled");
        self.progress.sink().on_state(SessionState::Cancelled);
        self.stop_run().await;
        Ok(())
    }

    pub async fn status(&self) -> StatusReport {
        let session = self.session.lock().await;
        StatusReport::new(self.progress.downloaded(), session.total_size, session.state)
    }

    pub async fn state(&self) -> SessionState {
        self.session.lock().await.state
    }

    pub async fn session(&self) -> DownloadSession {
        self.session.lock().await.clone()
    }

    /// Wait for every worker of the current run, including any merge one
    /// of them triggered.
    pub async fn join_workers(&self) {
        let workers = std::mem::take(&mut self.lock_run().workers);
        for handle in workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker task panicked");
            }
        }
    }

    /// Count what is already on disk for each slot and derive its completion
    /// flag from the segment itself. Stale segments that cannot be resumed
    /// are deleted first.
    async fn reconcile_segments(&self, slots: &[ChunkSlot]) -> Result<u64, SessionError> {
        let mut total = 0;
        for slot in slots {
            let chunk = &slot.chunk;
            let len = self.store.existing_length(chunk).await?;
            match chunk.span() {
                Some(span) if len > span => {
                    warn!(chunk = chunk.index, len, span, "segment longer than its chunk, discarding");
                    self.store.delete(chunk).await?;
                    slot.set_complete(false);
                }
                Some(_) => {
                    let covered = chunk.is_covered_by(len);
                    if slot.is_complete() && !covered {
                        warn!(chunk = chunk.index, len, "finished segment shrank on disk, refetching");
                    }
                    slot.set_complete(covered);
                    total += len;
                }
                None if slot.is_complete()
                    && tokio::fs::try_exists(&chunk.segment_path).await? =>
                {
                    total += len;
                }
                None => {
                    if len > 0 {
                        debug!(len, "unbounded segment cannot be resumed, restarting");
                    }
                    self.store.delete(chunk).await?;
                    slot.set_complete(false);
                }
            }
        }
        Ok(total)
    }

    fn launch(self: &Arc<Self>, token: CancellationToken) {
        let Some(plan) = self.plan.get() else {
            return;
        };
        let reporter_token = token.child_token();
        let reporter = progress::spawn_reporter(
            self.progress.clone(),
            plan.total_size,
            self.options.report_interval(),
            reporter_token.clone(),
        );

        let pending: Vec<Chunk> = plan
            .slots
            .iter()
            .filter(|slot| !slot.is_complete())
            .map(|slot| slot.chunk.clone())
            .collect();

        let mut workers = Vec::with_capacity(pending.len().max(1));
        if pending.is_empty() {
            // Everything is on disk already; only the merge is left.
            let this = self.clone();
            workers.push(tokio::spawn(async move { this.check_and_merge().await }));
        }
        for chunk in pending {
            workers.push(self.spawn_worker(chunk, token.clone(), plan.pool.clone()));
        }

        let mut run = self.lock_run();
        run.token = token;
        run.reporter_token = reporter_token;
        run.reporter = Some(reporter);
        run.workers = workers;
    }

    fn spawn_worker(
        self: &Arc<Self>,
        chunk: Chunk,
        token: CancellationToken,
        pool: Arc<Semaphore>,
    ) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let Ok(_permit) = pool.acquire_owned().await else {
                return;
            };
            let Some(plan) = this.plan.get() else {
                return;
            };
            debug!(chunk = chunk.index, start = chunk.start, end = ?chunk.end, "worker starting");

            match plan.worker.run(&chunk, &token).await {
                Ok(WorkerOutcome::Completed) => {
                    if let Some(slot) = plan.slots.get(chunk.index) {
                        slot.mark_complete();
                    }
                    debug!(chunk = chunk.index, "chunk complete");
                    this.check_and_merge().await;
                }
                Ok(WorkerOutcome::Interrupted) => {
                    debug!(chunk = chunk.index, "worker interrupted");
                }
                Err(e) => {
                    util::log_error(&format!("chunk {} failed", chunk.index), &e);
                }
            }
        })
    }

    /// Merge once every chunk is complete. Runs under `merge_lock`, so
    /// concurrent triggers collapse into a single merge.
    async fn check_and_merge(self: &Arc<Self>) {
        let _merge = self.merge_lock.lock().await;
        let Some(plan) = self.plan.get() else {
            return;
        };
        if !merger::all_complete(&plan.slots) {
            return;
        }
        if self.session.lock().await.state != SessionState::Downloading {
            return;
        }

        let chunks: Vec<Chunk> = plan.slots.iter().map(|slot| slot.chunk.clone()).collect();
        info!(segments = chunks.len(), "all chunks complete, merging");
        let next = match merger::merge_segments(&self.store, &chunks).await {
            Ok(bytes) => {
                let secs = self.created.elapsed().as_secs();
                info!(
                    path = %self.store.destination().display(),
                    size = %util::format_bytes(bytes),
                    time = %util::format_duration(secs),
                    avg_speed = %format!("{}/s", util::format_bytes(bytes / secs.max(1))),
                    "download completed"
                );
                SessionState::Completed
            }
            Err(e) => {
                util::log_error("merge failed", &e);
                SessionState::Paused
            }
        };

        self.session.lock().await.state = next;
        self.lock_run().reporter_token.cancel();
        self.progress.sink().on_state(next);
    }

    /// Cancel the current run and wait for its tasks to wind down.
    async fn stop_run(&self) {
        let (workers, reporter) = {
            let mut run = self.lock_run();
            run.token.cancel();
            run.reporter_token.cancel();
            (std::mem::take(&mut run.workers), run.reporter.take())
        };
        for handle in workers {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker task panicked");
            }
        }
        if let Some(reporter) = reporter {
            let _ = reporter.await;
        }
    }

    async fn set_state(&self, state: SessionState) {
        self.session.lock().await.state = state;
        self.progress.sink().on_state(state);
    }

    fn lock_run(&self) -> std::sync::MutexGuard<'_, RunHandles> {
        // A panic while holding this lock leaves the handles usable.
        self.run.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
