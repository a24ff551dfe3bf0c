pub mod downloader;
pub mod merger;
pub mod models;
pub mod options;
pub mod planner;
pub mod probe;
pub mod progress;
pub mod segment;
pub mod session;
pub mod util;

/// Convenient type alias exposing common structs.
pub mod prelude {
    pub use crate::downloader::{DownloadWorker, WorkerError, WorkerOutcome};
    pub use crate::merger::MergeError;
    pub use crate::models::{Chunk, DownloadSession, ProgressSnapshot, SessionState, StatusReport};
    pub use crate::options::DownloadOptions;
    pub use crate::probe::ProbeError;
    pub use crate::progress::{progress_line, NoopSink, ProgressSink};
    pub use crate::segment::SegmentStore;
    pub use crate::session::{SessionController, SessionError};
}
