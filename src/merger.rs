// src/merger.rs

use crate::models::{Chunk, ChunkSlot};
use crate::segment::{remove_if_exists, SegmentStore};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("io error merging into {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// True once every planned chunk has been marked complete by its worker.
pub fn all_complete(slots: &[ChunkSlot]) -> bool {
    !slots.is_empty() && slots.iter().all(ChunkSlot::is_complete)
}

/// Concatenate the segments in chunk-index order into the destination,
/// then delete them. Returns the number of bytes written.
///
/// Segments are only removed after the destination has been fully written
/// and synced, so a failed merge can be retried.
pub async fn merge_segments(store: &SegmentStore, chunks: &[Chunk]) -> Result<u64, MergeError> {
    let destination = store.destination().to_path_buf();
    let dest_err = |source| MergeError::Io {
        path: destination.clone(),
        source,
    };

    let mut ordered: Vec<&Chunk> = chunks.iter().collect();
    ordered.sort_by_key(|chunk| chunk.index);

    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(dest_err)?;
        }
    }

    // Open every segment before touching the destination, so a missing one
    // fails the merge without leaving a truncated file behind.
    let mut segments = Vec::with_capacity(ordered.len());
    for chunk in &ordered {
        let segment = File::open(&chunk.segment_path)
            .await
            .map_err(|source| MergeError::Io {
                path: chunk.segment_path.clone(),
                source,
            })?;
        segments.push((chunk.index, segment));
    }

    let written = concatenate(&destination, segments).await;
    let total = match written {
        Ok(total) => total,
        Err(source) => {
            if let Err(e) = remove_if_exists(&destination).await {
                warn!(error = %e, "could not remove partially merged file");
            }
            return Err(dest_err(source));
        }
    };

    for chunk in &ordered {
        if let Err(e) = store.delete(chunk).await {
            warn!(path = %chunk.segment_path.display(), error = %e, "could not delete merged segment");
        }
    }

    if let Err(e) = remove_if_exists(&store.marker_path()).await {
        warn!(error = %e, "could not remove resume marker");
    }

    info!(path = %destination.display(), bytes = total, "segments merged");
    Ok(total)
}

async fn concatenate(destination: &Path, segments: Vec<(usize, File)>) -> std::io::Result<u64> {
    let mut output = File::create(destination).await?;
    let mut total = 0u64;
    for (index, mut segment) in segments {
        let copied = tokio::io::copy(&mut segment, &mut output).await?;
        debug!(chunk = index, copied, "segment appended");
        total += copied;
    }
    output.flush().await?;
    output.sync_all().await?;
    Ok(total)
}
