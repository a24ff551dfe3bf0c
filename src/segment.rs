// src/segment.rs

use crate::models::Chunk;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tracing::debug;

/// On-disk segment files for one destination.
///
/// Segment `i` of `/path/to/file.zip` lives at `/path/to/file.zip.part<i>`,
/// so a later run against the same destination finds earlier progress.
#[derive(Debug, Clone)]
pub struct SegmentStore {
    destination: PathBuf,
}

impl SegmentStore {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
        }
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn segment_path(&self, index: usize) -> PathBuf {
        let mut path = OsString::from(self.destination.as_os_str());
        path.push(format!(".part{index}"));
        PathBuf::from(path)
    }

    /// `<destination>.partial`, removed once the segments are gone.
    pub fn marker_path(&self) -> PathBuf {
        let mut path = OsString::from(self.destination.as_os_str());
        path.push(".partial");
        PathBuf::from(path)
    }

    /// Current byte length of the chunk's segment, 0 when it does not exist.
    pub async fn existing_length(&self, chunk: &Chunk) -> io::Result<u64> {
        match tokio::fs::metadata(&chunk.segment_path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Open the segment for appending, creating it if needed.
    pub async fn open_for_append(&self, chunk: &Chunk) -> io::Result<File> {
        if let Some(parent) = chunk.segment_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&chunk.segment_path)
            .await
    }

    /// Remove the chunk's segment. A missing segment is not an error.
    pub async fn delete(&self, chunk: &Chunk) -> io::Result<()> {
        remove_if_exists(&chunk.segment_path).await
    }

    /// Delete every `<destination>.part<N>` file next to the destination,
    /// returning how many were removed. The `<destination>.partial` resume
    /// marker goes too but is not counted.
    pub async fn discard_all(&self) -> io::Result<usize> {
        let Some(name) = self.destination.file_name().map(|n| n.to_string_lossy().into_owned())
        else {
            return Ok(0);
        };
        let prefix = format!("{name}.part");
        let dir = match self.destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            let is_segment = file_name
                .strip_prefix(&prefix)
                .is_some_and(|suffix| !suffix.is_empty() && suffix.parse::<usize>().is_ok());
            if is_segment {
                remove_if_exists(&entry.path()).await?;
                debug!(path = %entry.path().display(), "discarded segment");
                removed += 1;
            }
        }

        remove_if_exists(&self.marker_path()).await?;
        Ok(removed)
    }
}

pub(crate) async fn remove_if_exists(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
