// src/planner.rs

use crate::models::Chunk;
use crate::options::{MAX_THREADS, MIN_THREADS};
use crate::segment::SegmentStore;

/// Split `[0, total_size - 1]` into contiguous chunks, one per worker.
///
/// Without a known size or range support the plan is a single unbounded
/// chunk. The last chunk absorbs the division remainder. Chunks are
/// returned in ascending offset order, which is also the merge order.
pub fn plan_chunks(
    total_size: Option<u64>,
    range_supported: bool,
    workers: usize,
    store: &SegmentStore,
) -> Vec<Chunk> {
    let size = match total_size {
        Some(size) if size > 0 && range_supported => size,
        _ => {
            return vec![Chunk {
                index: 0,
                start: 0,
                end: None,
                segment_path: store.segment_path(0),
            }]
        }
    };

    // Never plan an empty chunk, even for resources smaller than the pool.
    let workers = (workers.clamp(MIN_THREADS, MAX_THREADS) as u64).min(size);
    let base = size / workers;

    (0..workers)
        .map(|i| {
            let start = i * base;
            let end = if i == workers - 1 { size - 1 } else { start + base - 1 };
            let index = i as usize;
            Chunk {
                index,
                start,
                end: Some(end),
                segment_path: store.segment_path(index),
            }
        })
        .collect()
}
