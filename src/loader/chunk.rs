//! Chunk descriptors

use serde::Serialize;
use tokio::time::Instant;

/// Lifecycle of a chunk.
///
/// `Absent -> Queued -> Loading -> Loaded`, with eviction and failure both
/// returning to `Absent`. Absent chunks have no descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkState {
    Absent,
    /// Enqueued, not yet dispatched
    Queued,
    /// Fetch in flight
    Loading,
    Loaded,
}

/// Contiguous half-open range `[start, end)` over the flattened visible order.
#[derive(Debug, Clone)]
pub struct ChunkDescriptor {
    pub start: usize,
    pub end: usize,
    pub state: ChunkState,
    pub last_accessed: Instant,
    /// Distance from the last known viewport; 0 intersects it
    pub priority: usize,
}

impl ChunkDescriptor {
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end,
            state: ChunkState::Absent,
            last_accessed: Instant::now(),
            priority: usize::MAX,
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn touch(&mut self) {
        self.last_accessed = Instant::now();
    }

    pub fn intersects(&self, start: usize, end: usize) -> bool {
        self.start < end && start < self.end
    }

    /// True when the chunk lies entirely inside `[start, end)`
    pub fn within(&self, start: usize, end: usize) -> bool {
        self.start >= start && self.end <= end
    }

    /// Fetch urgency relative to viewport `[start, end)`: 0 when the chunk
    /// intersects it, otherwise the gap in records plus one.
    pub fn distance_to(&self, start: usize, end: usize) -> usize {
        if self.intersects(start, end) {
            0
        } else if self.end <= start {
            start - self.end + 1
        } else {
            self.start.saturating_sub(end) + 1
        }
    }
}
