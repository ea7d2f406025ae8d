//! Loader events and fetch observers.

use crate::types::Record;
use serde::Serialize;
use std::sync::Arc;

/// Broadcast to subscribers as chunks change state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LoaderEvent {
    ChunkLoaded {
        start: usize,
        end: usize,
        records: usize,
        from_cache: bool,
    },
    ChunkEvicted {
        start: usize,
        end: usize,
    },
    ChunkFailed {
        start: usize,
        end: usize,
        reason: String,
    },
    Reset,
}

/// Observer of chunks entering and leaving residency.
///
/// Called outside the loader's lock, once per chunk, in load order.
pub trait FetchListener: Send + Sync {
    fn on_chunk_loaded(&self, start: usize, records: &[Arc<Record>]);

    /// Records of a chunk dropped under memory pressure.
    fn on_chunk_evicted(&self, _start: usize, _records: &[Arc<Record>]) {}
}
