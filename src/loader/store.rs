//! Loaded item store and chunk-result cache.
//!
//! The two are ownership-independent: evicting a range from the store leaves
//! its cached result alone, and the cache drops entries by its own LRU policy.

use crate::types::Record;
use lru::LruCache;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Sparse flattened index to record mapping.
#[derive(Debug, Default)]
pub struct LoadedItemStore {
    items: BTreeMap<usize, Arc<Record>>,
}

impl LoadedItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Record>> {
        self.items.get(&index)
    }

    /// Place `records` at consecutive indices from `start`.
    pub fn insert_chunk(&mut self, start: usize, records: &[Arc<Record>]) {
        for (offset, record) in records.iter().enumerate() {
            self.items.insert(start + offset, Arc::clone(record));
        }
    }

    /// Drop every record in `[start, end)`, returning the records that were held.
    pub fn remove_range(&mut self, start: usize, end: usize) -> Vec<Arc<Record>> {
        let doomed: Vec<usize> = self.items.range(start..end).map(|(i, _)| *i).collect();
        doomed
            .iter()
            .filter_map(|index| self.items.remove(index))
            .collect()
    }

    pub fn range(&self, start: usize, end: usize) -> impl Iterator<Item = (&usize, &Arc<Record>)> {
        self.items.range(start..end)
    }

    pub fn snapshot(&self) -> BTreeMap<usize, Arc<Record>> {
        self.items.clone()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

type ChunkRecords = Arc<Vec<Arc<Record>>>;

/// Small LRU of whole chunk results keyed by range. Capacity 0 disables it.
#[derive(Debug)]
pub struct ChunkCache {
    entries: Option<LruCache<(usize, usize), ChunkRecords>>,
}

impl ChunkCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(LruCache::new),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached result for `range`; a hit refreshes its recency.
    pub fn get(&mut self, range: (usize, usize)) -> Option<ChunkRecords> {
        self.entries.as_mut()?.get(&range).map(Arc::clone)
    }

    /// Insert, evicting the least recently used entry beyond capacity.
    /// Returns the evicted ranges.
    pub fn insert(&mut self, range: (usize, usize), records: ChunkRecords) -> Vec<(usize, usize)> {
        let Some(entries) = self.entries.as_mut() else {
            return Vec::new();
        };
        match entries.push(range, records) {
            Some((evicted, _)) if evicted != range => vec![evicted],
            _ => Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        if let Some(entries) = self.entries.as_mut() {
            entries.clear();
        }
    }
}
