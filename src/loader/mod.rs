//! Viewport-Driven Chunk Loader
//!
//! Keeps a sliding, memory-bounded window of the flattened tree resident. The
//! consumer reports viewports; the loader queues the chunks around them,
//! evicts far-away chunks under memory pressure, and after a quiet period
//! drains the queue by priority, one fetch at a time.
//!
//! Bookkeeping lives behind one lock that is never held across an `.await`.
//! Fetches are serialized by a separate async gate shared by the debounced
//! drain and [`ChunkLoader::force_load_range`].

pub mod chunk;
pub mod config;
pub mod events;
pub mod metrics;
pub mod store;

pub use chunk::{ChunkDescriptor, ChunkState};
pub use config::LoaderConfig;
pub use events::{FetchListener, LoaderEvent};
pub use metrics::{LatencyWindow, LoaderMetrics};
pub use store::{ChunkCache, LoadedItemStore};

use crate::error::{LoaderError, SourceError};
use crate::filter::Predicate;
use crate::hierarchy::{HierarchyPath, PathScheme};
use crate::source::{DataSource, FetchRequest};
use crate::types::{NodeId, Record, SortSpec};
use metrics::LoaderCounters;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 256;

/// Predicate and order every fetch is issued with
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoaderQuery {
    pub predicate: Predicate,
    pub sort: SortSpec,
}

/// Outcome of [`ChunkLoader::update_viewport`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewportUpdate {
    /// Viewport widened by the load-ahead margin, clamped to the item count
    pub extended: (usize, usize),
    /// Chunks newly queued by this update
    pub queued: Vec<(usize, usize)>,
    /// Queued chunks that fell outside the extended range
    pub dropped: Vec<(usize, usize)>,
    pub evicted: Vec<(usize, usize)>,
}

/// Outcome of a drain or a forced load
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub fetched: Vec<(usize, usize)>,
    pub cache_hits: Vec<(usize, usize)>,
    pub failed: Vec<(usize, usize, String)>,
    /// Results that arrived after a reset and were dropped
    pub discarded: usize,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.discarded == 0
    }

    pub fn chunks_loaded(&self) -> usize {
        self.fetched.len() + self.cache_hits.len()
    }
}

struct LoaderState {
    total_items: usize,
    query: LoaderQuery,
    /// Descriptors by chunk index; absent chunks have none
    chunks: BTreeMap<usize, ChunkDescriptor>,
    items: LoadedItemStore,
    cache: ChunkCache,
    latency: LatencyWindow,
    counters: LoaderCounters,
    viewport: Option<(usize, usize)>,
    generation: u64,
    debounce: Option<CancellationToken>,
    /// Parent of every in-flight fetch token; replaced on reset
    in_flight: CancellationToken,
    /// Decides how ancestors of visible records are found for pinning
    path_scheme: PathScheme,
}

enum Dispatch {
    Cached {
        start: usize,
        end: usize,
        records: Arc<Vec<Arc<Record>>>,
    },
    Fetch(FetchJob),
}

struct FetchJob {
    chunk: usize,
    start: usize,
    end: usize,
    generation: u64,
    request: FetchRequest,
    cancel: CancellationToken,
}

struct LoaderInner {
    config: LoaderConfig,
    source: Arc<dyn DataSource>,
    state: Mutex<LoaderState>,
    fetch_gate: tokio::sync::Mutex<()>,
    events: broadcast::Sender<LoaderEvent>,
    listeners: RwLock<Vec<Arc<dyn FetchListener>>>,
    runtime: Option<Handle>,
}

/// Viewport-driven chunk loader. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ChunkLoader {
    inner: Arc<LoaderInner>,
}

impl ChunkLoader {
    /// Create a loader over `source`.
    ///
    /// Debounced drains run on the Tokio runtime current at construction (or
    /// at the viewport update). Without one, updates only queue and the
    /// consumer drives fetching through [`Self::flush`].
    /// Fails on a configuration that [`LoaderConfig::validate`] rejects.
    pub fn new(config: LoaderConfig, source: Arc<dyn DataSource>) -> Result<Self, LoaderError> {
        config.validate().map_err(LoaderError::InvalidConfig)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let state = LoaderState {
            total_items: 0,
            query: LoaderQuery::default(),
            chunks: BTreeMap::new(),
            items: LoadedItemStore::new(),
            cache: ChunkCache::new(config.cache_size),
            latency: LatencyWindow::new(config.latency_window),
            counters: LoaderCounters::default(),
            viewport: None,
            generation: 0,
            debounce: None,
            in_flight: CancellationToken::new(),
            path_scheme: PathScheme::default(),
        };
        Ok(Self {
            inner: Arc::new(LoaderInner {
                config,
                source,
                state: Mutex::new(state),
                fetch_gate: tokio::sync::Mutex::new(()),
                events,
                listeners: RwLock::new(Vec::new()),
                runtime: Handle::try_current().ok(),
            }),
        })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    pub fn total_items(&self) -> usize {
        self.inner.state.lock().total_items
    }

    pub fn query(&self) -> LoaderQuery {
        self.inner.state.lock().query.clone()
    }

    /// Last reported viewport, after clamping
    pub fn viewport(&self) -> Option<(usize, usize)> {
        self.inner.state.lock().viewport
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LoaderEvent> {
        self.inner.events.subscribe()
    }

    pub fn add_listener(&self, listener: Arc<dyn FetchListener>) {
        self.inner.listeners.write().push(listener);
    }

    /// Where hierarchy positions come from. With `Synthesized`, ancestor
    /// pinning follows parent links instead of source paths. Survives resets.
    pub fn set_path_scheme(&self, scheme: PathScheme) {
        self.inner.state.lock().path_scheme = scheme;
    }

    /// Change the item count. Invalidates the flattened order, so resets.
    pub fn set_total_items(&self, total_items: usize) {
        self.inner.reset_with(|state| state.total_items = total_items);
    }

    /// Change the fetch predicate and order. Resets.
    pub fn set_query(&self, predicate: Predicate, sort: SortSpec) {
        self.inner
            .reset_with(|state| state.query = LoaderQuery { predicate, sort });
    }

    /// Change query and item count together with a single reset.
    pub fn reconfigure(&self, query: LoaderQuery, total_items: usize) {
        self.inner.reset_with(|state| {
            state.query = query;
            state.total_items = total_items;
        });
    }

    /// Clear every descriptor, record, cached chunk and counter, cancel the
    /// debounce timer and orphan in-flight fetches.
    pub fn reset(&self) {
        self.inner.reset_with(|_| {});
    }

    /// Report the visible range `[start, end)` of the flattened order.
    pub fn update_viewport(&self, start: usize, end: usize) -> ViewportUpdate {
        let config = &self.inner.config;
        let mut update = ViewportUpdate::default();
        let mut released = Vec::new();
        {
            let mut state = self.inner.state.lock();
            let total = state.total_items;
            let (start, end) = if start <= end { (start, end) } else { (end, start) };
            let end = end.min(total);
            let start = start.min(end);
            state.viewport = Some((start, end));
            if start == end {
                return update;
            }

            let span = end - start;
            let ahead = scaled(span, config.load_ahead_factor);
            let extended = (start.saturating_sub(ahead), end.saturating_add(ahead).min(total));
            update.extended = extended;

            let first = config.chunk_index(extended.0);
            let last = config.chunk_index(extended.1 - 1);
            for chunk in first..=last {
                let (chunk_start, chunk_end) = config.chunk_range(chunk, total);
                let descriptor = state
                    .chunks
                    .entry(chunk)
                    .or_insert_with(|| ChunkDescriptor::new(chunk_start, chunk_end));
                descriptor.priority = descriptor.distance_to(start, end);
                if descriptor.state == ChunkState::Absent {
                    descriptor.state = ChunkState::Queued;
                    update.queued.push((chunk_start, chunk_end));
                }
            }

            let stale: Vec<usize> = state
                .chunks
                .iter()
                .filter(|(index, c)| {
                    c.state == ChunkState::Queued && (**index < first || **index > last)
                })
                .map(|(index, _)| *index)
                .collect();
            for index in stale {
                if let Some(c) = state.chunks.remove(&index) {
                    update.dropped.push((c.start, c.end));
                }
            }

            let pending_items: usize = state
                .chunks
                .values()
                .filter(|c| matches!(c.state, ChunkState::Queued | ChunkState::Loading))
                .map(|c| c.len())
                .sum();
            if state.items.len() + pending_items > config.max_loaded_items {
                released = self.inner.evict(&mut state, start, end);
                update.evicted = released.iter().map(|(s, e, _)| (*s, *e)).collect();
            }

            let has_queued = state.chunks.values().any(|c| c.state == ChunkState::Queued);
            self.inner.schedule_drain(&mut state, has_queued);

            debug!(
                start,
                end,
                extended_start = extended.0,
                extended_end = extended.1,
                queued = update.queued.len(),
                evicted = update.evicted.len(),
                "Viewport updated"
            );
        }

        if !released.is_empty() {
            let listeners: Vec<Arc<dyn FetchListener>> = self.inner.listeners.read().clone();
            for (start, end, records) in &released {
                for listener in &listeners {
                    listener.on_chunk_evicted(*start, records);
                }
                self.inner.emit(LoaderEvent::ChunkEvicted {
                    start: *start,
                    end: *end,
                });
            }
        }
        update
    }

    /// Record at flattened `index`, or `None` while it is not resident.
    ///
    /// Absence means pending, not nonexistent. Touches the owning chunk.
    pub fn get_item(&self, index: usize) -> Option<Arc<Record>> {
        let chunk = self.inner.config.chunk_index(index);
        let mut state = self.inner.state.lock();
        if let Some(descriptor) = state.chunks.get_mut(&chunk) {
            descriptor.touch();
        }
        state.items.get(index).cloned()
    }

    /// True when every chunk covering `[start, end)` is loaded.
    pub fn is_range_loaded(&self, start: usize, end: usize) -> bool {
        let config = &self.inner.config;
        let state = self.inner.state.lock();
        let end = end.min(state.total_items);
        if start >= end {
            return true;
        }
        (config.chunk_index(start)..=config.chunk_index(end - 1)).all(|chunk| {
            state
                .chunks
                .get(&chunk)
                .map(|c| c.state == ChunkState::Loaded)
                .unwrap_or(false)
        })
    }

    /// State of the chunk containing `index`
    pub fn chunk_state(&self, index: usize) -> ChunkState {
        let chunk = self.inner.config.chunk_index(index);
        self.inner
            .state
            .lock()
            .chunks
            .get(&chunk)
            .map(|c| c.state)
            .unwrap_or(ChunkState::Absent)
    }

    /// Load every chunk covering `[start, end)` now, bypassing the debounce.
    ///
    /// Chunk failures are reported, not returned as errors; the remaining
    /// chunks still load.
    pub async fn force_load_range(&self, start: usize, end: usize) -> Result<LoadReport, LoaderError> {
        if start > end {
            return Err(LoaderError::InvalidRange { start, end });
        }
        let config = &self.inner.config;
        let (chunks, generation) = {
            let state = self.inner.state.lock();
            let end = end.min(state.total_items);
            if start >= end {
                return Ok(LoadReport::default());
            }
            (
                config.chunk_index(start)..=config.chunk_index(end - 1),
                state.generation,
            )
        };

        let mut report = LoadReport::default();
        for chunk in chunks {
            let _gate = self.inner.fetch_gate.lock().await;
            let dispatch = {
                let mut state = self.inner.state.lock();
                if state.generation != generation {
                    debug!(start, end, "Forced load interrupted by reset");
                    break;
                }
                let (chunk_start, chunk_end) = config.chunk_range(chunk, state.total_items);
                let descriptor = state
                    .chunks
                    .entry(chunk)
                    .or_insert_with(|| ChunkDescriptor::new(chunk_start, chunk_end));
                descriptor.priority = 0;
                if descriptor.state == ChunkState::Loaded {
                    descriptor.touch();
                    None
                } else {
                    self.inner.begin(&mut state, chunk)
                }
            };
            if let Some(dispatch) = dispatch {
                self.inner.complete(dispatch, &mut report).await;
            }
        }
        Ok(report)
    }

    /// Force-load `[0, min(initial_load_size, total_items))`.
    pub async fn load_initial(&self) -> Result<LoadReport, LoaderError> {
        let end = self
            .inner
            .config
            .initial_load_size
            .min(self.total_items());
        self.force_load_range(0, end).await
    }

    /// Cancel the pending debounce and drain the queue now.
    pub async fn flush(&self) -> LoadReport {
        if let Some(token) = self.inner.state.lock().debounce.take() {
            token.cancel();
        }
        self.inner.drain().await
    }

    /// Sparse copy of the resident records
    pub fn snapshot(&self) -> BTreeMap<usize, Arc<Record>> {
        self.inner.state.lock().items.snapshot()
    }

    pub fn metrics(&self) -> LoaderMetrics {
        let state = self.inner.state.lock();
        let (loaded_chunks, pending_chunks) =
            state
                .chunks
                .values()
                .fold((0, 0), |(loaded, pending), c| match c.state {
                    ChunkState::Loaded => (loaded + 1, pending),
                    ChunkState::Queued | ChunkState::Loading => (loaded, pending + 1),
                    ChunkState::Absent => (loaded, pending),
                });
        LoaderMetrics {
            total_items: state.total_items,
            loaded_items: state.items.len(),
            loaded_chunks,
            pending_chunks,
            cached_chunks: state.cache.len(),
            fetches: state.counters.fetches,
            cache_hits: state.counters.cache_hits,
            failures: state.counters.failures,
            evictions: state.counters.evictions,
            discarded: state.counters.discarded,
            average_latency_ms: state
                .latency
                .average()
                .map(|avg| avg.as_secs_f64() * 1000.0),
        }
    }
}

impl std::fmt::Debug for ChunkLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkLoader")
            .field("config", &self.inner.config)
            .field("metrics", &self.metrics())
            .finish()
    }
}

/// Ids of resident ancestors of the records in `[start, end)`.
///
/// External paths are matched by prefix; synthesized positions follow
/// `parent_id` links through resident records.
fn pinned_ancestors(state: &LoaderState, start: usize, end: usize) -> HashSet<NodeId> {
    let visible = state.items.range(start, end).map(|(_, record)| record);
    match state.path_scheme {
        PathScheme::External => {
            let paths: HashSet<HierarchyPath> = visible
                .filter_map(|record| record.hierarchy_path())
                .flat_map(|path| path.ancestors())
                .collect();
            if paths.is_empty() {
                return HashSet::new();
            }
            state
                .items
                .range(0, usize::MAX)
                .filter(|(_, record)| {
                    record
                        .hierarchy_path()
                        .map(|path| paths.contains(&path))
                        .unwrap_or(false)
                })
                .map(|(_, record)| record.id.clone())
                .collect()
        }
        PathScheme::Synthesized => {
            let by_id: HashMap<&str, &Arc<Record>> = state
                .items
                .range(0, usize::MAX)
                .map(|(_, record)| (record.id.as_str(), record))
                .collect();
            let mut pinned = HashSet::new();
            for record in visible {
                let mut parent = record.parent_id.as_deref();
                while let Some(id) = parent {
                    // stops at non-resident parents and on cycles
                    let Some(ancestor) = by_id.get(id) else {
                        break;
                    };
                    if !pinned.insert(ancestor.id.clone()) {
                        break;
                    }
                    parent = ancestor.parent_id.as_deref();
                }
            }
            pinned
        }
    }
}

/// Evicted range and the records it held
type EvictedChunk = (usize, usize, Vec<Arc<Record>>);

/// `span * factor`, rounded to whole records
fn scaled(span: usize, factor: f64) -> usize {
    (span as f64 * factor).round() as usize
}

impl LoaderInner {
    fn emit(&self, event: LoaderEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn reset_with(&self, apply: impl FnOnce(&mut LoaderState)) {
        {
            let mut state = self.state.lock();
            state.generation += 1;
            if let Some(token) = state.debounce.take() {
                token.cancel();
            }
            state.in_flight.cancel();
            state.in_flight = CancellationToken::new();
            state.chunks.clear();
            state.items.clear();
            state.cache.clear();
            state.latency.clear();
            state.counters = LoaderCounters::default();
            state.viewport = None;
            apply(&mut state);
            info!(
                generation = state.generation,
                total_items = state.total_items,
                "Loader reset"
            );
        }
        self.emit(LoaderEvent::Reset);
    }

    /// Replace the debounce timer. Only the latest timer survives.
    fn schedule_drain(self: &Arc<Self>, state: &mut LoaderState, has_queued: bool) {
        if let Some(token) = state.debounce.take() {
            token.cancel();
        }
        if !has_queued {
            return;
        }
        let Some(runtime) = self.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            debug!("No runtime available, fetches wait for flush");
            return;
        };
        let token = CancellationToken::new();
        state.debounce = Some(token.clone());
        let inner = Arc::clone(self);
        let delay = Duration::from_millis(self.config.debounce_delay_ms);
        runtime.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = sleep(delay) => {}
            }
            let report = inner.drain().await;
            debug!(
                fetched = report.fetched.len(),
                cache_hits = report.cache_hits.len(),
                failed = report.failed.len(),
                "Debounced drain finished"
            );
        });
    }

    /// Fetch queued chunks in ascending priority until none remain.
    async fn drain(&self) -> LoadReport {
        let mut report = LoadReport::default();
        loop {
            let _gate = self.fetch_gate.lock().await;
            let dispatch = {
                let mut state = self.state.lock();
                let next = state
                    .chunks
                    .iter()
                    .filter(|(_, c)| c.state == ChunkState::Queued)
                    .min_by_key(|(_, c)| (c.priority, c.start))
                    .map(|(index, _)| *index);
                match next {
                    Some(chunk) => self.begin(&mut state, chunk),
                    None => None,
                }
            };
            match dispatch {
                Some(dispatch) => self.complete(dispatch, &mut report).await,
                None => break,
            }
        }
        report
    }

    /// Start loading `chunk`: serve it from the cache or mark it loading.
    /// Must be called with the fetch gate held.
    fn begin(&self, state: &mut LoaderState, chunk: usize) -> Option<Dispatch> {
        let (start, end) = match state.chunks.get(&chunk) {
            Some(c) if matches!(c.state, ChunkState::Absent | ChunkState::Queued) => {
                (c.start, c.end)
            }
            _ => return None,
        };

        if let Some(records) = state.cache.get((start, end)) {
            state.items.insert_chunk(start, &records);
            if let Some(c) = state.chunks.get_mut(&chunk) {
                c.state = ChunkState::Loaded;
                c.touch();
            }
            state.counters.cache_hits += 1;
            debug!(start, end, "Chunk served from cache");
            return Some(Dispatch::Cached {
                start,
                end,
                records,
            });
        }

        if let Some(c) = state.chunks.get_mut(&chunk) {
            c.state = ChunkState::Loading;
        }
        state.counters.fetches += 1;
        let request = FetchRequest {
            predicate: state.query.predicate.clone(),
            offset: start,
            limit: end - start,
            sort: state.query.sort.clone(),
        };
        Some(Dispatch::Fetch(FetchJob {
            chunk,
            start,
            end,
            generation: state.generation,
            request,
            cancel: state.in_flight.child_token(),
        }))
    }

    async fn complete(&self, dispatch: Dispatch, report: &mut LoadReport) {
        match dispatch {
            Dispatch::Cached {
                start,
                end,
                records,
            } => {
                report.cache_hits.push((start, end));
                self.notify_loaded(start, end, &records, true);
            }
            Dispatch::Fetch(job) => {
                debug!(start = job.start, end = job.end, "Fetching chunk");
                let began = Instant::now();
                let result = self
                    .source
                    .fetch(job.request.clone(), job.cancel.clone())
                    .await;
                self.finish(job, result, began.elapsed(), report);
            }
        }
    }

    fn finish(
        &self,
        job: FetchJob,
        result: Result<Vec<Record>, SourceError>,
        elapsed: Duration,
        report: &mut LoadReport,
    ) {
        let records = {
            let mut state = self.state.lock();
            if state.generation != job.generation {
                state.counters.discarded += 1;
                report.discarded += 1;
                debug!(
                    start = job.start,
                    end = job.end,
                    "Discarding chunk result from before reset"
                );
                return;
            }
            match result {
                Ok(records) => {
                    let records: Arc<Vec<Arc<Record>>> =
                        Arc::new(records.into_iter().map(Arc::new).collect());
                    state.items.insert_chunk(job.start, &records);
                    let dropped = state.cache.insert((job.start, job.end), Arc::clone(&records));
                    if !dropped.is_empty() {
                        debug!(dropped = dropped.len(), "Chunk cache trimmed");
                    }
                    if let Some(c) = state.chunks.get_mut(&job.chunk) {
                        c.state = ChunkState::Loaded;
                        c.touch();
                    }
                    state.latency.record(elapsed);
                    debug!(
                        start = job.start,
                        end = job.end,
                        records = records.len(),
                        latency_ms = elapsed.as_millis() as u64,
                        "Chunk loaded"
                    );
                    records
                }
                Err(err) => {
                    state.chunks.remove(&job.chunk);
                    state.counters.failures += 1;
                    warn!(
                        start = job.start,
                        end = job.end,
                        error = %err,
                        "Chunk fetch failed"
                    );
                    let reason = err.to_string();
                    report.failed.push((job.start, job.end, reason.clone()));
                    drop(state);
                    self.emit(LoaderEvent::ChunkFailed {
                        start: job.start,
                        end: job.end,
                        reason,
                    });
                    return;
                }
            }
        };
        report.fetched.push((job.start, job.end));
        self.notify_loaded(job.start, job.end, &records, false);
    }

    fn notify_loaded(&self, start: usize, end: usize, records: &[Arc<Record>], from_cache: bool) {
        self.emit(LoaderEvent::ChunkLoaded {
            start,
            end,
            records: records.len(),
            from_cache,
        });
        let listeners: Vec<Arc<dyn FetchListener>> = self.listeners.read().clone();
        for listener in listeners {
            listener.on_chunk_loaded(start, records);
        }
    }

    /// Evict loaded chunks entirely outside viewport ± `unload_threshold`
    /// viewports, oldest-accessed first. Chunks holding ancestors of visible
    /// records stay when `pin_ancestors` is set.
    ///
    /// Returns each evicted range with the records it held.
    fn evict(&self, state: &mut LoaderState, start: usize, end: usize) -> Vec<EvictedChunk> {
        let margin = scaled(end - start, self.config.unload_threshold);
        let keep = (start.saturating_sub(margin), end.saturating_add(margin));

        let pinned = if self.config.pin_ancestors {
            pinned_ancestors(state, start, end)
        } else {
            HashSet::new()
        };

        let items = &state.items;
        let mut candidates: Vec<(Instant, usize)> = state
            .chunks
            .iter()
            .filter(|(_, c)| c.state == ChunkState::Loaded && !c.intersects(keep.0, keep.1))
            .filter(|(_, c)| {
                pinned.is_empty()
                    || !items
                        .range(c.start, c.end)
                        .any(|(_, record)| pinned.contains(&record.id))
            })
            .map(|(index, c)| (c.last_accessed, *index))
            .collect();
        candidates.sort();

        let mut evicted = Vec::with_capacity(candidates.len());
        for (_, index) in candidates {
            if let Some(c) = state.chunks.remove(&index) {
                let records = state.items.remove_range(c.start, c.end);
                state.counters.evictions += 1;
                evicted.push((c.start, c.end, records));
            }
        }
        if !evicted.is_empty() {
            debug!(
                evicted = evicted.len(),
                keep_start = keep.0,
                keep_end = keep.1,
                resident = state.items.len(),
                "Evicted chunks under memory pressure"
            );
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::InMemorySource;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| Record::new(format!("n{}", i)).with_path(format!("{}.", i + 1)))
            .collect()
    }

    fn loader_with(config: LoaderConfig, n: usize) -> (ChunkLoader, Arc<InMemorySource>) {
        let source = Arc::new(InMemorySource::new(records(n)));
        let loader = ChunkLoader::new(config, source.clone()).unwrap();
        loader.set_total_items(n);
        (loader, source)
    }

    async fn settle() {
        sleep(Duration::from_millis(500)).await;
    }

    /// Fails every fetch whose offset is listed; delays every fetch.
    struct FlakySource {
        inner: InMemorySource,
        failing: HashSet<usize>,
        delay: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DataSource for FlakySource {
        async fn fetch(
            &self,
            request: FetchRequest,
            cancel: CancellationToken,
        ) -> Result<Vec<Record>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }
            if self.failing.contains(&request.offset) {
                return Err(SourceError::Unavailable("backend down".to_string()));
            }
            self.inner.fetch(request, cancel).await
        }

        async fn count(&self, predicate: &Predicate) -> Result<usize, SourceError> {
            self.inner.count(predicate).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_load_issues_two_fetches() {
        let (loader, source) = loader_with(LoaderConfig::default(), 1000);
        let report = loader.load_initial().await.unwrap();

        assert_eq!(report.fetched, vec![(0, 50), (50, 100)]);
        assert_eq!(source.fetch_count(), 2);
        assert!(loader.is_range_loaded(0, 100));
        assert!(!loader.is_range_loaded(0, 101));
        assert_eq!(loader.get_item(99).map(|r| r.id.clone()), Some("n99".to_string()));
        assert!(loader.get_item(100).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_viewport_is_idempotent() {
        let (loader, source) = loader_with(LoaderConfig::default(), 1000);

        let first = loader.update_viewport(0, 50);
        assert_eq!(first.extended, (0, 100));
        assert_eq!(first.queued, vec![(0, 50), (50, 100)]);
        let second = loader.update_viewport(0, 50);
        assert!(second.queued.is_empty());
        settle().await;
        assert_eq!(source.fetch_count(), 2);

        let third = loader.update_viewport(0, 50);
        assert!(third.queued.is_empty());
        settle().await;
        assert_eq!(source.fetch_count(), 2);
        assert!(loader.is_range_loaded(0, 100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_updates() {
        let (loader, source) = loader_with(LoaderConfig::default(), 1000);

        loader.update_viewport(0, 50);
        sleep(Duration::from_millis(50)).await;
        let update = loader.update_viewport(500, 550);
        assert_eq!(update.dropped, vec![(0, 50), (50, 100)]);
        settle().await;

        // only the chunks around the final viewport were fetched
        assert_eq!(source.fetch_count(), 3);
        assert!(loader.is_range_loaded(450, 600));
        assert_eq!(loader.chunk_state(0), ChunkState::Absent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_viewport_jump_evicts_before_fetching() {
        let config = LoaderConfig {
            max_loaded_items: 200,
            ..LoaderConfig::default()
        };
        let (loader, source) = loader_with(config, 1000);
        let mut events = loader.subscribe();

        loader.update_viewport(0, 50);
        settle().await;
        assert_eq!(loader.metrics().loaded_items, 100);

        let update = loader.update_viewport(900, 950);
        assert_eq!(update.evicted, vec![(0, 50), (50, 100)]);
        assert_eq!(update.queued, vec![(850, 900), (900, 950), (950, 1000)]);
        // evicted synchronously, nothing fetched yet
        assert!(loader.snapshot().is_empty());
        assert_eq!(source.fetch_count(), 2);

        settle().await;
        assert_eq!(source.fetch_count(), 5);
        assert!(loader.is_range_loaded(850, 1000));
        assert_eq!(loader.metrics().evictions, 2);

        let mut evicted = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, LoaderEvent::ChunkEvicted { .. }) {
                evicted += 1;
            }
        }
        assert_eq!(evicted, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_spares_viewport_chunks() {
        let config = LoaderConfig {
            chunk_size: 10,
            max_loaded_items: 10,
            load_ahead_factor: 0.0,
            unload_threshold: 0.0,
            ..LoaderConfig::default()
        };
        let (loader, _source) = loader_with(config, 100);
        loader.force_load_range(0, 40).await.unwrap();

        let update = loader.update_viewport(5, 35);
        assert!(update.evicted.is_empty());
        assert!(loader.is_range_loaded(0, 40));

        let update = loader.update_viewport(25, 35);
        assert_eq!(update.evicted, vec![(0, 10), (10, 20)]);
        assert!(loader.is_range_loaded(20, 40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pinned_ancestor_chunk_survives_eviction() {
        let mut data = vec![Record::new("root").with_path("1.")];
        data.extend((1..40).map(|i| Record::new(format!("c{}", i)).with_path(format!("1.{}.", i))));
        let source = Arc::new(InMemorySource::new(data));
        let config = LoaderConfig {
            chunk_size: 10,
            max_loaded_items: 10,
            load_ahead_factor: 0.0,
            unload_threshold: 0.0,
            ..LoaderConfig::default()
        };
        let loader = ChunkLoader::new(config.clone(), source.clone()).unwrap();
        loader.set_total_items(40);
        loader.force_load_range(0, 40).await.unwrap();

        let update = loader.update_viewport(30, 40);
        assert_eq!(update.evicted, vec![(10, 20), (20, 30)]);
        assert!(loader.is_range_loaded(0, 10));

        let unpinned = ChunkLoader::new(
            LoaderConfig {
                pin_ancestors: false,
                ..config
            },
            source,
        )
        .unwrap();
        unpinned.set_total_items(40);
        unpinned.force_load_range(0, 40).await.unwrap();
        let update = unpinned.update_viewport(30, 40);
        assert_eq!(update.evicted.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_synthesized_scheme_pins_by_parent_links() {
        // no source paths: ancestry is only known through parent ids
        let mut data = vec![Record::new("root")];
        data.extend((1..40).map(|i| Record::new(format!("c{}", i)).with_parent("root")));
        let source = Arc::new(InMemorySource::new(data));
        let config = LoaderConfig {
            chunk_size: 10,
            max_loaded_items: 10,
            load_ahead_factor: 0.0,
            unload_threshold: 0.0,
            ..LoaderConfig::default()
        };
        let loader = ChunkLoader::new(config, source).unwrap();
        loader.set_path_scheme(PathScheme::Synthesized);
        loader.set_total_items(40);
        loader.force_load_range(0, 40).await.unwrap();

        let update = loader.update_viewport(30, 40);
        assert_eq!(update.evicted, vec![(10, 20), (20, 30)]);
        assert_eq!(loader.get_item(0).unwrap().id, "root");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let source = Arc::new(InMemorySource::new(records(10)));
        let config = LoaderConfig {
            chunk_size: 0,
            ..LoaderConfig::default()
        };
        assert!(matches!(
            ChunkLoader::new(config, source),
            Err(LoaderError::InvalidConfig(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_reports_records_to_listeners() {
        struct Released(Mutex<Vec<String>>);
        impl FetchListener for Released {
            fn on_chunk_loaded(&self, _start: usize, _records: &[Arc<Record>]) {}
            fn on_chunk_evicted(&self, _start: usize, records: &[Arc<Record>]) {
                self.0.lock().extend(records.iter().map(|r| r.id.clone()));
            }
        }

        let config = LoaderConfig {
            chunk_size: 10,
            max_loaded_items: 10,
            load_ahead_factor: 0.0,
            unload_threshold: 0.0,
            ..LoaderConfig::default()
        };
        let (loader, _source) = loader_with(config, 40);
        let released = Arc::new(Released(Mutex::new(Vec::new())));
        loader.add_listener(released.clone());
        loader.force_load_range(0, 20).await.unwrap();

        loader.update_viewport(30, 40);
        let ids = released.0.lock().clone();
        assert_eq!(ids.len(), 20);
        assert!(ids.contains(&"n0".to_string()));
        assert!(ids.contains(&"n19".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_chunk_is_isolated() {
        let source = Arc::new(FlakySource {
            inner: InMemorySource::new(records(200)),
            failing: [50].into_iter().collect(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        });
        let loader = ChunkLoader::new(LoaderConfig::default(), source.clone()).unwrap();
        loader.set_total_items(200);

        let report = loader.force_load_range(0, 150).await.unwrap();
        assert_eq!(report.fetched, vec![(0, 50), (100, 150)]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!((report.failed[0].0, report.failed[0].1), (50, 100));
        assert!(!report.is_complete());

        assert!(loader.is_range_loaded(0, 50));
        assert!(loader.is_range_loaded(100, 150));
        assert_eq!(loader.chunk_state(60), ChunkState::Absent);
        assert_eq!(loader.metrics().failures, 1);

        // not retried automatically, but the next request re-attempts it
        settle().await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        loader.update_viewport(50, 100);
        settle().await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_discards_in_flight_result() {
        let source = Arc::new(FlakySource {
            inner: InMemorySource::new(records(100)),
            failing: HashSet::new(),
            delay: Duration::from_millis(50),
            calls: AtomicUsize::new(0),
        });
        let loader = ChunkLoader::new(LoaderConfig::default(), source).unwrap();
        loader.set_total_items(100);

        let background = loader.clone();
        let task = tokio::spawn(async move { background.force_load_range(0, 50).await });
        sleep(Duration::from_millis(10)).await;
        assert_eq!(loader.chunk_state(0), ChunkState::Loading);

        loader.reset();
        let report = task.await.unwrap().unwrap();
        assert_eq!(report.discarded, 1);
        assert!(loader.snapshot().is_empty());
        assert_eq!(loader.metrics().discarded, 1);
        assert_eq!(loader.chunk_state(0), ChunkState::Absent);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_cancels_debounce() {
        let (loader, source) = loader_with(LoaderConfig::default(), 1000);
        loader.update_viewport(0, 50);
        loader.reset();
        settle().await;
        assert_eq!(source.fetch_count(), 0);
        assert_eq!(loader.metrics().pending_chunks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicted_chunk_reloads_from_cache() {
        let config = LoaderConfig {
            max_loaded_items: 50,
            debounce_delay_ms: 10_000,
            ..LoaderConfig::default()
        };
        let (loader, source) = loader_with(config, 1000);
        loader.force_load_range(0, 50).await.unwrap();

        let update = loader.update_viewport(500, 550);
        assert_eq!(update.evicted, vec![(0, 50)]);
        assert!(loader.get_item(0).is_none());

        let report = loader.force_load_range(0, 50).await.unwrap();
        assert_eq!(report.cache_hits, vec![(0, 50)]);
        assert_eq!(source.fetch_count(), 1);
        assert_eq!(loader.get_item(0).map(|r| r.id.clone()), Some("n0".to_string()));
        assert_eq!(loader.metrics().cache_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_viewport_is_covered_after_debounce() {
        for (start, end) in [(0, 10), (37, 93), (480, 520), (950, 1000), (990, 2000)] {
            let (loader, _source) = loader_with(LoaderConfig::default(), 1000);
            loader.update_viewport(start, end);
            settle().await;
            assert!(loader.is_range_loaded(start, end), "[{}, {})", start, end);
            for index in start..end.min(1000) {
                assert!(loader.get_item(index).is_some(), "index {}", index);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_and_listener() {
        struct Recorder(Mutex<Vec<usize>>);
        impl FetchListener for Recorder {
            fn on_chunk_loaded(&self, start: usize, _records: &[Arc<Record>]) {
                self.0.lock().push(start);
            }
        }

        let (loader, _source) = loader_with(LoaderConfig::default(), 120);
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        loader.add_listener(recorder.clone());

        loader.force_load_range(0, 120).await.unwrap();
        assert_eq!(*recorder.0.lock(), vec![0, 50, 100]);

        let metrics = loader.metrics();
        assert_eq!(metrics.loaded_items, 120);
        assert_eq!(metrics.loaded_chunks, 3);
        assert_eq!(metrics.fetches, 3);
        assert_eq!(metrics.cached_chunks, 3);
        assert!(metrics.average_latency_ms.is_some());
    }

    #[tokio::test]
    async fn test_invalid_and_empty_ranges() {
        let (loader, _source) = loader_with(LoaderConfig::default(), 10);
        assert!(matches!(
            loader.force_load_range(5, 2).await,
            Err(LoaderError::InvalidRange { start: 5, end: 2 })
        ));
        let report = loader.force_load_range(20, 30).await.unwrap();
        assert_eq!(report.chunks_loaded(), 0);
        assert!(loader.is_range_loaded(3, 3));
        assert!(loader.update_viewport(10, 20).queued.is_empty());
    }

    #[test]
    fn test_without_runtime_flush_drives_fetching() {
        let source = Arc::new(InMemorySource::new(records(100)));
        let loader = ChunkLoader::new(LoaderConfig::default(), source.clone()).unwrap();
        loader.set_total_items(100);
        loader.update_viewport(0, 20);
        assert_eq!(loader.metrics().pending_chunks, 1);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let report = runtime.block_on(loader.flush());
        assert_eq!(report.fetched, vec![(0, 50)]);
        assert_eq!(source.fetch_count(), 1);
    }
}
