//! Loader metrics

use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

/// Rolling window of fetch latencies.
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, sample: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Mean of the retained samples, `None` before the first fetch.
    pub fn average(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let total: Duration = self.samples.iter().sum();
        Some(total / self.samples.len() as u32)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Cumulative counters, reset with the loader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct LoaderCounters {
    pub fetches: usize,
    pub cache_hits: usize,
    pub failures: usize,
    pub evictions: usize,
    pub discarded: usize,
}

/// Point-in-time view of loader state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoaderMetrics {
    pub total_items: usize,
    pub loaded_items: usize,
    pub loaded_chunks: usize,
    /// Chunks queued or in flight
    pub pending_chunks: usize,
    pub cached_chunks: usize,
    pub fetches: usize,
    pub cache_hits: usize,
    pub failures: usize,
    pub evictions: usize,
    /// Results dropped because the loader was reset while they were in flight
    pub discarded: usize,
    pub average_latency_ms: Option<f64>,
}
