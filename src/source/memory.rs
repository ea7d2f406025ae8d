//! In-memory data source backed by a record vector.

use crate::error::SourceError;
use crate::filter::predicate::{compare_values, Predicate};
use crate::source::{DataSource, FetchRequest};
use crate::types::{Record, SortDirection, SortSpec};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use tokio_util::sync::CancellationToken;

/// Data source over a vector of records. Counts fetch calls.
#[derive(Debug, Default)]
pub struct InMemorySource {
    records: RwLock<Vec<Record>>,
    fetches: AtomicUsize,
}

impl InMemorySource {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records: RwLock::new(records),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Load a JSON array of records.
    pub fn from_json_file(path: &Path) -> Result<Self, SourceError> {
        let raw = std::fs::read_to_string(path)?;
        let records: Vec<Record> =
            serde_json::from_str(&raw).map_err(|e| SourceError::Decode(e.to_string()))?;
        Ok(Self::new(records))
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Replace the dataset.
    pub fn replace(&self, records: Vec<Record>) {
        *self.records.write() = records;
    }

    /// Number of `fetch` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(AtomicOrdering::SeqCst)
    }

    fn select(&self, predicate: &Predicate, sort: &SortSpec) -> Vec<Record> {
        let mut selected: Vec<Record> = self
            .records
            .read()
            .iter()
            .filter(|record| predicate.matches(record))
            .cloned()
            .collect();
        selected.sort_by(|a, b| compare_records(a, b, sort));
        selected
    }
}

/// Order two records by the sort field. Records missing the field sort last.
pub fn compare_records(a: &Record, b: &Record, sort: &SortSpec) -> Ordering {
    let ordering = match (a.field(&sort.field), b.field(&sort.field)) {
        (Some(x), Some(y)) => compare_values(&sort.field, &x, &y).unwrap_or(Ordering::Equal),
        (Some(_), None) => return Ordering::Less,
        (None, Some(_)) => return Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    match sort.direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    }
}

#[async_trait]
impl DataSource for InMemorySource {
    async fn fetch(
        &self,
        request: FetchRequest,
        cancel: CancellationToken,
    ) -> Result<Vec<Record>, SourceError> {
        self.fetches.fetch_add(1, AtomicOrdering::SeqCst);
        if cancel.is_cancelled() {
            return Err(SourceError::Cancelled);
        }
        let selected = self.select(&request.predicate, &request.sort);
        Ok(selected
            .into_iter()
            .skip(request.offset)
            .take(request.limit)
            .collect())
    }

    async fn count(&self, predicate: &Predicate) -> Result<usize, SourceError> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|record| predicate.matches(record))
            .count())
    }
}
