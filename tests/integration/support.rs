//! Shared fixtures

use async_trait::async_trait;
use canopy::error::SourceError;
use canopy::filter::Predicate;
use canopy::source::{DataSource, FetchRequest, InMemorySource};
use canopy::Record;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// `count` flat root records with paths `1.` .. `count.`
pub fn flat_records(count: usize) -> Vec<Record> {
    (0..count)
        .map(|i| {
            Record::new(format!("n{}", i))
                .with_path(format!("{}.", i + 1))
                .with_depth(0)
                .with_attribute("name", format!("Item {}", i))
        })
        .collect()
}

/// Three-level plant tree, in pre-order:
///
/// ```text
/// 1.     site-a    Site A
/// 1.1.   area-1    Area One
/// 1.1.1. pump-1    Pump One
/// 1.2.   area-2    Area Two
/// 1.2.1. gauge-7   Pressure Gauge
/// 2.     site-b    Site B
/// 2.1.   area-3    Area Three
/// ```
pub fn plant_records() -> Vec<Record> {
    let rows = [
        ("site-a", None, "1.", "Site A", "closed"),
        ("area-1", Some("site-a"), "1.1.", "Area One", "closed"),
        ("pump-1", Some("area-1"), "1.1.1.", "Pump One", "open"),
        ("area-2", Some("site-a"), "1.2.", "Area Two", "closed"),
        ("gauge-7", Some("area-2"), "1.2.1.", "Pressure Gauge", "closed"),
        ("site-b", None, "2.", "Site B", "closed"),
        ("area-3", Some("site-b"), "2.1.", "Area Three", "closed"),
    ];
    rows.iter()
        .enumerate()
        .map(|(position, (id, parent, path, name, status))| {
            let depth = path.matches('.').count() as u32 - 1;
            let mut record = Record::new(*id)
                .with_path(*path)
                .with_depth(depth)
                .with_sort_position(position as u64)
                .with_attribute("name", *name)
                .with_attribute("status", *status);
            record.parent_id = parent.map(str::to_string);
            record
        })
        .collect()
}

/// Fails every fetch whose offset equals `fail_offset`.
pub struct FailingSource {
    pub inner: InMemorySource,
    pub fail_offset: usize,
}

#[async_trait]
impl DataSource for FailingSource {
    async fn fetch(
        &self,
        request: FetchRequest,
        cancel: CancellationToken,
    ) -> Result<Vec<Record>, SourceError> {
        if request.offset == self.fail_offset {
            return Err(SourceError::Unavailable("backend timeout".to_string()));
        }
        self.inner.fetch(request, cancel).await
    }

    async fn count(&self, predicate: &Predicate) -> Result<usize, SourceError> {
        self.inner.count(predicate).await
    }
}

pub fn memory_source(records: Vec<Record>) -> Arc<InMemorySource> {
    Arc::new(InMemorySource::new(records))
}
