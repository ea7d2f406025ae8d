//! Data Source Contract
//!
//! The authoritative records live behind a paged, filterable query interface.
//! The core only needs predicate filtering, attribute sorting and offset/limit
//! paging; it never joins, and it never computes sort ordinals itself.

pub mod memory;

pub use memory::InMemorySource;

use crate::error::SourceError;
use crate::filter::Predicate;
use crate::types::{Record, SortSpec};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// One page request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub predicate: Predicate,
    /// Index of the first record in the filtered, sorted result
    pub offset: usize,
    pub limit: usize,
    pub sort: SortSpec,
}

/// Paged query interface consumed by the loader.
///
/// `fetch` returns at most `limit` records starting at `offset` of the result
/// filtered by `predicate` and ordered by `sort`. Implementations may observe
/// `cancel` and return [`SourceError::Cancelled`] early; the loader never
/// relies on it, since stale results are discarded anyway.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch(
        &self,
        request: FetchRequest,
        cancel: CancellationToken,
    ) -> Result<Vec<Record>, SourceError>;

    /// Number of records matching `predicate`.
    async fn count(&self, predicate: &Predicate) -> Result<usize, SourceError>;
}
