//! Filtering
//!
//! Predicate model, filter slots, and the orchestrator that combines them.

pub mod orchestrator;
pub mod predicate;
pub mod state;

pub use orchestrator::{CombinedFilter, ExpansionTier, FilterOrchestrator, FilterSource};
pub use predicate::Predicate;
pub use state::{
    FilterSlot, FilterState, SearchFilter, StructuralFilter, UserCondition, UserFilter,
};

use crate::types::{Field, SortSpec};
use serde::{Deserialize, Serialize};

/// How search and user slots combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineMode {
    /// User filter wins over search; structural only when neither is active
    #[default]
    Precedence,
    /// AND of every active slot
    CombineAll,
}

/// Upper sort-position bound used by the sort/depth range expansion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortRangeBound {
    /// Minimum sort position among matches
    #[default]
    FirstMatch,
    /// Maximum sort position among matches; covers every match's ancestors
    LastMatch,
}

/// Filter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub combine_mode: CombineMode,

    /// Search text shorter than this (in characters) leaves the slot unset
    #[serde(default = "default_min_search_length")]
    pub min_search_length: usize,

    /// Fields searched when a search filter names none
    #[serde(default = "default_search_fields")]
    pub search_fields: Vec<Field>,

    #[serde(default)]
    pub sort_range_bound: SortRangeBound,

    /// Order the data source must return records in
    #[serde(default)]
    pub sort: SortSpec,
}

fn default_min_search_length() -> usize {
    1
}

fn default_search_fields() -> Vec<Field> {
    vec![Field::Attribute("name".to_string())]
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            combine_mode: CombineMode::default(),
            min_search_length: default_min_search_length(),
            search_fields: default_search_fields(),
            sort_range_bound: SortRangeBound::default(),
            sort: SortSpec::default(),
        }
    }
}
