//! Canopy: progressive loading of large hierarchical record sets
//!
//! Records live behind a paged, filterable [`source::DataSource`]. The
//! [`loader::ChunkLoader`] keeps only the chunks around the viewport resident,
//! the [`filter::FilterOrchestrator`] merges structural, search and user filters
//! into one predicate that keeps matches connected to their ancestors, and
//! [`view::TreeView`] ties both to a node arena built from hierarchy paths.

pub mod config;
pub mod error;
pub mod filter;
pub mod hierarchy;
pub mod loader;
pub mod logging;
pub mod source;
pub mod tooling;
pub mod types;
pub mod view;
pub mod worker;

pub use error::ApiError;
pub use types::{Field, NodeId, Record, SortDirection, SortSpec};
pub use view::TreeView;
