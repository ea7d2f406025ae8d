//! Hierarchy
//!
//! Position encoding for tree nodes, the node arena, and path scheme checks.

pub mod arena;
pub mod path;
pub mod scheme;

pub use arena::{ArenaError, ArenaNode, NodeArena};
pub use path::{
    ancestor_chain, compare_paths, is_descendant_of, parent_of, sibling_position, HierarchyPath,
    PathParseError, PathPosition,
};
pub use scheme::{PathScheme, PathSchemeAudit};

use serde::{Deserialize, Serialize};

/// Hierarchy configuration: path provenance and what the source indexes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HierarchyConfig {
    #[serde(default)]
    pub path_scheme: PathScheme,

    /// The data source indexes the sort position attribute
    #[serde(default)]
    pub sort_position_indexed: bool,

    /// The data source indexes the depth attribute
    #[serde(default)]
    pub depth_indexed: bool,
}
