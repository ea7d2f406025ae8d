//! Filter Orchestrator
//!
//! Merges the structural, search and user slots into one predicate for the data
//! source. Search and user predicates are widened so that every surviving node
//! keeps its ancestor chain and the tree renders connected to a root.
//!
//! Ancestor expansion works from what matched in previous fetches: each fetch
//! result driven by a search/user predicate is fed back through
//! [`FilterOrchestrator::update_matching_nodes`], and the next combined filter
//! re-admits the ancestors of those matches.

use crate::filter::predicate::Predicate;
use crate::filter::state::{FilterSlot, FilterState, SearchFilter, StructuralFilter, UserFilter};
use crate::filter::{CombineMode, FilterConfig, SortRangeBound};
use crate::hierarchy::{HierarchyConfig, HierarchyPath, PathScheme};
use crate::types::{Field, NodeId, Record};
use serde::Serialize;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use tracing::{debug, warn};

/// How ancestors were re-admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionTier {
    /// Single range over indexed sort position and depth
    SortDepthRange,
    /// Literal set of ancestor paths derived from known matches
    PathPrefixes,
    /// Degraded: root-level nodes only; deep matches may appear disconnected
    RootFallback,
}

/// Which slot produced the combined predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterSource {
    Unrestricted,
    Structural,
    Search,
    User,
    /// `CombineMode::CombineAll` with more than one slot active
    Combined,
}

/// Output of [`FilterOrchestrator::get_combined_filter`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CombinedFilter {
    pub predicate: Predicate,
    pub source: FilterSource,
    /// `None` when no expansion applied (structural or unrestricted)
    pub tier: Option<ExpansionTier>,
}

impl CombinedFilter {
    pub fn is_degraded(&self) -> bool {
        self.tier == Some(ExpansionTier::RootFallback)
    }

    /// Stable hash of predicate, source and tier. Equal fingerprints mean the
    /// data source would return the same rows.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        serde_json::to_string(self)
            .unwrap_or_default()
            .hash(&mut hasher);
        hasher.finish()
    }
}

/// Hierarchy metadata of a node that satisfied the search/user predicate
#[derive(Debug, Clone, PartialEq)]
struct MatchInfo {
    path: Option<HierarchyPath>,
    depth: Option<u32>,
    sort_position: Option<u64>,
}

/// Filter orchestrator. Owns the filter slots and the derived match sets.
#[derive(Debug)]
pub struct FilterOrchestrator {
    config: FilterConfig,
    hierarchy: HierarchyConfig,
    state: FilterState,
    matches: HashMap<NodeId, MatchInfo>,
    ancestor_paths: BTreeSet<HierarchyPath>,
    path_index: HashMap<HierarchyPath, NodeId>,
}

impl FilterOrchestrator {
    pub fn new(config: FilterConfig, hierarchy: HierarchyConfig) -> Self {
        Self {
            config,
            hierarchy,
            state: FilterState::new(),
            matches: HashMap::new(),
            ancestor_paths: BTreeSet::new(),
            path_index: HashMap::new(),
        }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    pub fn state(&self) -> &FilterState {
        &self.state
    }

    pub fn is_active(&self, slot: FilterSlot) -> bool {
        self.state.is_active(slot)
    }

    pub fn set_structural_filter(&mut self, key: impl Into<String>, filter: StructuralFilter) {
        self.state.structural.insert(key.into(), filter);
    }

    pub fn clear_structural_filter(&mut self, key: &str) -> bool {
        self.state.structural.remove(key).is_some()
    }

    pub fn clear_structural_filters(&mut self) {
        self.state.structural.clear();
    }

    /// Set the search slot. Text shorter than `min_search_length` (after
    /// trimming) clears it instead. Returns whether the slot is now active.
    pub fn set_search_filter(&mut self, search: SearchFilter) -> bool {
        let active = search.text.trim().chars().count() >= self.config.min_search_length.max(1);
        let next = active.then_some(search);
        if self.state.search != next {
            self.state.search = next;
            self.invalidate_matches();
        }
        active
    }

    pub fn clear_search_filter(&mut self) {
        if self.state.search.take().is_some() {
            self.invalidate_matches();
        }
    }

    pub fn set_user_filter(&mut self, key: impl Into<String>, filter: UserFilter) {
        let key = key.into();
        if self.state.user.get(&key) != Some(&filter) {
            self.state.user.insert(key, filter);
            self.invalidate_matches();
        }
    }

    pub fn clear_user_filter(&mut self, key: &str) -> bool {
        let removed = self.state.user.remove(key).is_some();
        if removed {
            self.invalidate_matches();
        }
        removed
    }

    pub fn clear_user_filters(&mut self) {
        if !self.state.user.is_empty() {
            self.state.user.clear();
            self.invalidate_matches();
        }
    }

    /// Ids that satisfied the search/user predicate in fetches so far.
    pub fn matching_ids(&self) -> BTreeSet<NodeId> {
        self.matches.keys().cloned().collect()
    }

    /// Resident ids whose paths are ancestors of a match.
    pub fn ancestor_ids(&self) -> BTreeSet<NodeId> {
        self.ancestor_paths
            .iter()
            .filter_map(|path| self.path_index.get(path).cloned())
            .filter(|id| !self.matches.contains_key(id))
            .collect()
    }

    /// Ancestor paths of every match with a known position.
    pub fn ancestor_paths(&self) -> &BTreeSet<HierarchyPath> {
        &self.ancestor_paths
    }

    /// Drop path index entries of records that are no longer resident.
    /// Match sets are kept; they drive the next expansion.
    pub fn forget_records<'a, I>(&mut self, records: I)
    where
        I: IntoIterator<Item = &'a Record>,
    {
        let gone: HashSet<&str> = records.into_iter().map(|r| r.id.as_str()).collect();
        if !gone.is_empty() {
            self.path_index.retain(|_, id| !gone.contains(id.as_str()));
        }
    }

    /// Replace every locally derived position, e.g. after the arena
    /// re-synthesized paths. Matches not listed keep their last position.
    pub fn reindex_positions<I>(&mut self, positions: I)
    where
        I: IntoIterator<Item = (NodeId, HierarchyPath)>,
    {
        self.path_index.clear();
        for (id, path) in positions {
            if let Some(info) = self.matches.get_mut(&id) {
                info.path = Some(path.clone());
            }
            self.path_index.insert(path, id);
        }
        self.rebuild_ancestor_paths();
    }

    /// Position of a fetched record as far as expansion is concerned. With
    /// synthesized paths the source's path is not trusted; positions arrive
    /// through [`Self::reindex_positions`].
    fn position_of(&self, record: &Record) -> Option<HierarchyPath> {
        match self.hierarchy.path_scheme {
            PathScheme::External => record.hierarchy_path(),
            PathScheme::Synthesized => None,
        }
    }

    /// Number of resident paths indexed for ancestor lookup
    pub fn indexed_paths(&self) -> usize {
        self.path_index.len()
    }

    /// Forget the path index, e.g. after the dataset changed.
    pub fn reset_index(&mut self) {
        self.path_index.clear();
        self.invalidate_matches();
    }

    /// The un-expanded predicate match sets are derived from: search/user per
    /// the combine mode. `None` when neither slot is active.
    pub fn base_predicate(&self) -> Option<(Predicate, FilterSource)> {
        let user_active = self.state.is_active(FilterSlot::User);
        let search = self
            .state
            .search
            .as_ref()
            .map(|s| s.to_predicate(&self.config.search_fields));

        match self.config.combine_mode {
            CombineMode::Precedence => {
                if user_active {
                    Some((self.state.user_predicate(), FilterSource::User))
                } else {
                    search.map(|p| (p, FilterSource::Search))
                }
            }
            CombineMode::CombineAll => match (user_active, search) {
                (true, Some(search)) => Some((
                    Predicate::and(vec![self.state.user_predicate(), search]),
                    FilterSource::Combined,
                )),
                (true, None) => Some((self.state.user_predicate(), FilterSource::User)),
                (false, Some(search)) => Some((search, FilterSource::Search)),
                (false, None) => None,
            },
        }
    }

    /// Combine the active slots into a single predicate.
    ///
    /// Precedence mode: user, else search (both ancestor-expanded), else the
    /// AND of structural filters, else no restriction. Combine-all mode ANDs
    /// the expanded search/user predicate with the structural filters.
    pub fn get_combined_filter(&self) -> CombinedFilter {
        let combined = self.combine();
        if combined.is_degraded() {
            warn!(
                source = ?combined.source,
                known_matches = self.matches.len(),
                "Ancestor expansion degraded to root-level nodes; deep matches may appear disconnected"
            );
        }
        combined
    }

    /// Fingerprint of the filter [`Self::get_combined_filter`] would return.
    pub fn combined_fingerprint(&self) -> u64 {
        self.combine().fingerprint()
    }

    fn combine(&self) -> CombinedFilter {
        let structural_active = self.state.is_active(FilterSlot::Structural);

        let Some((base, source)) = self.base_predicate() else {
            if structural_active {
                return CombinedFilter {
                    predicate: self.state.structural_predicate(),
                    source: FilterSource::Structural,
                    tier: None,
                };
            }
            return CombinedFilter {
                predicate: Predicate::All,
                source: FilterSource::Unrestricted,
                tier: None,
            };
        };

        let (expanded, tier) = self.expand_ancestors(base);

        match self.config.combine_mode {
            CombineMode::CombineAll if structural_active => CombinedFilter {
                predicate: Predicate::and(vec![expanded, self.state.structural_predicate()]),
                source: FilterSource::Combined,
                tier: Some(tier),
            },
            _ => CombinedFilter {
                predicate: expanded,
                source,
                tier: Some(tier),
            },
        }
    }

    /// Recompute match sets from a fetch result.
    ///
    /// The result also contains re-admitted ancestors, so the base predicate
    /// is re-evaluated per record. Matches accumulate until the owning slot
    /// changes. Every record's path is indexed for [`Self::ancestor_ids`].
    pub fn update_matching_nodes<'a, I>(&mut self, records: I)
    where
        I: IntoIterator<Item = &'a Record>,
    {
        let base = self.base_predicate().map(|(p, _)| p);
        let mut added = 0usize;
        for record in records {
            let path = self.position_of(record);
            if let Some(path) = &path {
                self.path_index.insert(path.clone(), record.id.clone());
            }
            let Some(base) = &base else {
                continue;
            };
            if base.matches(record) {
                if let Some(path) = &path {
                    self.ancestor_paths.extend(path.ancestors());
                }
                let info = MatchInfo {
                    path,
                    depth: record.depth,
                    sort_position: record.sort_position,
                };
                if self.matches.insert(record.id.clone(), info).is_none() {
                    added += 1;
                }
            } else if self.matches.remove(&record.id).is_some() {
                self.rebuild_ancestor_paths();
            }
        }
        if added > 0 {
            debug!(
                added,
                total = self.matches.len(),
                ancestors = self.ancestor_paths.len(),
                "Updated matching nodes"
            );
        }
    }

    fn invalidate_matches(&mut self) {
        self.matches.clear();
        self.ancestor_paths.clear();
    }

    fn rebuild_ancestor_paths(&mut self) {
        self.ancestor_paths = self
            .matches
            .values()
            .filter_map(|m| m.path.as_ref())
            .flat_map(|p| p.ancestors())
            .collect();
    }

    fn expand_ancestors(&self, base: Predicate) -> (Predicate, ExpansionTier) {
        if self.matches.is_empty() {
            return (self.root_fallback(base), ExpansionTier::RootFallback);
        }

        if self.hierarchy.sort_position_indexed && self.hierarchy.depth_indexed {
            let sorts: Vec<u64> = self.matches.values().filter_map(|m| m.sort_position).collect();
            let depths: Vec<u32> = self.matches.values().filter_map(|m| m.depth).collect();
            if sorts.len() == self.matches.len() && depths.len() == self.matches.len() {
                let bound = match self.config.sort_range_bound {
                    SortRangeBound::FirstMatch => sorts.iter().min(),
                    SortRangeBound::LastMatch => sorts.iter().max(),
                };
                if let (Some(&bound), Some(&max_depth)) = (bound, depths.iter().max()) {
                    let range = Predicate::and(vec![
                        Predicate::at_most(Field::SortPosition, bound),
                        Predicate::at_most(Field::Depth, max_depth),
                    ]);
                    return (
                        Predicate::or(vec![base, range]),
                        ExpansionTier::SortDepthRange,
                    );
                }
            }
        }

        if self.matches.values().all(|m| m.path.is_some()) {
            if self.ancestor_paths.is_empty() {
                // Every match is a root
                return (base, ExpansionTier::PathPrefixes);
            }
            match self.hierarchy.path_scheme {
                PathScheme::External => {
                    let values: Vec<Value> = self
                        .ancestor_paths
                        .iter()
                        .map(|p| Value::String(p.to_string()))
                        .collect();
                    return (
                        Predicate::or(vec![base, Predicate::one_of(Field::Path, values)]),
                        ExpansionTier::PathPrefixes,
                    );
                }
                // The source does not know local paths; ask for ancestor ids
                PathScheme::Synthesized => {
                    let ids: Option<Vec<Value>> = self
                        .ancestor_paths
                        .iter()
                        .map(|p| self.path_index.get(p).map(|id| Value::String(id.clone())))
                        .collect();
                    if let Some(ids) = ids {
                        return (
                            Predicate::or(vec![base, Predicate::one_of(Field::Id, ids)]),
                            ExpansionTier::PathPrefixes,
                        );
                    }
                }
            }
        }

        (self.root_fallback(base), ExpansionTier::RootFallback)
    }

    fn root_fallback(&self, base: Predicate) -> Predicate {
        let roots = match self.hierarchy.path_scheme {
            PathScheme::External => Predicate::root_level(),
            PathScheme::Synthesized => Predicate::IsNull {
                field: Field::ParentId,
            },
        };
        Predicate::or(vec![base, roots])
    }
}
