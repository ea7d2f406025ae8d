//! Tree View
//!
//! Wires the filter orchestrator, the chunk loader, the node arena and the
//! task runner together behind the entry points a rendering layer uses.
//! Filter setters only record intent; [`TreeView::apply_filters`] turns the
//! combined filter into a new loader query.

use crate::config::{CanopyConfig, ConfigWarning};
use crate::error::{ApiError, LoaderError, WorkerError};
use crate::filter::{CombinedFilter, FilterOrchestrator, SearchFilter, StructuralFilter, UserFilter};
use crate::hierarchy::{ArenaError, HierarchyPath, NodeArena, PathScheme, PathSchemeAudit};
use crate::loader::{
    ChunkLoader, FetchListener, LoadReport, LoaderEvent, LoaderMetrics, LoaderQuery, ViewportUpdate,
};
use crate::source::DataSource;
use crate::types::{NodeId, Record};
use crate::worker::{Operation, OperationOutput, ProgressCallback, TaskRunner};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// State fed by every loaded chunk.
struct ViewShared {
    orchestrator: Mutex<FilterOrchestrator>,
    arena: Mutex<NodeArena>,
    audit: Mutex<PathSchemeAudit>,
    warnings: Mutex<Vec<ConfigWarning>>,
    scheme: PathScheme,
}

impl ViewShared {
    fn empty_arena(&self) -> NodeArena {
        match self.scheme {
            PathScheme::External => NodeArena::new(),
            PathScheme::Synthesized => NodeArena::with_local_paths(),
        }
    }

    /// Lock order is arena, then orchestrator.
    fn reindex_synthesized(&self, arena: &mut NodeArena) {
        arena.synthesize_paths();
        let positions: Vec<(NodeId, HierarchyPath)> = arena
            .positions()
            .map(|(id, path)| (id.clone(), path.clone()))
            .collect();
        self.orchestrator.lock().reindex_positions(positions);
    }
}

impl FetchListener for ViewShared {
    fn on_chunk_loaded(&self, _start: usize, records: &[Arc<Record>]) {
        let found = self
            .audit
            .lock()
            .observe(records.iter().map(|r| r.as_ref()));
        if !found.is_empty() {
            self.warnings.lock().extend(found);
        }

        let mut arena = self.arena.lock();
        for record in records {
            arena.insert(Arc::clone(record));
        }
        self.orchestrator
            .lock()
            .update_matching_nodes(records.iter().map(|r| r.as_ref()));
        if self.scheme == PathScheme::Synthesized {
            self.reindex_synthesized(&mut arena);
        }
    }

    fn on_chunk_evicted(&self, _start: usize, records: &[Arc<Record>]) {
        let mut arena = self.arena.lock();
        for record in records {
            arena.remove(&record.id);
        }
        self.orchestrator
            .lock()
            .forget_records(records.iter().map(|r| r.as_ref()));
        if self.scheme == PathScheme::Synthesized {
            self.reindex_synthesized(&mut arena);
        }
    }
}

/// Outcome of [`TreeView::apply_filters`]
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub filter: CombinedFilter,
    pub total_items: usize,
    pub initial: LoadReport,
}

/// Progressive, filtered view over a hierarchical data source.
pub struct TreeView {
    config: CanopyConfig,
    source: Arc<dyn DataSource>,
    loader: ChunkLoader,
    shared: Arc<ViewShared>,
    runner: TaskRunner,
    applied: Option<u64>,
}

impl TreeView {
    /// Build a view with a runner derived from `config.worker`.
    pub fn new(config: CanopyConfig, source: Arc<dyn DataSource>) -> Result<Self, ApiError> {
        config.validate().map_err(ApiError::ConfigError)?;
        let runner = TaskRunner::from_config(&config.worker);
        Self::with_runner(config, source, runner)
    }

    pub fn with_runner(
        config: CanopyConfig,
        source: Arc<dyn DataSource>,
        runner: TaskRunner,
    ) -> Result<Self, ApiError> {
        config.validate().map_err(ApiError::ConfigError)?;
        let mut warnings = Vec::new();
        let hierarchy = &config.hierarchy;
        if hierarchy.sort_position_indexed != hierarchy.depth_indexed {
            warnings.push(ConfigWarning::new(
                "hierarchy.depth_indexed",
                "sort/depth range expansion needs both sort_position_indexed and depth_indexed",
            ));
        }
        for warning in &warnings {
            tracing::warn!(key = %warning.key, "{}", warning.message);
        }

        let scheme = config.hierarchy.path_scheme;
        let shared = Arc::new(ViewShared {
            orchestrator: Mutex::new(FilterOrchestrator::new(
                config.filter.clone(),
                config.hierarchy.clone(),
            )),
            arena: Mutex::new(NodeArena::new()),
            audit: Mutex::new(PathSchemeAudit::new(scheme)),
            warnings: Mutex::new(warnings),
            scheme,
        });
        *shared.arena.lock() = shared.empty_arena();
        let loader = ChunkLoader::new(config.loader.clone(), Arc::clone(&source))?;
        loader.set_path_scheme(scheme);
        loader.add_listener(shared.clone());

        Ok(Self {
            config,
            source,
            loader,
            shared,
            runner,
            applied: None,
        })
    }

    pub fn config(&self) -> &CanopyConfig {
        &self.config
    }

    pub fn loader(&self) -> &ChunkLoader {
        &self.loader
    }

    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }

    pub fn set_structural_filter(&self, key: impl Into<String>, filter: StructuralFilter) {
        self.shared.orchestrator.lock().set_structural_filter(key, filter);
    }

    pub fn clear_structural_filter(&self, key: &str) -> bool {
        self.shared.orchestrator.lock().clear_structural_filter(key)
    }

    /// Returns whether the search slot is active afterwards; text shorter than
    /// `filter.min_search_length` clears it.
    pub fn set_search_filter(&self, search: SearchFilter) -> bool {
        self.shared.orchestrator.lock().set_search_filter(search)
    }

    pub fn clear_search_filter(&self) {
        self.shared.orchestrator.lock().clear_search_filter();
    }

    pub fn set_user_filter(&self, key: impl Into<String>, filter: UserFilter) {
        self.shared.orchestrator.lock().set_user_filter(key, filter);
    }

    pub fn clear_user_filter(&self, key: &str) -> bool {
        self.shared.orchestrator.lock().clear_user_filter(key)
    }

    /// The combined filter for the current slots
    pub fn combined_filter(&self) -> CombinedFilter {
        self.shared.orchestrator.lock().get_combined_filter()
    }

    /// Matching and re-admitted ancestor ids seen so far
    pub fn match_sets(&self) -> (Vec<NodeId>, Vec<NodeId>) {
        let orchestrator = self.shared.orchestrator.lock();
        (
            orchestrator.matching_ids().into_iter().collect(),
            orchestrator.ancestor_ids().into_iter().collect(),
        )
    }

    /// True when the combined filter differs from the one last applied,
    /// including a better ancestor expansion becoming available.
    pub fn needs_refresh(&self) -> bool {
        let current = self.shared.orchestrator.lock().combined_fingerprint();
        self.applied != Some(current)
    }

    /// Recompute the combined filter, count its rows, reset the loader onto
    /// it and run the initial load.
    pub async fn apply_filters(&mut self) -> Result<ApplyOutcome, ApiError> {
        let filter = self.combined_filter();
        let total_items = self.source.count(&filter.predicate).await?;

        self.loader.reconfigure(
            LoaderQuery {
                predicate: filter.predicate.clone(),
                sort: self.config.filter.sort.clone(),
            },
            total_items,
        );
        *self.shared.arena.lock() = self.shared.empty_arena();
        self.applied = Some(filter.fingerprint());

        let initial = self.loader.load_initial().await?;
        info!(
            source = ?filter.source,
            tier = ?filter.tier,
            total_items,
            loaded = initial.chunks_loaded(),
            "Filters applied"
        );
        Ok(ApplyOutcome {
            filter,
            total_items,
            initial,
        })
    }

    pub fn update_viewport(&self, start: usize, end: usize) -> ViewportUpdate {
        self.loader.update_viewport(start, end)
    }

    pub fn get_item(&self, index: usize) -> Option<Arc<Record>> {
        self.loader.get_item(index)
    }

    pub async fn force_load_range(&self, start: usize, end: usize) -> Result<LoadReport, LoaderError> {
        self.loader.force_load_range(start, end).await
    }

    /// Drop loaded data, match sets and the arena. Filter slots are kept.
    pub fn reset(&mut self) {
        self.loader.reset();
        self.shared.orchestrator.lock().reset_index();
        *self.shared.arena.lock() = self.shared.empty_arena();
        self.applied = None;
    }

    pub fn snapshot(&self) -> BTreeMap<usize, Arc<Record>> {
        self.loader.snapshot()
    }

    pub fn metrics(&self) -> LoaderMetrics {
        self.loader.metrics()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LoaderEvent> {
        self.loader.subscribe()
    }

    /// Configuration problems found so far
    pub fn warnings(&self) -> Vec<ConfigWarning> {
        self.shared.warnings.lock().clone()
    }

    /// Children of `id` among resident records
    pub fn children_of(&self, id: &str) -> Vec<NodeId> {
        self.shared.arena.lock().children_of(id).to_vec()
    }

    /// Move a resident node locally and re-path what changed.
    pub fn move_node(
        &self,
        id: &str,
        new_parent: Option<&str>,
        index: usize,
    ) -> Result<Vec<NodeId>, ArenaError> {
        self.shared.arena.lock().move_node(id, new_parent, index)
    }

    fn resident_records(&self) -> Vec<Arc<Record>> {
        self.loader.snapshot().into_values().collect()
    }

    /// Score resident records against `query`, best first.
    pub async fn rank_loaded_matches(
        &self,
        query: &str,
        progress: Option<ProgressCallback>,
    ) -> Result<Vec<(NodeId, u32)>, WorkerError> {
        let operation = Operation::ScoreSearch {
            query: query.to_string(),
            fields: self.config.filter.search_fields.clone(),
            records: self.resident_records(),
        };
        match self.runner.execute(operation, progress).await? {
            OperationOutput::Scores(scores) => Ok(scores),
            other => Err(unexpected("score_search", &other)),
        }
    }

    /// Depth-first ids under `root` among resident records.
    pub async fn assemble_subtree(&self, root: &str) -> Result<Vec<NodeId>, WorkerError> {
        let operation = Operation::AssembleSubtree {
            root: root.to_string(),
            records: self.resident_records(),
        };
        match self.runner.execute(operation, None).await? {
            OperationOutput::Subtree(ids) => Ok(ids),
            other => Err(unexpected("assemble_subtree", &other)),
        }
    }

    /// Synthesized paths for resident records.
    pub async fn recompute_paths(&self) -> Result<Vec<(NodeId, HierarchyPath)>, WorkerError> {
        let operation = Operation::RecomputePaths {
            records: self.resident_records(),
        };
        match self.runner.execute(operation, None).await? {
            OperationOutput::Paths(paths) => Ok(paths),
            other => Err(unexpected("recompute_paths", &other)),
        }
    }

    pub async fn shutdown(&self) {
        self.loader.reset();
        self.runner.shutdown().await;
    }
}

fn unexpected(operation: &str, output: &OperationOutput) -> WorkerError {
    WorkerError::Failed {
        operation: operation.to_string(),
        reason: format!("unexpected output {:?}", output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{ExpansionTier, Predicate, UserCondition};
    use crate::loader::LoaderConfig;
    use crate::source::InMemorySource;
    use crate::types::Field;
    use serde_json::Value;

    /// Two roots with three children each; one child per root is "open".
    fn dataset() -> Vec<Record> {
        let mut out = Vec::new();
        for r in 1..=2u32 {
            let root = format!("r{}", r);
            out.push(
                Record::new(root.clone())
                    .with_path(format!("{}.", r))
                    .with_depth(0)
                    .with_attribute("name", format!("root {}", r))
                    .with_attribute("status", "closed"),
            );
            for c in 1..=3u32 {
                out.push(
                    Record::new(format!("{}c{}", root, c))
                        .with_parent(root.clone())
                        .with_path(format!("{}.{}.", r, c))
                        .with_depth(1)
                        .with_attribute("name", format!("pump {}{}", r, c))
                        .with_attribute("status", if c == 2 { "open" } else { "closed" }),
                );
            }
        }
        out
    }

    fn view() -> (TreeView, Arc<InMemorySource>) {
        let source = Arc::new(InMemorySource::new(dataset()));
        let config = CanopyConfig {
            loader: LoaderConfig {
                chunk_size: 4,
                max_loaded_items: 100,
                ..LoaderConfig::default()
            },
            ..CanopyConfig::default()
        };
        let view = TreeView::with_runner(config, source.clone(), TaskRunner::inline()).unwrap();
        (view, source)
    }

    fn open_filter() -> UserFilter {
        UserFilter::new(
            Field::Attribute("status".to_string()),
            UserCondition::Equals(Value::from("open")),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_unfiltered_apply_loads_everything() {
        let (mut view, _source) = view();
        assert!(view.needs_refresh());
        let outcome = view.apply_filters().await.unwrap();
        assert_eq!(outcome.total_items, 8);
        assert_eq!(outcome.filter.predicate, Predicate::All);
        assert!(!view.needs_refresh());

        let ids: Vec<String> = view.snapshot().values().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec!["r1", "r1c1", "r1c2", "r1c3", "r2", "r2c1", "r2c2", "r2c3"]);
        assert_eq!(view.children_of("r1").len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_filter_upgrades_from_root_fallback() {
        let (mut view, _source) = view();
        view.set_user_filter("status", open_filter());

        let first = view.apply_filters().await.unwrap();
        assert!(first.filter.is_degraded());
        // roots plus the two matches
        assert_eq!(first.total_items, 4);

        let (matches, ancestors) = view.match_sets();
        assert_eq!(matches, vec!["r1c2".to_string(), "r2c2".to_string()]);
        assert_eq!(ancestors, vec!["r1".to_string(), "r2".to_string()]);
        assert!(view.needs_refresh());

        let second = view.apply_filters().await.unwrap();
        assert!(!second.filter.is_degraded());
        assert_eq!(second.total_items, 4);
        assert!(!view.needs_refresh());
    }

    #[tokio::test(start_paused = true)]
    async fn test_structural_filter_is_not_expanded() {
        let (mut view, _source) = view();
        view.set_structural_filter("scope", StructuralFilter::ChildrenOf("r2".to_string()));
        let outcome = view.apply_filters().await.unwrap();
        assert_eq!(outcome.total_items, 3);
        assert!(view.snapshot().values().all(|r| r.parent_id.as_deref() == Some("r2")));

        assert!(view.clear_structural_filter("scope"));
        assert!(view.needs_refresh());
    }

    #[tokio::test(start_paused = true)]
    async fn test_runner_helpers_over_resident_records() {
        let (mut view, _source) = view();
        view.apply_filters().await.unwrap();

        let ranked = view.rank_loaded_matches("pump 12", None).await.unwrap();
        assert_eq!(ranked[0], ("r1c2".to_string(), 3));

        let subtree = view.assemble_subtree("r2").await.unwrap();
        assert_eq!(subtree, vec!["r2", "r2c1", "r2c2", "r2c3"]);

        let paths = view.recompute_paths().await.unwrap();
        assert_eq!(paths.len(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_synthesized_scheme_warns_on_external_paths() {
        let source = Arc::new(InMemorySource::new(dataset()));
        let mut config = CanopyConfig::default();
        config.hierarchy.path_scheme = PathScheme::Synthesized;
        let mut view = TreeView::with_runner(config, source, TaskRunner::inline()).unwrap();
        view.apply_filters().await.unwrap();

        let warnings = view.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].key.starts_with("hierarchy"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_data_but_keeps_slots() {
        let (mut view, _source) = view();
        view.set_user_filter("status", open_filter());
        view.apply_filters().await.unwrap();
        view.reset();

        assert!(view.snapshot().is_empty());
        assert!(view.match_sets().0.is_empty());
        assert!(view.needs_refresh());
        assert!(view.combined_filter().is_degraded());
    }

    #[test]
    fn test_half_indexed_hierarchy_warns() {
        let mut config = CanopyConfig::default();
        config.hierarchy.sort_position_indexed = true;
        let view = TreeView::with_runner(
            config,
            Arc::new(InMemorySource::default()),
            TaskRunner::inline(),
        )
        .unwrap();
        assert_eq!(view.warnings().len(), 1);
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        let mut config = CanopyConfig::default();
        config.loader.chunk_size = 0;
        let result = TreeView::new(config, Arc::new(InMemorySource::default()));
        assert!(matches!(result, Err(ApiError::ConfigError(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scrolling_keeps_arena_within_resident_records() {
        let data: Vec<Record> = (0..1000u32)
            .map(|i| Record::new(format!("n{}", i)).with_path(format!("{}.", i + 1)))
            .collect();
        let source = Arc::new(InMemorySource::new(data));
        let config = CanopyConfig {
            loader: LoaderConfig {
                chunk_size: 50,
                max_loaded_items: 200,
                initial_load_size: 50,
                load_ahead_factor: 0.0,
                unload_threshold: 0.0,
                ..LoaderConfig::default()
            },
            ..CanopyConfig::default()
        };
        let mut view = TreeView::with_runner(config, source, TaskRunner::inline()).unwrap();
        view.apply_filters().await.unwrap();

        for start in (0..1000).step_by(100) {
            view.update_viewport(start, start + 50);
            view.loader().flush().await;

            let resident = view.snapshot().len();
            assert!(view.shared.arena.lock().len() <= resident);
            assert!(view.shared.orchestrator.lock().indexed_paths() <= resident);
        }
        assert!(view.snapshot().len() <= 250);
        assert!(view.shared.arena.lock().len() <= 250);
    }

    #[tokio::test(start_paused = true)]
    async fn test_synthesized_scheme_expands_through_parent_links() {
        let data: Vec<Record> = dataset()
            .into_iter()
            .map(|mut record| {
                record.path = None;
                record
            })
            .collect();
        let source = Arc::new(InMemorySource::new(data));
        let mut config = CanopyConfig::default();
        config.loader.chunk_size = 4;
        config.hierarchy.path_scheme = PathScheme::Synthesized;
        let mut view = TreeView::with_runner(config, source, TaskRunner::inline()).unwrap();
        view.set_user_filter("status", open_filter());

        let first = view.apply_filters().await.unwrap();
        assert!(first.filter.is_degraded());
        assert_eq!(first.total_items, 4);

        let (matches, ancestors) = view.match_sets();
        assert_eq!(matches, vec!["r1c2".to_string(), "r2c2".to_string()]);
        assert_eq!(ancestors, vec!["r1".to_string(), "r2".to_string()]);
        assert!(view.needs_refresh());

        let second = view.apply_filters().await.unwrap();
        assert_eq!(second.filter.tier, Some(ExpansionTier::PathPrefixes));
        assert_eq!(second.total_items, 4);
        assert!(view.warnings().is_empty());
        assert_eq!(view.children_of("r1"), vec!["r1c2".to_string()]);
    }
}
