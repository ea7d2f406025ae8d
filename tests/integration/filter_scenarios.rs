//! Filtering through a tree view: ancestor expansion end to end

use crate::support::{memory_source, plant_records};
use canopy::config::CanopyConfig;
use canopy::filter::{ExpansionTier, FilterSource, SearchFilter, StructuralFilter, UserFilter};
use canopy::TreeView;

fn resident_ids(view: &TreeView) -> Vec<String> {
    view.snapshot().values().map(|r| r.id.clone()).collect()
}

#[tokio::test]
async fn test_deep_search_match_keeps_its_ancestors() {
    let mut view =
        TreeView::new(CanopyConfig::default(), memory_source(plant_records())).unwrap();
    assert!(view.set_search_filter(SearchFilter::new("gauge")));

    // Nothing has matched yet, so only roots can be re-admitted
    let first = view.apply_filters().await.unwrap();
    assert_eq!(first.filter.tier, Some(ExpansionTier::RootFallback));
    assert_eq!(resident_ids(&view), vec!["site-a", "gauge-7", "site-b"]);
    assert!(view.needs_refresh());

    let second = view.apply_filters().await.unwrap();
    assert_eq!(second.filter.tier, Some(ExpansionTier::PathPrefixes));
    assert_eq!(second.total_items, 3);
    assert_eq!(resident_ids(&view), vec!["site-a", "area-2", "gauge-7"]);
    assert!(!view.needs_refresh());

    let (matches, ancestors) = view.match_sets();
    assert_eq!(matches, vec!["gauge-7"]);
    assert_eq!(ancestors, vec!["area-2", "site-a"]);
    assert_eq!(view.children_of("area-2"), vec!["gauge-7"]);

    view.shutdown().await;
}

#[tokio::test]
async fn test_sort_depth_range_expansion_when_indexed() {
    let mut config = CanopyConfig::default();
    config.hierarchy.sort_position_indexed = true;
    config.hierarchy.depth_indexed = true;
    let mut view = TreeView::new(config, memory_source(plant_records())).unwrap();
    view.set_search_filter(SearchFilter::new("gauge"));

    view.apply_filters().await.unwrap();
    let outcome = view.apply_filters().await.unwrap();
    assert_eq!(outcome.filter.tier, Some(ExpansionTier::SortDepthRange));

    let ids = resident_ids(&view);
    for expected in ["site-a", "area-2", "gauge-7"] {
        assert!(ids.contains(&expected.to_string()), "missing {}", expected);
    }
    assert!(!ids.contains(&"site-b".to_string()));
    assert!(view.warnings().is_empty());

    view.shutdown().await;
}

#[tokio::test]
async fn test_user_filter_takes_precedence_over_search() {
    let mut view =
        TreeView::new(CanopyConfig::default(), memory_source(plant_records())).unwrap();
    view.set_search_filter(SearchFilter::new("gauge"));
    view.set_user_filter("status", UserFilter::parse("status=open").unwrap());

    let outcome = view.apply_filters().await.unwrap();
    assert_eq!(outcome.filter.source, FilterSource::User);
    let outcome = view.apply_filters().await.unwrap();
    assert_eq!(outcome.filter.tier, Some(ExpansionTier::PathPrefixes));
    assert_eq!(resident_ids(&view), vec!["site-a", "area-1", "pump-1"]);

    view.shutdown().await;
}

#[tokio::test]
async fn test_structural_filter_is_not_expanded() {
    let mut view =
        TreeView::new(CanopyConfig::default(), memory_source(plant_records())).unwrap();
    view.set_structural_filter("scope", StructuralFilter::ChildrenOf("site-a".to_string()));

    let outcome = view.apply_filters().await.unwrap();
    assert_eq!(outcome.filter.source, FilterSource::Structural);
    assert_eq!(outcome.filter.tier, None);
    assert_eq!(resident_ids(&view), vec!["area-1", "area-2"]);
    assert!(!view.needs_refresh());

    view.shutdown().await;
}

#[tokio::test]
async fn test_root_fallback_on_path_only_records() {
    let records = plant_records()
        .into_iter()
        .map(|mut record| {
            record.parent_id = None;
            record.depth = None;
            record
        })
        .collect();
    let mut view = TreeView::new(CanopyConfig::default(), memory_source(records)).unwrap();
    view.set_search_filter(SearchFilter::new("gauge"));

    let first = view.apply_filters().await.unwrap();
    assert_eq!(first.filter.tier, Some(ExpansionTier::RootFallback));
    assert_eq!(resident_ids(&view), vec!["site-a", "gauge-7", "site-b"]);

    let second = view.apply_filters().await.unwrap();
    assert_eq!(second.filter.tier, Some(ExpansionTier::PathPrefixes));
    assert_eq!(resident_ids(&view), vec!["site-a", "area-2", "gauge-7"]);

    view.shutdown().await;
}
