//! Loader behaviour against an in-memory source

use crate::support::{flat_records, memory_source, FailingSource};
use canopy::filter::Predicate;
use canopy::loader::{ChunkLoader, ChunkState, LoaderConfig, LoaderEvent, LoaderQuery};
use canopy::source::InMemorySource;
use canopy::SortSpec;
use std::sync::Arc;
use std::time::Duration;

fn loader_over(source: Arc<InMemorySource>, config: LoaderConfig, total: usize) -> ChunkLoader {
    let loader = ChunkLoader::new(config, source).unwrap();
    loader.reconfigure(
        LoaderQuery {
            predicate: Predicate::All,
            sort: SortSpec::default(),
        },
        total,
    );
    loader
}

#[tokio::test(start_paused = true)]
async fn test_viewport_loads_only_nearby_chunks() {
    let source = memory_source(flat_records(1000));
    let loader = loader_over(source.clone(), LoaderConfig::default(), 1000);

    let update = loader.update_viewport(100, 120);
    assert_eq!(update.extended, (80, 140));
    assert_eq!(update.queued, vec![(50, 100), (100, 150)]);

    let report = loader.flush().await;
    assert_eq!(report.fetched.len(), 2);
    assert!(report.is_complete());
    assert_eq!(source.fetch_count(), 2);

    assert!(loader.is_range_loaded(100, 120));
    assert_eq!(loader.get_item(100).unwrap().id, "n100");
    assert!(loader.get_item(0).is_none());
    assert_eq!(loader.chunk_state(0), ChunkState::Absent);
}

#[tokio::test(start_paused = true)]
async fn test_rapid_scrolling_is_debounced() {
    let source = memory_source(flat_records(1000));
    let loader = loader_over(source.clone(), LoaderConfig::default(), 1000);
    let mut events = loader.subscribe();

    for start in [0, 200, 400, 600] {
        loader.update_viewport(start, start + 20);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(source.fetch_count(), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(loader.is_range_loaded(600, 620));
    // Chunks queued for the abandoned positions were dropped, not fetched
    assert!(source.fetch_count() <= 2);

    match events.recv().await.unwrap() {
        LoaderEvent::ChunkLoaded { start, .. } => assert!(start >= 550),
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_memory_stays_bounded_while_scrolling() {
    let config = LoaderConfig {
        max_loaded_items: 200,
        cache_size: 0,
        ..LoaderConfig::default()
    };
    let loader = loader_over(memory_source(flat_records(1000)), config, 1000);

    for start in (0..=900).step_by(60) {
        loader.update_viewport(start, start + 20);
        loader.flush().await;
        assert!(loader.metrics().loaded_items <= 200);
        assert!(loader.is_range_loaded(start, start + 20));
    }

    assert!(loader.metrics().evictions > 0);
    assert_eq!(loader.chunk_state(0), ChunkState::Absent);
}

#[tokio::test(start_paused = true)]
async fn test_failed_chunk_does_not_block_neighbours() {
    let source = Arc::new(FailingSource {
        inner: InMemorySource::new(flat_records(300)),
        fail_offset: 50,
    });
    let loader = ChunkLoader::new(LoaderConfig::default(), source).unwrap();
    loader.set_total_items(300);

    let report = loader.force_load_range(0, 150).await.unwrap();
    assert_eq!(report.fetched, vec![(0, 50), (100, 150)]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, 50);

    assert!(loader.get_item(10).is_some());
    assert!(loader.get_item(60).is_none());
    assert_ne!(loader.chunk_state(60), ChunkState::Loaded);
    assert_eq!(loader.metrics().failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_reset_clears_resident_records() {
    let loader = loader_over(memory_source(flat_records(200)), LoaderConfig::default(), 200);
    loader.load_initial().await.unwrap();
    assert_eq!(loader.snapshot().len(), 100);

    loader.set_total_items(150);
    assert!(loader.snapshot().is_empty());
    assert_eq!(loader.metrics().fetches, 0);
    assert_eq!(loader.chunk_state(0), ChunkState::Absent);
}
