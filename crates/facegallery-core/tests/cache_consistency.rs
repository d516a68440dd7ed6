mod common;

use common::{horizontal_gradient, open_persistent_store, open_store, stripes_jpeg, vertical_gradient, ThumbnailEmbedder};
use facegallery_core::store::CACHE_FILE_NAME;
use facegallery_core::EmbeddingCache;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_embeddings_computed_once_across_queries() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = Arc::new(ThumbnailEmbedder::new("thumb-v1"));
    let store = open_store(dir.path(), embedder.clone());

    store.add_reference("amy", &horizontal_gradient()).unwrap();
    store.add_reference("ben", &vertical_gradient()).unwrap();

    store.embedding_index().unwrap();
    store.embedding_index().unwrap();
    assert_eq!(embedder.calls(), 2);

    store.add_reference("cat", &stripes_jpeg()).unwrap();
    let index = store.embedding_index().unwrap();
    assert_eq!(index.len(), 3);
    assert_eq!(embedder.calls(), 3);
}

#[test]
fn test_concurrent_index_builds_share_computation() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = Arc::new(ThumbnailEmbedder::new("thumb-v1").with_delay(Duration::from_millis(50)));
    let store = open_store(dir.path(), embedder.clone());

    store.add_reference("amy", &horizontal_gradient()).unwrap();
    store.add_reference("ben", &vertical_gradient()).unwrap();

    std::thread::scope(|s| {
        let handles: Vec<_> = (0..4).map(|_| s.spawn(|| store.embedding_index().unwrap())).collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().len(), 2);
        }
    });

    assert_eq!(embedder.calls(), 2);
    assert_eq!(store.cached_embeddings(), 2);
}

#[test]
fn test_cache_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let embedder = Arc::new(ThumbnailEmbedder::new("thumb-v1"));
        let store = open_persistent_store(dir.path(), embedder.clone());
        store.add_reference("amy", &horizontal_gradient()).unwrap();
        store.embedding_index().unwrap();
        assert_eq!(embedder.calls(), 1);
    }

    let embedder = Arc::new(ThumbnailEmbedder::new("thumb-v1"));
    let store = open_persistent_store(dir.path(), embedder.clone());
    assert_eq!(store.cached_embeddings(), 1);
    assert_eq!(store.embedding_index().unwrap().len(), 1);
    assert_eq!(embedder.calls(), 0);

    // The cache file itself is never listed as a label or reference.
    assert_eq!(store.list_labels().unwrap().len(), 1);
}

#[test]
fn test_version_change_recomputes_and_prunes() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open_persistent_store(dir.path(), Arc::new(ThumbnailEmbedder::new("thumb-v1")));
        store.add_reference("amy", &horizontal_gradient()).unwrap();
        store.add_reference("ben", &vertical_gradient()).unwrap();
        store.embedding_index().unwrap();
        assert_eq!(store.cached_embeddings(), 2);
    }

    let embedder = Arc::new(ThumbnailEmbedder::new("thumb-v2"));
    let store = open_persistent_store(dir.path(), embedder.clone());
    assert_eq!(store.cached_embeddings(), 0);

    let index = store.embedding_index().unwrap();
    assert_eq!(index.version(), "thumb-v2");
    assert_eq!(index.len(), 2);
    assert_eq!(embedder.calls(), 2);
    assert!(index
        .iter()
        .all(|(_, embedding)| embedding.model_version.as_deref() == Some("thumb-v2")));
}

#[test]
fn test_references_deleted_offline_are_pruned_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let removed_path = {
        let store = open_persistent_store(dir.path(), Arc::new(ThumbnailEmbedder::new("thumb-v1")));
        let amy = store.add_reference("amy", &horizontal_gradient()).unwrap();
        store.add_reference("ben", &vertical_gradient()).unwrap();
        store.embedding_index().unwrap();
        amy.path
    };
    std::fs::remove_file(&removed_path).unwrap();

    let embedder = Arc::new(ThumbnailEmbedder::new("thumb-v1"));
    let store = open_persistent_store(dir.path(), embedder.clone());
    assert_eq!(store.cached_embeddings(), 1);
    assert_eq!(store.embedding_index().unwrap().len(), 1);
    assert_eq!(embedder.calls(), 0);
}

#[test]
fn test_removal_during_index_build_stays_evicted() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = Arc::new(ThumbnailEmbedder::new("thumb-v1").with_delay(Duration::from_millis(300)));
    let store = open_persistent_store(dir.path(), embedder.clone());
    let amy = store.add_reference("amy", &horizontal_gradient()).unwrap();

    let index = std::thread::scope(|s| {
        let building = s.spawn(|| store.embedding_index().unwrap());
        s.spawn(|| {
            std::thread::sleep(Duration::from_millis(100));
            store.remove_reference(&amy.id).unwrap();
        })
        .join()
        .unwrap();
        building.join().unwrap()
    });

    assert_eq!(embedder.calls(), 1);
    assert!(index.is_empty());
    assert!(store.references(None).unwrap().is_empty());
    assert_eq!(store.cached_embeddings(), 0);
    drop(store);

    // Nothing was left behind in the database either.
    let cache = EmbeddingCache::open(&dir.path().join(CACHE_FILE_NAME)).unwrap();
    assert!(cache.is_empty());
}

#[test]
fn test_label_removal_during_index_build_stays_evicted() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = Arc::new(ThumbnailEmbedder::new("thumb-v1").with_delay(Duration::from_millis(300)));
    let store = open_store(dir.path(), embedder);
    store.add_reference("ben", &vertical_gradient()).unwrap();

    std::thread::scope(|s| {
        let building = s.spawn(|| store.embedding_index().unwrap());
        std::thread::sleep(Duration::from_millis(100));
        store
            .remove_label(&facegallery_core::Label::parse("ben").unwrap())
            .unwrap();
        assert!(building.join().unwrap().is_empty());
    });

    assert_eq!(store.cached_embeddings(), 0);
}
