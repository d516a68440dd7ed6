mod common;

use common::{face, horizontal_gradient, open_store, stripes_jpeg, vertical_gradient, FixedDetector, ThumbnailEmbedder};
use facegallery_core::label::LabelError;
use facegallery_core::service::ServiceError;
use facegallery_core::store::StoreError;
use facegallery_core::types::LabelSummary;
use facegallery_core::{ExhaustiveMatcher, GalleryService, Label, MatchOptions, Matcher};
use std::sync::Arc;

fn summary(name: &str, count: usize) -> LabelSummary {
    LabelSummary {
        name: name.to_string(),
        count,
    }
}

#[test]
fn test_enrol_and_recognize_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = Arc::new(ThumbnailEmbedder::new("thumb-v1"));
    let store = open_store(dir.path(), embedder.clone());

    assert!(store.list_labels().unwrap().is_empty());

    let alice = store.add_reference("alice", &horizontal_gradient()).unwrap();
    assert_eq!(store.list_labels().unwrap(), vec![summary("alice", 1)]);

    let query = embedder.embed_bytes(&horizontal_gradient());
    let index = store.embedding_index().unwrap();
    let matches = ExhaustiveMatcher
        .find_matches(&query, &index, &MatchOptions::default())
        .unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].label.as_str(), "alice");
    assert_eq!(matches[0].reference_id, alice.id);
    assert!(matches[0].distance.abs() < 1e-4);

    let unrelated = embedder.embed_bytes(&vertical_gradient());
    let matches = ExhaustiveMatcher
        .find_matches(&unrelated, &index, &MatchOptions::default())
        .unwrap();
    assert!(matches.is_empty());
}

#[test]
fn test_empty_gallery_matches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = Arc::new(ThumbnailEmbedder::new("thumb-v1"));
    let store = open_store(dir.path(), embedder.clone());

    let index = store.embedding_index().unwrap();
    assert!(index.is_empty());
    let matches = ExhaustiveMatcher
        .find_matches(&embedder.embed_bytes(&horizontal_gradient()), &index, &MatchOptions::default())
        .unwrap();
    assert!(matches.is_empty());
    assert_eq!(embedder.calls(), 1);
}

#[test]
fn test_same_label_twice_gives_two_references() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), Arc::new(ThumbnailEmbedder::new("thumb-v1")));

    let first = store.add_reference("bob", &horizontal_gradient()).unwrap();
    let second = store.add_reference("bob", &horizontal_gradient()).unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(store.list_labels().unwrap(), vec![summary("bob", 2)]);
    assert_eq!(store.references(Some(&Label::parse("bob").unwrap())).unwrap().len(), 2);
}

#[test]
fn test_same_image_under_two_labels_is_independent() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), Arc::new(ThumbnailEmbedder::new("thumb-v1")));

    store.add_reference("carol", &stripes_jpeg()).unwrap();
    store.add_reference("dave", &stripes_jpeg()).unwrap();

    assert_eq!(store.list_labels().unwrap(), vec![summary("carol", 1), summary("dave", 1)]);
    let references = store.references(None).unwrap();
    assert!(references.iter().all(|r| r.path.extension().is_some_and(|e| e == "jpg")));
}

#[test]
fn test_concurrent_adds_to_one_label() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), Arc::new(ThumbnailEmbedder::new("thumb-v1")));
    let image = horizontal_gradient();

    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| store.add_reference("erin", &image).unwrap());
        }
    });

    assert_eq!(store.list_labels().unwrap(), vec![summary("erin", 8)]);
    let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("erin"))
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
        .collect();
    assert!(leftovers.is_empty(), "temp files left behind");
}

#[test]
fn test_labels_are_sanitized() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), Arc::new(ThumbnailEmbedder::new("thumb-v1")));

    let reference = store.add_reference("a/b", &horizontal_gradient()).unwrap();
    assert_eq!(reference.label.as_str(), "a_b");
    assert!(dir.path().join("a_b").is_dir());
    assert!(!dir.path().join("a").exists());

    for bad in ["", "   ", ".", "..", "../escape", ".hidden"] {
        assert!(
            matches!(
                store.add_reference(bad, &horizontal_gradient()),
                Err(StoreError::InvalidLabel(_))
            ),
            "label {bad:?} should be rejected"
        );
    }
    assert!(!dir.path().parent().unwrap().join("escape").exists());
    assert_eq!(store.list_labels().unwrap(), vec![summary("a_b", 1)]);
}

#[test]
fn test_invalid_bytes_write_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), Arc::new(ThumbnailEmbedder::new("thumb-v1")));

    let result = store.add_reference("frank", b"GIF89a but not really");
    assert!(matches!(result, Err(StoreError::InvalidImage(_))));
    assert!(!dir.path().join("frank").exists());
    assert!(store.list_labels().unwrap().is_empty());
}

#[test]
fn test_unreadable_reference_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = Arc::new(ThumbnailEmbedder::new("thumb-v1"));
    let store = open_store(dir.path(), embedder.clone());

    store.add_reference("gina", &horizontal_gradient()).unwrap();
    std::fs::write(dir.path().join("gina").join("broken.jpg"), b"not a jpeg").unwrap();

    assert_eq!(store.list_labels().unwrap(), vec![summary("gina", 2)]);
    let index = store.embedding_index().unwrap();
    assert_eq!(index.len(), 1);
    assert_eq!(index.skipped(), 1);
}

#[test]
fn test_hidden_entries_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), Arc::new(ThumbnailEmbedder::new("thumb-v1")));

    std::fs::create_dir(dir.path().join(".trash")).unwrap();
    std::fs::write(dir.path().join(".trash").join("x.png"), horizontal_gradient()).unwrap();
    store.add_reference("hank", &horizontal_gradient()).unwrap();
    std::fs::write(dir.path().join("hank").join(".partial.tmp"), b"junk").unwrap();

    assert_eq!(store.list_labels().unwrap(), vec![summary("hank", 1)]);
}

#[test]
fn test_remove_reference_and_label() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), Arc::new(ThumbnailEmbedder::new("thumb-v1")));

    let first = store.add_reference("ivy", &horizontal_gradient()).unwrap();
    store.add_reference("ivy", &vertical_gradient()).unwrap();
    store.add_reference("jack", &stripes_jpeg()).unwrap();
    store.embedding_index().unwrap();
    assert_eq!(store.cached_embeddings(), 3);

    store.remove_reference(&first.id).unwrap();
    assert_eq!(store.cached_embeddings(), 2);
    assert!(!first.path.exists());
    assert!(matches!(
        store.remove_reference(&first.id),
        Err(StoreError::ReferenceNotFound(_))
    ));

    assert_eq!(store.remove_label(&Label::parse("jack").unwrap()).unwrap(), 1);
    assert_eq!(store.cached_embeddings(), 1);
    assert_eq!(store.list_labels().unwrap(), vec![summary("ivy", 1)]);
    assert!(matches!(
        store.remove_label(&Label::parse("jack").unwrap()),
        Err(StoreError::LabelNotFound(_))
    ));
}

#[test]
fn test_service_detect_and_recognize() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = Arc::new(ThumbnailEmbedder::new("thumb-v1"));
    let detector = Arc::new(FixedDetector::new(vec![face(-4.2, 3.0, 20.0, 40.0)]));
    let store = Arc::new(open_store(dir.path(), embedder));
    let service = GalleryService::new(detector.clone(), store, MatchOptions::default());

    let detected = service.detect(&horizontal_gradient()).unwrap();
    assert_eq!(detected.count, 1);
    let face = detected.faces[0];
    assert_eq!((face.x, face.y), (0, 3));
    assert!(face.x + face.w <= 32 && face.y + face.h <= 32);

    assert!(matches!(service.detect(b"garbage"), Err(ServiceError::InvalidImage(_))));
    assert_eq!(detector.calls(), 1);

    let added = service.add_face(&horizontal_gradient(), "kim").unwrap();
    let recognized = service.recognize(&horizontal_gradient()).unwrap();
    assert_eq!(recognized.matches.len(), 1);
    assert_eq!(recognized.matches[0].identity, added.path);
    assert!(service.recognize(&vertical_gradient()).unwrap().matches.is_empty());
}

#[test]
fn test_service_rejects_escaping_removal() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(open_store(dir.path(), Arc::new(ThumbnailEmbedder::new("thumb-v1"))));
    let service = GalleryService::new(Arc::new(FixedDetector::new(vec![])), store, MatchOptions::default());

    assert!(matches!(
        service.remove_label(".."),
        Err(ServiceError::InvalidLabel(LabelError::Unsafe(_)))
    ));
    assert!(matches!(
        service.remove_reference("kim/../../etc"),
        Err(ServiceError::InvalidLabel(_))
    ));
}

#[test]
fn test_empty_label_directories_are_not_listed() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), Arc::new(ThumbnailEmbedder::new("thumb-v1")));

    std::fs::create_dir(dir.path().join("lena")).unwrap();
    assert!(store.list_labels().unwrap().is_empty());

    let only = store.add_reference("mia", &horizontal_gradient()).unwrap();
    store.add_reference("nina", &vertical_gradient()).unwrap();
    store.remove_reference(&only.id).unwrap();

    assert!(dir.path().join("mia").is_dir());
    assert_eq!(store.list_labels().unwrap(), vec![summary("nina", 1)]);
}

#[test]
fn test_labels_listed_in_lexical_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), Arc::new(ThumbnailEmbedder::new("thumb-v1")));

    for label in ["zoe", "adam", "Mike", "lee"] {
        store.add_reference(label, &horizontal_gradient()).unwrap();
    }

    let names: Vec<String> = store.list_labels().unwrap().into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["Mike", "adam", "lee", "zoe"]);
}

#[test]
fn test_overlong_label_is_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(dir.path(), Arc::new(ThumbnailEmbedder::new("thumb-v1")));

    let result = store.add_reference(&"x".repeat(300), &horizontal_gradient());
    assert!(matches!(
        result,
        Err(StoreError::InvalidLabel(LabelError::TooLong(300)))
    ));
    assert!(store.list_labels().unwrap().is_empty());
}
