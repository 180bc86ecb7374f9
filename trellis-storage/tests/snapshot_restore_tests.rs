use std::sync::Arc;

use tempfile::TempDir;
use trellis_core::{PersistenceConfig, TrellisConfig};
use trellis_storage::{
    InMemorySnapshotBackend, InvalidationReason, RecordCache, RestoreOutcome, SnapshotBackend,
    SnapshotSlot,
};
use trellis_test_utils::fixtures::{catalog_config, catalog_reader};
use trellis_test_utils::MockTableReader;

fn persistent_config(dir: &TempDir) -> TrellisConfig {
    let mut config = catalog_config();
    config.persistence = Some(PersistenceConfig {
        path: dir.path().join("snapshot"),
        max_size_mb: 16,
    });
    config
}

#[tokio::test]
async fn lmdb_snapshot_survives_reopen() {
    let dir = TempDir::new().expect("create temp dir");

    let refreshed = {
        let cache = RecordCache::open(persistent_config(&dir), Arc::new(catalog_reader()))
            .await
            .expect("open cache");
        assert_eq!(cache.restore_outcome(), &RestoreOutcome::Empty);
        let records = cache.refresh().await.expect("refresh");
        assert_eq!(cache.persist_failures(), 0);
        records
    };

    let reader = Arc::new(catalog_reader());
    let cache = RecordCache::open(persistent_config(&dir), reader.clone())
        .await
        .expect("reopen cache");

    assert!(cache.restore_outcome().is_restored());
    let restored = cache.read_table("courses").expect("courses restored");
    assert_eq!(restored.as_slice(), refreshed.as_slice());

    assert!(cache.ensure_warm().await.expect("warm").is_none());
    assert_eq!(reader.total_calls(), 0);
}

#[tokio::test]
async fn restore_missing_dependency_invalidates_and_rebuilds() {
    let backend = Arc::new(InMemorySnapshotBackend::new());

    {
        let cache = RecordCache::open_with_backend(
            catalog_config(),
            Arc::new(catalog_reader()),
            backend.clone(),
        )
        .await
        .expect("open cache");
        // Only the anchor is committed; its dependencies never are.
        cache.get("courses").await.expect("lazy fetch");
    }

    let reader = Arc::new(catalog_reader());
    let cache = RecordCache::open_with_backend(catalog_config(), reader.clone(), backend.clone())
        .await
        .expect("reopen cache");

    match cache.restore_outcome() {
        RestoreOutcome::Invalidated {
            reason: InvalidationReason::MissingTables(missing),
        } => {
            assert!(missing.contains(&"lessons".to_string()));
            assert!(!missing.contains(&"courses".to_string()));
        }
        other => panic!("expected missing tables, got {other:?}"),
    }
    // Rebuilt from the source during open.
    assert_eq!(reader.calls("courses"), 1);
    assert!(cache.read_table("lessons").is_some());
    assert!(backend.raw(SnapshotSlot::Data).is_some());
    assert!(backend.raw(SnapshotSlot::Schema).is_some());
}

#[tokio::test]
async fn corrupt_snapshot_triggers_one_rebuild_on_open() {
    let backend = Arc::new(InMemorySnapshotBackend::new());
    backend
        .put_raw(SnapshotSlot::Data, "{\"courses\": [")
        .expect("seed corrupt data");
    backend
        .put_raw(SnapshotSlot::Schema, "{}")
        .expect("seed schema");

    let reader = Arc::new(catalog_reader());
    let cache = RecordCache::open_with_backend(catalog_config(), reader.clone(), backend.clone())
        .await
        .expect("open cache");

    assert!(matches!(
        cache.restore_outcome(),
        RestoreOutcome::Invalidated {
            reason: InvalidationReason::Corrupt(_)
        }
    ));

    assert_eq!(reader.calls("courses"), 1);
    assert!(cache.read_table("courses").is_some());
    assert!(backend.raw(SnapshotSlot::Data).is_some());

    assert!(cache.ensure_warm().await.expect("warm").is_none());
    assert_eq!(reader.calls("courses"), 1);
}

#[tokio::test]
async fn failed_rebuild_on_open_leaves_cache_empty() {
    let backend = Arc::new(InMemorySnapshotBackend::new());
    backend
        .put_raw(SnapshotSlot::Data, "not json")
        .expect("seed corrupt data");

    let reader = catalog_reader();
    reader.fail_table("courses");
    let reader = Arc::new(reader);
    let cache = RecordCache::open_with_backend(catalog_config(), reader.clone(), backend)
        .await
        .expect("open survives an unreachable source");

    assert!(matches!(
        cache.restore_outcome(),
        RestoreOutcome::Invalidated { .. }
    ));
    assert_eq!(reader.calls("courses"), 1);
    assert!(cache.read_table("courses").is_none());
}

#[tokio::test]
async fn changed_relationships_invalidate_snapshot() {
    let backend = Arc::new(InMemorySnapshotBackend::new());

    {
        let cache = RecordCache::open_with_backend(
            catalog_config(),
            Arc::new(catalog_reader()),
            backend.clone(),
        )
        .await
        .expect("open cache");
        cache.refresh().await.expect("refresh");
    }

    let mut config = catalog_config();
    config
        .tables
        .insert("verbs".to_string(), vec!["pronouns".to_string()]);
    let cache = RecordCache::open_with_backend(config, Arc::new(catalog_reader()), backend)
        .await
        .expect("reopen cache");

    assert_eq!(
        cache.restore_outcome(),
        &RestoreOutcome::Invalidated {
            reason: InvalidationReason::SchemaChanged
        }
    );
}

#[tokio::test]
async fn every_commit_rewrites_the_snapshot() {
    let backend = Arc::new(InMemorySnapshotBackend::new());
    let cache = RecordCache::open_with_backend(
        catalog_config(),
        Arc::new(catalog_reader()),
        backend.clone(),
    )
    .await
    .expect("open cache");

    cache.get("verbs").await.expect("fetch verbs");
    cache.get("pronouns").await.expect("fetch pronouns");

    let stats = backend.stats().await.expect("stats");
    assert_eq!(stats.writes, 2);

    let data: serde_json::Value = serde_json::from_slice(
        &backend.raw(SnapshotSlot::Data).expect("data slot written"),
    )
    .expect("data slot is json");
    assert!(data.get("verbs").is_some());
    assert!(data.get("pronouns").is_some());
}

#[tokio::test]
async fn refresh_with_unreadable_source_keeps_cache_empty() {
    let backend = Arc::new(InMemorySnapshotBackend::new());
    let cache = RecordCache::open_with_backend(
        catalog_config(),
        Arc::new(MockTableReader::new()),
        backend.clone(),
    )
    .await
    .expect("open cache");

    assert!(cache.refresh().await.is_err());
    assert!(cache.read_table("courses").is_none());
    assert!(backend.raw(SnapshotSlot::Data).is_none());
}
