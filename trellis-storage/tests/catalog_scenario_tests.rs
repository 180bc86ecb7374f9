use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::json;
use trellis_core::{EdgeGuard, FieldValue, RefreshError};
use trellis_storage::RecordCache;
use trellis_test_utils::assertions::{assert_absent, assert_linked, assert_no_back_references};
use trellis_test_utils::fixtures::{
    catalog_config, catalog_reader, course_lessons_config, course_lessons_reader,
};
use trellis_test_utils::MockTableReader;

async fn catalog_cache(reader: MockTableReader) -> (RecordCache, Arc<MockTableReader>) {
    let reader = Arc::new(reader);
    let cache = RecordCache::open(catalog_config(), reader.clone())
        .await
        .expect("open cache");
    (cache, reader)
}

#[tokio::test]
async fn refresh_resolves_course_lessons_scenario() {
    let cache = RecordCache::open(course_lessons_config(), Arc::new(course_lessons_reader()))
        .await
        .expect("open cache");

    let courses = cache.refresh().await.expect("refresh");

    assert_eq!(courses.len(), 1);
    assert_eq!(
        courses[0].to_json(),
        json!({
            "id": "recC1",
            "lessons": [
                { "id": "recL1", "name": "Intro" },
                { "id": "recL2", "name": "Basics" }
            ]
        })
    );
}

#[tokio::test]
async fn refresh_resolves_full_catalog() {
    let (cache, reader) = catalog_cache(catalog_reader()).await;

    let report = cache.refresh_detailed().await.expect("refresh");
    let course = &report.records[0];

    assert_linked(course, "lessons");
    assert_no_back_references(course, "courses", cache.graph());
    assert_eq!(
        cache.lookup("0.lessons[0].verbs[1].infinitive").expect("parse path"),
        Some(json!("estar"))
    );
    assert_eq!(
        cache
            .lookup("recCourse1.lessons.recLesson1.pronouns[1].text")
            .expect("parse path"),
        Some(json!("tú"))
    );
    // lessons -> verbs was followed under the first lesson only.
    assert_eq!(
        cache.lookup("0.lessons[1].verbs").expect("parse path"),
        Some(json!(["recVerbTener"]))
    );
    assert_eq!(
        cache
            .lookup("0.lessons[0].sentence_structures[0].slots[2]")
            .expect("parse path"),
        Some(json!("object"))
    );

    // Declared but unreachable from the anchor.
    assert_eq!(reader.calls("constituents"), 0);
    for table in ["courses", "lessons", "verbs", "pronouns", "tense_markers"] {
        assert_eq!(reader.calls(table), 1, "{table} should be fetched once");
    }
}

#[tokio::test]
async fn refresh_is_idempotent() {
    let (cache, _) = catalog_cache(catalog_reader()).await;

    let first = cache.refresh().await.expect("first refresh");
    let second = cache.refresh().await.expect("second refresh");
    assert_eq!(first, second);

    let resolver_output = cache
        .resolved_record("courses", "recCourse1")
        .await
        .expect("resolve")
        .expect("course exists");
    assert_eq!(resolver_output, first[0]);
}

#[tokio::test]
async fn dependent_failure_drops_only_that_link() {
    let reader = catalog_reader();
    reader.fail_table("pronouns");
    let (cache, reader) = catalog_cache(reader).await;

    let report = cache.refresh_detailed().await.expect("refresh survives");
    assert_eq!(report.unavailable_tables, vec!["pronouns".to_string()]);

    let FieldValue::LinkedList(lessons) = report.records[0]
        .get("lessons")
        .expect("lessons resolved")
    else {
        panic!("lessons should be a linked list");
    };
    for lesson in lessons {
        assert_absent(lesson, "pronouns");
    }
    assert_linked(&lessons[0], "verbs");

    // Not retried within the refresh; available again on demand afterwards.
    assert_eq!(reader.calls("pronouns"), 1);
    assert!(cache.read_table("pronouns").is_none());
    reader.heal_table("pronouns");
    let pronouns = cache.get("pronouns").await.expect("lazy fetch");
    assert_eq!(pronouns.len(), 2);
    assert_eq!(reader.calls("pronouns"), 2);
}

#[tokio::test]
async fn anchor_failure_fails_refresh() {
    let reader = catalog_reader();
    reader.fail_table("courses");
    let (cache, _) = catalog_cache(reader).await;

    let err = cache.refresh().await.expect_err("refresh should fail");
    assert!(matches!(err, RefreshError::AnchorFetch(ref e) if e.table == "courses"));
    assert!(cache.read_table("courses").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_gets_issue_one_fetch() {
    let (cache, reader) =
        catalog_cache(catalog_reader().with_latency(Duration::from_millis(25))).await;
    let cache = Arc::new(cache);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get("verbs").await })
        })
        .collect();

    for result in join_all(handles).await {
        let verbs = result.expect("task joined").expect("fetch");
        assert_eq!(verbs.len(), 3);
    }
    assert_eq!(reader.calls("verbs"), 1);
    assert_eq!(cache.fetch_stats().reader_calls, 1);
}

#[tokio::test]
async fn clear_all_forces_refetch() {
    let (cache, reader) = catalog_cache(catalog_reader()).await;

    cache.refresh().await.expect("refresh");
    assert_eq!(reader.calls("courses"), 1);
    cache.clear_all().await.expect("clear");

    assert!(cache.tables().is_empty());
    assert!(cache.read_table("courses").is_none());

    let courses = cache.get("courses").await.expect("refetch");
    assert_eq!(courses.len(), 1);
    assert_eq!(reader.calls("courses"), 2);
    assert_eq!(reader.total_calls(), 7);
}

#[tokio::test]
async fn branch_guard_resolves_every_lesson() {
    let mut config = catalog_config();
    config.edge_guard = EdgeGuard::Branch;
    let cache = RecordCache::open(config, Arc::new(catalog_reader()))
        .await
        .expect("open cache");

    let courses = cache.refresh().await.expect("refresh");
    let FieldValue::LinkedList(lessons) = courses[0].get("lessons").expect("lessons resolved")
    else {
        panic!("lessons should be a linked list");
    };
    for lesson in lessons {
        assert_linked(lesson, "verbs");
        assert_linked(lesson, "pronouns");
        assert_no_back_references(lesson, "lessons", cache.graph());
    }
    assert_eq!(
        cache
            .lookup("recCourse1.lessons.recLesson2.pronouns[0].text")
            .expect("parse path"),
        Some(json!("yo"))
    );
}

#[tokio::test]
async fn lazy_get_returns_unresolved_rows() {
    let (cache, _) = catalog_cache(catalog_reader()).await;

    let lessons = cache.get("lessons").await.expect("fetch");
    let lesson = lessons
        .iter()
        .find(|l| l.id == "recLesson2")
        .expect("lesson exists");
    assert_eq!(
        lesson.get("verbs"),
        Some(&FieldValue::references(["recVerbTener"]))
    );
    assert_eq!(
        cache.record("lessons", "recLesson1").map(|l| l.id),
        Some("recLesson1".to_string())
    );
}

#[tokio::test]
async fn overlapping_refreshes_both_complete() {
    let (cache, reader) =
        catalog_cache(catalog_reader().with_latency(Duration::from_millis(5))).await;

    let (first, second) = tokio::join!(cache.refresh(), cache.refresh());
    let first = first.expect("first refresh");
    let second = second.expect("second refresh");

    assert_eq!(first, second);
    assert_eq!(reader.calls("courses"), 2);
    assert_eq!(cache.read_table("courses").map(|c| c.len()), Some(1));
}
