use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use trellis_cli::{commands, CliConfig, Command, JsonDirReader};
use trellis_storage::{InMemorySnapshotBackend, RecordCache};

fn demo_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("demo")
}

async fn demo_cache() -> RecordCache {
    let config = CliConfig::from_path(&demo_dir().join("trellis.toml")).expect("demo config");
    config.validate().expect("demo config is valid");
    let reader = Arc::new(JsonDirReader::new(demo_dir().join(&config.source_dir)));
    RecordCache::open_with_backend(
        config.cache,
        reader,
        Arc::new(InMemorySnapshotBackend::new()),
    )
    .await
    .expect("open cache")
}

#[tokio::test]
async fn demo_refresh_resolves_lessons() {
    let cache = demo_cache().await;
    let output = commands::run(&Command::Refresh, &cache)
        .await
        .expect("refresh");

    let course = &output["records"][0];
    assert_eq!(course["course_name"], json!("Spanish for Beginners"));
    assert_eq!(course["lessons"][0]["verbs"][1]["infinitive"], json!("tener"));
    assert_eq!(course["lessons"][1]["pronouns"][1]["text"], json!("tú"));
    // Lessons point back at courses; the back link is stripped.
    assert!(course["lessons"][0].get("courses").is_none());
    assert_eq!(output["unavailable_tables"], json!([]));
}

#[tokio::test]
async fn demo_lookup_and_record() {
    let cache = demo_cache().await;

    let meaning = commands::run(
        &Command::Lookup {
            path: "recCourse1.lessons.recLesson2.verbs[0].meaning".to_string(),
        },
        &cache,
    )
    .await
    .expect("lookup");
    assert_eq!(meaning, json!("to be (state)"));

    let lesson = commands::run(
        &Command::Record {
            table: "lessons".to_string(),
            id: "recLesson1".to_string(),
        },
        &cache,
    )
    .await
    .expect("record");
    assert_eq!(lesson["verbs"][0]["infinitive"], json!("ser"));
}
