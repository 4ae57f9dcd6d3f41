use std::time::Duration;

use modelops::{ActiveSelection, BackendMode, Catalog, ModelDescriptor};
use serde_json::json;
use statestore::{FileBackedStorage, PersistedState, QueryRecord, StateStore};

#[test]
fn test_forced_save_round_trips_through_fresh_instance() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data/session_state.json");

    let first = StateStore::new(FileBackedStorage::new(&path), Duration::from_secs(60));
    let active = ActiveSelection::new(BackendMode::Remote, "http://gpu:11434", "deepseek-r1:1.5b");
    let catalog = Catalog::from_models(
        BackendMode::Remote,
        "http://gpu:11434",
        vec![ModelDescriptor::new("deepseek-r1:1.5b", Some(1_181_116_006))],
    );
    first.update_model_info(&catalog, &active);
    first.update_config([("ollama_host", json!("http://gpu:11434")), ("theme", json!("dark"))]);
    assert!(first.save(true));

    let second = StateStore::open(FileBackedStorage::new(&path), Duration::from_secs(60));
    let loaded = second.snapshot();
    let original = first.snapshot();

    assert_eq!(loaded.active, original.active);
    assert_eq!(loaded.config, original.config);
    assert_eq!(loaded.catalog, original.catalog);
}

#[test]
fn test_missing_file_loads_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::open(
        FileBackedStorage::new(dir.path().join("nope.json")),
        Duration::ZERO,
    );
    let st = store.snapshot();
    let defaults = PersistedState::default();
    assert_eq!(st.config, defaults.config);
    assert_eq!(st.version, defaults.version);
    assert!(st.active.is_none());
}

#[test]
fn test_partial_document_merges_over_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, r#"{"config": {"ui_port": 9999}, "current_db": "shop"}"#).unwrap();

    let store = StateStore::open(FileBackedStorage::new(&path), Duration::ZERO);
    let st = store.snapshot();
    assert_eq!(st.config["ui_port"], 9999);
    assert_eq!(st.config["ollama_host"], "http://localhost:11434");
    assert_eq!(st.current_db.as_deref(), Some("shop"));
}

#[test]
fn test_truncated_file_is_tolerated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    std::fs::write(&path, r#"{"version": 1, "active": {"mode": "rem"#).unwrap();

    let store = StateStore::open(FileBackedStorage::new(&path), Duration::ZERO);
    assert!(store.snapshot().active.is_none());

    // next save replaces the damaged file with a complete document
    assert!(store.save(false));
    let text = std::fs::read_to_string(&path).unwrap();
    let _: PersistedState = serde_json::from_str(&text).unwrap();
}

#[test]
fn test_last_query_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let store = StateStore::new(FileBackedStorage::new(&path), Duration::ZERO);

    store.update_last_query(QueryRecord {
        question: "how many orders?".into(),
        query: Some("SELECT COUNT(*) FROM Orders".into()),
        duration_ms: Some(840),
        error: None,
        recorded_at: chrono::Utc::now(),
    });

    let reloaded = StateStore::open(FileBackedStorage::new(&path), Duration::ZERO);
    let q = reloaded.snapshot().last_query.unwrap();
    assert_eq!(q.query.as_deref(), Some("SELECT COUNT(*) FROM Orders"));
    assert_eq!(q.duration_ms, Some(840));
}
