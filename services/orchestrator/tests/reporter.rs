use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use modelops::BackendMode;
use orchestrator::config::{ManagerConfig, ReporterConfig};
use orchestrator::provider_memory::{InMemoryConnector, InMemoryProvider};
use orchestrator::reporter::{StatusCallback, StatusReporter};
use orchestrator::runtime::{ModelManager, SharedStore};
use orchestrator::state::live_status;
use statestore::{InMemoryStorage, StateStore, Storage};

fn store() -> (SharedStore, InMemoryStorage) {
    let mem = InMemoryStorage::new();
    let store = StateStore::new(Box::new(mem.clone()) as Box<dyn Storage>, Duration::ZERO);
    (Arc::new(store), mem)
}

fn reporter_config(path: &Path, interval: Duration) -> ReporterConfig {
    ReporterConfig {
        status_file: path.to_path_buf(),
        interval,
        error_backoff: Duration::from_millis(50),
        stop_timeout: Duration::from_secs(1),
    }
}

fn last_updated(path: &Path) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    text.lines()
        .rev()
        .find(|l| l.starts_with("Last Updated: "))
        .map(str::to_string)
}

#[tokio::test]
async fn test_periodic_ticks_then_silence_after_stop() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("SESSION_STATUS.md");
    let (store, mem) = store();
    let rep = StatusReporter::new(store, &reporter_config(&path, Duration::from_millis(100)), None);

    assert!(rep.start());
    let mut stamps = Vec::new();
    for _ in 0..6 {
        tokio::time::sleep(Duration::from_millis(55)).await;
        if let Some(s) = last_updated(&path) {
            if stamps.last() != Some(&s) {
                stamps.push(s);
            }
        }
    }
    assert!(stamps.len() >= 2, "saw {stamps:?}");
    assert!(mem.write_count() >= 2);

    rep.stop().await;
    let writes = mem.write_count();
    let stamp = last_updated(&path);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(mem.write_count(), writes);
    assert_eq!(last_updated(&path), stamp);
}

#[tokio::test]
async fn test_stop_after_timeout_waits_for_in_flight_tick() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("STATUS.md");
    let (store, mem) = store();
    // each render blocks well past the stop timeout
    let cb: StatusCallback = Arc::new(|| {
        std::thread::sleep(Duration::from_millis(300));
        Ok(Vec::new())
    });
    let mut cfg = reporter_config(&path, Duration::from_millis(10));
    cfg.stop_timeout = Duration::from_millis(20);
    let rep = StatusReporter::new(store, &cfg, Some(cb));

    assert!(rep.start());
    tokio::time::sleep(Duration::from_millis(60)).await;
    rep.stop().await;
    assert!(!rep.is_running());

    let writes = mem.write_count();
    let stamp = last_updated(&path);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(mem.write_count(), writes);
    assert_eq!(last_updated(&path), stamp);
}

#[tokio::test]
async fn test_update_now_renders_callback_sections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("STATUS.md");
    let (store, mem) = store();
    let cb: StatusCallback = Arc::new(|| Ok(vec![("Queries Served".to_string(), "12".to_string())]));
    let rep = StatusReporter::new(store, &reporter_config(&path, Duration::from_secs(60)), Some(cb));

    assert!(rep.update_now(true).await);
    assert_eq!(mem.write_count(), 1);
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("### Queries Served\n12"));
    assert!(text.contains("## Recovery Instructions"));
}

#[tokio::test]
async fn test_callback_error_is_written_inline() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("STATUS.md");
    let (store, _) = store();
    let cb: StatusCallback = Arc::new(|| Err(anyhow!("metrics source offline")));
    let rep = StatusReporter::new(store, &reporter_config(&path, Duration::from_secs(60)), Some(cb));

    assert!(rep.update_now(false).await);
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("Error getting additional status info: metrics source offline"));
    assert!(text.contains("Last Updated: "));
}

#[tokio::test]
async fn test_unwritable_status_file_fails_tick_but_loop_survives() {
    let dir = tempfile::tempdir().unwrap();
    // a directory where the file should be makes every write fail
    let path = dir.path().join("blocked");
    std::fs::create_dir(&path).unwrap();
    let (store, mem) = store();
    let rep = StatusReporter::new(store, &reporter_config(&path, Duration::from_millis(20)), None);

    assert!(!rep.update_now(true).await);
    assert!(rep.start());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rep.is_running());
    // the state store is still saved on each attempt
    assert!(mem.write_count() >= 2);
    rep.stop().await;
}

#[tokio::test]
async fn test_live_status_reports_manager_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("STATUS.md");
    let (store, _) = store();

    let local = Arc::new(InMemoryProvider::new(BackendMode::Local, "http://localhost:11434").with_models(["a"]));
    let connector = InMemoryConnector::new(true).with(local);
    let cfg = ManagerConfig {
        local_endpoint: "http://localhost:11434".into(),
        default_model: "a".into(),
        ..ManagerConfig::default()
    };
    let manager = Arc::new(ModelManager::new(cfg, Arc::new(connector), store.clone()));
    manager.bootstrap().await.unwrap();
    manager
        .record_query_outcome("top customers", None, Some(Duration::from_millis(1500)), Some("no such table".into()))
        .await;

    let rep = StatusReporter::new(
        store,
        &reporter_config(&path, Duration::from_secs(60)),
        Some(live_status(manager, Instant::now())),
    );
    assert!(rep.update_now(true).await);

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("### Backend\nLOCAL_ACTIVE (local @ http://localhost:11434)"));
    assert!(text.contains("### Active Model\na"));
    assert!(text.contains("llama3.2:1b"));
    assert!(text.contains("- Duration: 1.50s"));
    assert!(text.contains("- Error: no such table"));
    assert!(text.contains("`/mode local`"));
    assert!(text.contains("`/model a`"));
}
