use chrono::Duration as ChronoDuration;
use chrono::Utc;
use monitor::{AppState, LogBuffer, LogEntry, MonitorServer};
use std::sync::Arc;
use storage::{DatabaseSpec, Progress, ProgressTracker, RotatingStore};
use tempfile::TempDir;

async fn start_test_server(dir: &TempDir) -> (String, ProgressTracker, LogBuffer) {
    let specs = vec![DatabaseSpec {
        name: "main".to_string(),
        path: dir.path().join("main.db"),
        storage_quota_bytes: 1024 * 1024 * 1024,
        monthly_write_limit: 1_000_000,
    }];
    let store = Arc::new(RotatingStore::open(specs, "main", ChronoDuration::days(7)).unwrap());

    let tracker = ProgressTracker::new(dir.path().join("progress.json"));
    tracker.load();
    let logs = LogBuffer::default();

    let state = AppState::new(store, tracker.handle(), logs.clone());
    let server = MonitorServer::bind("127.0.0.1:0".parse().unwrap(), state)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        server.serve().await.unwrap();
    });

    (format!("http://{addr}"), tracker, logs)
}

#[tokio::test]
async fn health_reports_ok_with_reachable_store() {
    let dir = TempDir::new().unwrap();
    let (base_url, _tracker, _logs) = start_test_server(&dir).await;

    let body: serde_json::Value = reqwest::get(format!("{base_url}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "ok");
    assert!(body["uptime_s"].is_u64());
    assert!(body["active_session_id"].is_null());
}

#[tokio::test]
async fn progress_reflects_saved_state() {
    let dir = TempDir::new().unwrap();
    let (base_url, tracker, _logs) = start_test_server(&dir).await;

    let mut progress = Progress {
        current_page: 12,
        processed: 550,
        succeeded: 540,
        failed: 10,
        ..Progress::default()
    };
    tracker.save(&mut progress).unwrap();

    let body: serde_json::Value = reqwest::get(format!("{base_url}/progress"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["current_page"], 12);
    assert_eq!(body["processed"], 550);
    assert_eq!(body["failed"], 10);
}

#[tokio::test]
async fn stats_includes_success_rate() {
    let dir = TempDir::new().unwrap();
    let (base_url, tracker, _logs) = start_test_server(&dir).await;

    let mut progress = Progress {
        processed: 100,
        succeeded: 80,
        failed: 20,
        ..Progress::default()
    };
    tracker.save(&mut progress).unwrap();

    let body: serde_json::Value = reqwest::get(format!("{base_url}/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["total_pages"], 0);
    assert!((body["success_rate"].as_f64().unwrap() - 0.8).abs() < 1e-9);
}

#[tokio::test]
async fn databases_returns_rotation_snapshot() {
    let dir = TempDir::new().unwrap();
    let (base_url, _tracker, _logs) = start_test_server(&dir).await;

    let body: serde_json::Value = reqwest::get(format!("{base_url}/databases"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let list = body.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["name"], "main");
    assert_eq!(list[0]["status"], "healthy");
}

#[tokio::test]
async fn logs_respects_limit() {
    let dir = TempDir::new().unwrap();
    let (base_url, _tracker, logs) = start_test_server(&dir).await;

    for i in 0..10 {
        logs.push(LogEntry {
            timestamp: Utc::now(),
            level: "INFO".to_string(),
            target: "test".to_string(),
            message: format!("event {i}"),
        });
    }

    let body: serde_json::Value = reqwest::get(format!("{base_url}/logs?limit=3"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let list = body.as_array().unwrap();
    assert_eq!(list.len(), 3);
    assert_eq!(list[2]["message"], "event 9");
}
