// End-to-end tests: HTTP surface -> coordinator -> runner -> SQLite store.
//
// A small `sh` script stands in for the downloader. It receives the same
// argument vector the real one would and writes a marker into the output
// directory, so these tests also check per-owner folder routing.
#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use futures_util::StreamExt;
use mediaferry_core::{DownloaderSpec, JobStatus, JobStore};
use mediaferry_db::Database;
use mediaferry_server::jobs::{CoordinatorOptions, JobCoordinator, ProgressBus};
use mediaferry_server::{create_app, AppState};
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `$5` is the `-o` template, the last argument is the target.
const FAKE_DOWNLOADER: &str = r#"
out_dir=$(dirname "$5")
mkdir -p "$out_dir"
for p in 12.5 40 87; do echo "$p%"; sleep 0.05; done
eval "target=\${$#}"
touch "$out_dir/$target.done"
"#;

struct Harness {
    _tmp: tempfile::TempDir,
    downloads: std::path::PathBuf,
    db: Database,
    coordinator: Arc<JobCoordinator>,
    app: Router,
}

async fn harness(script: &str) -> Harness {
    let tmp = tempfile::TempDir::new().unwrap();
    let downloads = tmp.path().join("downloads");
    let db = Database::new(&tmp.path().join("mediaferry.db")).await.unwrap();
    db.create_user(1, "alice", "alice", false).await.unwrap();
    db.create_user(2, "bob", "", false).await.unwrap();
    db.create_user(9, "root", "", true).await.unwrap();

    let store: Arc<dyn JobStore> = Arc::new(db.clone());
    let coordinator = Arc::new(JobCoordinator::new(
        store,
        ProgressBus::new(),
        CoordinatorOptions {
            downloader: DownloaderSpec::new("sh", &downloads)
                .with_leading_args(["-c", script, "downloader"]),
            terminate_on_cancel: true,
        },
    ));
    let app = create_app(AppState::new(Arc::clone(&coordinator)));
    Harness {
        _tmp: tmp,
        downloads,
        db,
        coordinator,
        app,
    }
}

async fn call(app: &Router, method: Method, uri: &str, user: &str, body: Option<&str>) -> (StatusCode, serde_json::Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-user-id", user)
        .header("x-user-admin", if user == "9" { "1" } else { "0" });
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

async fn wait_terminal(db: &Database, id: i64) -> mediaferry_core::Job {
    for _ in 0..500 {
        let job = db.get_job(id).await.unwrap().unwrap();
        if job.status.is_terminal() {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} never finished");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_submit_download_lands_in_owner_folder() {
    let h = harness(FAKE_DOWNLOADER).await;

    let (status, body) = call(&h.app, Method::POST, "/api/downloads", "1", Some(r#"{"url":"clip"}"#)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "pending");
    let id = body["id"].as_i64().unwrap();

    let job = wait_terminal(&h.db, id).await;
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.progress, 100.0);
    assert!(h.downloads.join("alice").join("clip.done").exists());

    let (status, body) = call(&h.app, Method::GET, &format!("/api/downloads/{id}"), "1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "done");
    assert_eq!(body["progress"], 100.0);
}

#[tokio::test]
async fn test_owner_without_folder_uses_downloads_root() {
    let h = harness(FAKE_DOWNLOADER).await;
    let job = h.coordinator.submit(2, "rootclip").await.unwrap();
    assert_eq!(wait_terminal(&h.db, job.id).await.status, JobStatus::Done);
    assert!(h.downloads.join("rootclip.done").exists());
}

#[tokio::test]
async fn test_progress_stream_is_monotonic_and_ends_with_done() {
    let h = harness(&format!("sleep 0.2\n{FAKE_DOWNLOADER}")).await;
    let job = h.coordinator.submit(1, "clip").await.unwrap();

    let events: Vec<_> = tokio::time::timeout(
        Duration::from_secs(10),
        h.coordinator.subscribe_progress(job.id).collect::<Vec<_>>(),
    )
    .await
    .unwrap();

    let last = events.last().unwrap();
    assert_eq!(last.status, JobStatus::Done);
    assert_eq!(last.progress, 100.0);
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

    let running: Vec<f64> = events
        .iter()
        .filter(|e| e.status == JobStatus::Running)
        .map(|e| e.progress)
        .collect();
    assert!(running.windows(2).all(|w| w[0] < w[1]), "{running:?}");
    assert!(running.contains(&87.0));
}

#[tokio::test]
async fn test_cancel_running_job_over_http() {
    let h = harness("echo 5%; exec sleep 30").await;
    let job = h.coordinator.submit(1, "long").await.unwrap();

    for _ in 0..300 {
        if h.db.get_job(job.id).await.unwrap().unwrap().progress >= 5.0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let uri = format!("/api/downloads/{}", job.id);
    let (status, _) = call(&h.app, Method::DELETE, &uri, "2", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(&h.app, Method::DELETE, &uri, "1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "cancelled");

    for _ in 0..500 {
        if h.coordinator.active_jobs().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(h.coordinator.active_jobs().is_empty(), "terminated runner should exit");
    let stored = h.db.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Cancelled);

    // A second DELETE removes the cancelled record.
    let (status, body) = call(&h.app, Method::DELETE, &uri, "1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "deleted");
    assert!(h.db.get_job(job.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_admin_list_sees_everyone() {
    let h = harness("exit 0").await;
    h.coordinator.submit(1, "a").await.unwrap();
    h.coordinator.submit(2, "b").await.unwrap();

    let (_, mine) = call(&h.app, Method::GET, "/api/downloads", "1", None).await;
    assert_eq!(mine.as_array().unwrap().len(), 1);

    let (_, all) = call(&h.app, Method::GET, "/api/downloads", "9", None).await;
    let all = all.as_array().unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0]["ownerName"], "bob");
    assert_eq!(all[1]["ownerName"], "alice");
}
