use std::sync::Arc;

use axum::body::Body;
use axum::Router;
use chrono::{Duration, Utc};
use dvr_core::config::{RecordingProfile, RecordingSection, UserAgentEntry};
use dvr_core::dvr::NewCompletedRecording;
use dvr_core::{AccessToken, ChannelDirectory, ChannelSource, DvrEngine, SharedSettings, SqliteDvrStore};
use dvrctl::api::router;
use http::{header, Method, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

const ALICE: &str = "alice-token";
const BOB: &str = "bob-token";

struct TestApp {
    dir: TempDir,
    engine: Arc<DvrEngine>,
    app: Router,
}

impl TestApp {
    fn new() -> Self {
        Self::with_tokens(vec![
            AccessToken {
                token: ALICE.into(),
                user_id: 1,
            },
            AccessToken {
                token: BOB.into(),
                user_id: 2,
            },
        ])
    }

    fn with_tokens(tokens: Vec<AccessToken>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteDvrStore::new(dir.path().join("data/dvr.sqlite")).unwrap();
        store.initialize().unwrap();
        let channels = Arc::new(ChannelDirectory::new([ChannelSource {
            id: "news-1".into(),
            url: "http://iptv.invalid/news-1.ts".into(),
        }]));
        let settings = Arc::new(SharedSettings::new(RecordingSection {
            pre_buffer_minutes: 2,
            post_buffer_minutes: 5,
            default_profile: "copy".into(),
            default_user_agent: Some("vlc".into()),
            stop_grace_seconds: None,
            profiles: vec![RecordingProfile {
                id: "copy".into(),
                name: None,
                command: "ffmpeg -i {input} -c copy {output}".into(),
                extension: "ts".into(),
            }],
            user_agents: vec![UserAgentEntry {
                id: "vlc".into(),
                value: "VLC/3.0".into(),
            }],
        }));
        let engine = Arc::new(DvrEngine::new(
            store,
            channels,
            settings,
            dir.path().join("recordings"),
        ));
        let app = router(Arc::clone(&engine), &tokens);
        Self { dir, engine, app }
    }

    async fn send(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    async fn json(&self, method: Method, uri: &str, token: &str, body: Option<Value>) -> (StatusCode, Value) {
        let (status, bytes) = self.send(method, uri, Some(token), body).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    /// Drops a finished recording on disk and in the store for `user_id`.
    fn seed_recording(&self, user_id: i64, file_name: &str) -> i64 {
        let dir = self.dir.path().join("recordings");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(file_name);
        std::fs::write(&path, b"recorded bytes").unwrap();
        self.engine
            .store()
            .insert_recording(&NewCompletedRecording {
                user_id,
                job_id: None,
                channel_name: "News One".into(),
                program_title: "Evening News".into(),
                start_time: Utc::now() - Duration::hours(2),
                duration_seconds: 1800,
                file_size_bytes: 14,
                file_path: path.to_string_lossy().to_string(),
            })
            .unwrap()
            .id
    }
}

fn schedule_body(start_in_hours: i64, stop_in_hours: i64) -> Value {
    let now = Utc::now();
    json!({
        "channelId": "news-1",
        "channelName": "News One",
        "programTitle": "Evening News",
        "start": (now + Duration::hours(start_in_hours)).to_rfc3339(),
        "stop": (now + Duration::hours(stop_in_hours)).to_rfc3339(),
    })
}

#[tokio::test]
async fn test_healthz_needs_no_token() {
    let app = TestApp::new();
    let (status, body) = app.send(Method::GET, "/healthz", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");
}

#[tokio::test]
async fn test_missing_or_unknown_token_is_unauthorized() {
    let app = TestApp::new();
    let (status, _) = app.send(Method::GET, "/dvr/jobs", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.send(Method::GET, "/dvr/jobs", Some("nope"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app
        .send(Method::POST, "/dvr/schedule", None, Some(schedule_body(1, 2)))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(app.engine.store().list_jobs(None, 10).unwrap().is_empty());
}

#[tokio::test]
async fn test_no_configured_tokens_rejects_everything() {
    let app = TestApp::with_tokens(Vec::new());
    let (status, _) = app.send(Method::GET, "/dvr/jobs", Some(ALICE), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.send(Method::GET, "/healthz", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_schedule_applies_buffers_and_arms() {
    let app = TestApp::new();
    let (status, job) = app
        .json(Method::POST, "/dvr/schedule", ALICE, Some(schedule_body(1, 2)))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(job["status"], "scheduled");
    assert_eq!(job["userId"], 1);
    assert_eq!(job["preBufferMinutes"], 2);
    assert_eq!(job["postBufferMinutes"], 5);
    assert_eq!(job["profileId"], "copy");
    assert_eq!(job["userAgentId"], "vlc");

    let id = job["id"].as_i64().unwrap();
    assert!(app.engine.scheduler().is_armed(id));
    app.engine.shutdown();
}

#[tokio::test]
async fn test_schedule_rejects_inverted_window() {
    let app = TestApp::new();
    let (status, body) = app
        .json(Method::POST, "/dvr/schedule", ALICE, Some(schedule_body(2, 1)))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("invalid recording window"));
    assert!(app.engine.store().list_jobs(None, 10).unwrap().is_empty());
}

#[tokio::test]
async fn test_jobs_are_owner_scoped() {
    let app = TestApp::new();
    let (_, job) = app
        .json(Method::POST, "/dvr/schedule", ALICE, Some(schedule_body(1, 2)))
        .await;
    let id = job["id"].as_i64().unwrap();

    let (status, jobs) = app.json(Method::GET, "/dvr/jobs", ALICE, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(jobs.as_array().unwrap().len(), 1);

    let (status, jobs) = app.json(Method::GET, "/dvr/jobs", BOB, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(jobs.as_array().unwrap().is_empty());

    let uri = format!("/dvr/jobs/{id}");
    let (status, _) = app.json(Method::GET, &uri, BOB, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.json(Method::DELETE, &uri, BOB, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, fetched) = app.json(Method::GET, &uri, ALICE, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["status"], "scheduled");
    app.engine.shutdown();
}

#[tokio::test]
async fn test_cancel_pending_job() {
    let app = TestApp::new();
    let (_, job) = app
        .json(Method::POST, "/dvr/schedule", ALICE, Some(schedule_body(1, 2)))
        .await;
    let id = job["id"].as_i64().unwrap();

    let uri = format!("/dvr/jobs/{id}");
    let (status, cancelled) = app.json(Method::DELETE, &uri, ALICE, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");
    assert!(!app.engine.scheduler().is_armed(id));

    // Cancelling a terminal job leaves it as is.
    let (status, again) = app.json(Method::DELETE, &uri, ALICE, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["status"], "cancelled");
}

#[tokio::test]
async fn test_recordings_listing_and_file_serving() {
    let app = TestApp::new();
    let id = app.seed_recording(1, "7_Evening_News.ts");
    app.seed_recording(2, "8_Other.ts");

    let (status, list) = app.json(Method::GET, "/dvr/recordings", ALICE, None).await;
    assert_eq!(status, StatusCode::OK);
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["id"], id);
    assert_eq!(list[0]["fileName"], "7_Evening_News.ts");

    let (status, bytes) = app
        .send(Method::GET, "/recordings/7_Evening_News.ts", Some(ALICE), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, b"recorded bytes");

    let (status, _) = app
        .send(Method::GET, "/recordings/7_Evening_News.ts", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_delete_recording_unlinks_file() {
    let app = TestApp::new();
    let id = app.seed_recording(1, "7_Evening_News.ts");
    let file = app.dir.path().join("recordings/7_Evening_News.ts");
    let uri = format!("/dvr/recordings/{id}");

    let (status, _) = app.json(Method::DELETE, &uri, BOB, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(file.exists());

    let (status, body) = app.json(Method::DELETE, &uri, ALICE, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);
    assert!(!file.exists());

    let (status, _) = app.json(Method::DELETE, &uri, ALICE, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_status_reports_counts_and_armed_jobs() {
    let app = TestApp::new();
    let (_, job) = app
        .json(Method::POST, "/dvr/schedule", ALICE, Some(schedule_body(1, 2)))
        .await;
    let (status, report) = app.json(Method::GET, "/dvr/status", BOB, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["jobsByStatus"]["scheduled"], 1);
    assert_eq!(report["armedJobs"], json!([job["id"]]));
    assert_eq!(report["activeRecordings"], json!([]));
    app.engine.shutdown();
}
