//! # Tests for Handlers
//!
//! Drives the router in-process against in-memory stores and a scripted upstream.

use std::sync::Arc;

use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use serde_json::{Value, json};
use tower::ServiceExt;

use crate::config::AppConfig;
use crate::connectors::fake::{FakeUpstream, commit};
use crate::events::EventBus;
use crate::mirror::MirrorEngine;
use crate::models::RepoKey;
use crate::query::QueryService;
use crate::registry::JobRegistry;
use crate::repositories::{InMemoryCommitStore, InMemoryConfigStore};
use crate::scheduler::MonitorScheduler;
use crate::server::{AppState, create_app};

fn test_state(upstream: Arc<FakeUpstream>) -> AppState {
    let config = Arc::new(AppConfig::default());
    let commits = Arc::new(InMemoryCommitStore::new());
    let events = EventBus::new(16);
    let mirror = Arc::new(MirrorEngine::new(
        upstream,
        commits.clone(),
        events.clone(),
        config.mirror.clone(),
    ));
    let registry = Arc::new(JobRegistry::new(Arc::clone(&mirror)));
    let scheduler = Arc::new(MonitorScheduler::new(
        Arc::new(InMemoryConfigStore::new()),
        registry,
        Arc::clone(&mirror),
        events,
        config.scheduler.clone(),
    ));
    let query = Arc::new(QueryService::new(commits, mirror));

    AppState {
        config,
        scheduler,
        query,
    }
}

async fn send(app: axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_root_handler_returns_expected_service_info() {
    let app = create_app(test_state(Arc::new(FakeUpstream::new())));
    let (status, body) = send(app, get("/")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "gitbeam-commit-monitor");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_health_reports_code_200() {
    let app = create_app(test_state(Arc::new(FakeUpstream::new())));
    let (status, body) = send(app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "code": 200 }));
}

#[tokio::test]
async fn test_trace_id_is_echoed() {
    let app = create_app(test_state(Arc::new(FakeUpstream::new())));
    let request = Request::builder()
        .uri("/health")
        .header("x-trace-id", "trace-abc")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-trace-id"], "trace-abc");
}

#[tokio::test]
async fn test_start_list_and_stop_monitor() {
    let state = test_state(Arc::new(FakeUpstream::new()));
    let app = create_app(state.clone());

    let start = Request::builder()
        .method("POST")
        .uri("/monitors")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({
                "ownerName": "acme",
                "repoName": "widget",
                "fromDate": "not-a-date",
                "pollIntervalHours": 2
            })
            .to_string(),
        ))
        .unwrap();
    let (status, body) = send(app.clone(), start).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));

    let (status, body) = send(app.clone(), get("/monitors")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["ownerName"], "acme");
    assert_eq!(body["data"][0]["pollIntervalHours"], 2);

    let stop = Request::builder()
        .method("DELETE")
        .uri("/monitors/acme/widget")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(app.clone(), stop).await;
    assert_eq!(status, StatusCode::OK);
    assert!(state.scheduler.registry().is_empty());
}

#[tokio::test]
async fn test_start_rejects_zero_interval() {
    let app = create_app(test_state(Arc::new(FakeUpstream::new())));
    let start = Request::builder()
        .method("POST")
        .uri("/monitors")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "ownerName": "acme", "repoName": "widget", "pollIntervalHours": 0 }).to_string(),
        ))
        .unwrap();

    let (status, body) = send(app, start).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_ARGUMENT");
    assert!(body["traceId"].is_string());
}

#[tokio::test]
async fn test_list_commits_warms_up_and_orders() {
    let upstream = Arc::new(FakeUpstream::new());
    let key = RepoKey::new("acme", "widget");
    upstream.push(commit(&key, "a", "2024-01-01T00:00:00Z"));
    upstream.push(commit(&key, "b", "2024-01-02T00:00:00Z"));
    upstream.push(commit(&key, "c", "2024-01-03T00:00:00Z"));
    let app = create_app(test_state(upstream.clone()));

    let (status, body) = send(app.clone(), get("/repos/acme/widget/commits")).await;
    assert_eq!(status, StatusCode::OK);
    let shas: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["sha"].as_str().unwrap())
        .collect();
    assert_eq!(shas, vec!["c", "b", "a"]);

    let (_, body) = send(app.clone(), get("/repos/acme/widget/commits?limit=1&page=2")).await;
    assert_eq!(body["data"][0]["sha"], "b");

    let (status, body) = send(app, get("/repos/acme/widget/commits/a")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["date"], "2024-01-01T00:00:00Z");
}

#[tokio::test]
async fn test_limit_above_maximum_is_invalid_argument() {
    let app = create_app(test_state(Arc::new(FakeUpstream::new())));
    let (status, body) = send(app, get("/repos/acme/widget/commits?limit=1001")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_ARGUMENT");
}

#[tokio::test]
async fn test_unknown_commit_is_not_found() {
    let app = create_app(test_state(Arc::new(FakeUpstream::new())));
    let (status, body) = send(app, get("/repos/acme/widget/commits/deadbeef")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_top_authors_ranking() {
    let upstream = Arc::new(FakeUpstream::new());
    let key = RepoKey::new("acme", "widget");
    for (sha, author, date) in [
        ("a", "bob", "2024-01-01T00:00:00Z"),
        ("b", "ada", "2024-01-02T00:00:00Z"),
        ("c", "bob", "2024-01-03T00:00:00Z"),
    ] {
        let mut c = commit(&key, sha, date);
        c.author = author.to_string();
        upstream.push(c);
    }
    let app = create_app(test_state(upstream));

    // Warm the store through the listing first.
    send(app.clone(), get("/repos/acme/widget/commits")).await;
    let (status, body) = send(app, get("/repos/acme/widget/authors/top")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["author"], "bob");
    assert_eq!(body["data"][0]["commitCount"], 2);
    assert_eq!(body["data"][1]["author"], "ada");
}

#[tokio::test]
async fn test_openapi_document_lists_routes() {
    let app = create_app(test_state(Arc::new(FakeUpstream::new())));
    let (status, body) = send(app, get("/openapi.json")).await;

    assert_eq!(status, StatusCode::OK);
    let paths = body["paths"].as_object().unwrap();
    for path in [
        "/monitors",
        "/monitors/{owner}/{repo}",
        "/repos/{owner}/{repo}/commits",
        "/repos/{owner}/{repo}/commits/{sha}",
        "/repos/{owner}/{repo}/authors/top",
        "/health",
    ] {
        assert!(paths.contains_key(path), "missing {}", path);
    }
}
