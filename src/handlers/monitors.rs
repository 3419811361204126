//! # Monitor API Handlers
//!
//! Start, stop and list repository monitors.

use axum::{
    extract::{Path, State, rejection::JsonRejection, rejection::PathRejection},
    response::Json,
};

use crate::error::ApiError;
use crate::handlers::types::{
    Empty, MonitorListResponse, StartMonitoringRequest, with_deadline,
};
use crate::models::{MonitorConfig, RepoKey, parse_date};
use crate::server::AppState;

impl From<StartMonitoringRequest> for MonitorConfig {
    fn from(request: StartMonitoringRequest) -> Self {
        Self {
            key: RepoKey::new(request.owner_name, request.repo_name),
            from_date: request.from_date.as_deref().and_then(parse_date),
            to_date: request.to_date.as_deref().and_then(parse_date),
            poll_interval_hours: request.poll_interval_hours,
        }
    }
}

/// Start (or replace) monitoring of a repository
#[utoipa::path(
    post,
    path = "/monitors",
    request_body = StartMonitoringRequest,
    responses(
        (status = 200, description = "Monitor registered", body = Empty),
        (status = 400, description = "Invalid monitor configuration", body = ApiError),
        (status = 503, description = "Config store unavailable", body = ApiError),
        (status = 504, description = "Request deadline exceeded", body = ApiError)
    ),
    tag = "monitors"
)]
pub async fn start_monitoring(
    State(state): State<AppState>,
    payload: Result<Json<StartMonitoringRequest>, JsonRejection>,
) -> Result<Json<Empty>, ApiError> {
    let Json(request) = payload?;
    let config = MonitorConfig::from(request);

    with_deadline(state.config.request_timeout(), |_cancel| async move {
        state.scheduler.start_monitoring(config).await
    })
    .await?;

    Ok(Json(Empty::default()))
}

/// Stop monitoring a repository; unknown repositories succeed
#[utoipa::path(
    delete,
    path = "/monitors/{owner}/{repo}",
    params(
        ("owner" = String, Path, description = "Repository owner"),
        ("repo" = String, Path, description = "Repository name")
    ),
    responses(
        (status = 200, description = "Monitor removed (or was absent)", body = Empty),
        (status = 400, description = "Invalid path", body = ApiError),
        (status = 503, description = "Config store unavailable", body = ApiError)
    ),
    tag = "monitors"
)]
pub async fn stop_monitoring(
    State(state): State<AppState>,
    path: Result<Path<(String, String)>, PathRejection>,
) -> Result<Json<Empty>, ApiError> {
    let Path((owner, repo)) = path?;
    let key = RepoKey::new(owner, repo);

    with_deadline(state.config.request_timeout(), |_cancel| async move {
        state.scheduler.stop_monitoring(&key).await
    })
    .await?;

    Ok(Json(Empty::default()))
}

/// List live monitor jobs
#[utoipa::path(
    get,
    path = "/monitors",
    responses(
        (status = 200, description = "Active monitor jobs", body = MonitorListResponse, example = json!({
            "data": [
                {
                    "ownerName": "acme",
                    "repoName": "widget",
                    "pollIntervalHours": 1,
                    "state": "IDLE",
                    "nextFireAt": "2024-01-15T11:30:00Z"
                }
            ]
        }))
    ),
    tag = "monitors"
)]
pub async fn list_monitors(State(state): State<AppState>) -> Json<MonitorListResponse> {
    Json(MonitorListResponse {
        data: state.scheduler.registry().snapshot(),
    })
}
