//! # Commit API Handlers
//!
//! Read-only access to mirrored commits and author aggregates.

use axum::{
    extract::{Path, Query, State, rejection::PathRejection, rejection::QueryRejection},
    response::Json,
};

use crate::error::ApiError;
use crate::handlers::types::{AuthorListResponse, CommitListResponse, CommitQuery, with_deadline};
use crate::models::{Commit, RepoKey};
use crate::server::AppState;

fn repo_key(owner: String, repo: String) -> Result<RepoKey, ApiError> {
    let key = RepoKey::new(owner, repo);
    key.validate()?;
    Ok(key)
}

/// List mirrored commits, newest first
///
/// The first empty listing for a given filter transparently mirrors the
/// requested window from upstream once before answering.
#[utoipa::path(
    get,
    path = "/repos/{owner}/{repo}/commits",
    params(
        ("owner" = String, Path, description = "Repository owner"),
        ("repo" = String, Path, description = "Repository name"),
        CommitQuery
    ),
    responses(
        (status = 200, description = "Commits ordered by date desc, sha asc", body = CommitListResponse),
        (status = 400, description = "Invalid query parameters", body = ApiError),
        (status = 503, description = "Store or upstream unavailable", body = ApiError),
        (status = 504, description = "Request deadline exceeded", body = ApiError)
    ),
    tag = "commits"
)]
pub async fn list_commits(
    State(state): State<AppState>,
    path: Result<Path<(String, String)>, PathRejection>,
    query: Result<Query<CommitQuery>, QueryRejection>,
) -> Result<Json<CommitListResponse>, ApiError> {
    let Path((owner, repo)) = path?;
    let Query(params) = query?;
    let filter = params.into_filter(repo_key(owner, repo)?)?;

    let data = with_deadline(state.config.request_timeout(), |cancel| async move {
        state.query.list_commits(&filter, &cancel).await
    })
    .await?;

    Ok(Json(CommitListResponse { data }))
}

/// Get one mirrored commit by sha
#[utoipa::path(
    get,
    path = "/repos/{owner}/{repo}/commits/{sha}",
    params(
        ("owner" = String, Path, description = "Repository owner"),
        ("repo" = String, Path, description = "Repository name"),
        ("sha" = String, Path, description = "Full commit sha")
    ),
    responses(
        (status = 200, description = "The commit", body = Commit),
        (status = 404, description = "Commit not mirrored", body = ApiError),
        (status = 503, description = "Store unavailable", body = ApiError)
    ),
    tag = "commits"
)]
pub async fn get_commit(
    State(state): State<AppState>,
    path: Result<Path<(String, String, String)>, PathRejection>,
) -> Result<Json<Commit>, ApiError> {
    let Path((owner, repo, sha)) = path?;
    let key = repo_key(owner, repo)?;

    let commit = with_deadline(state.config.request_timeout(), |_cancel| async move {
        state.query.get_commit_by_sha(&key, &sha).await
    })
    .await?;

    Ok(Json(commit))
}

/// Rank authors by commit count over a date window
#[utoipa::path(
    get,
    path = "/repos/{owner}/{repo}/authors/top",
    params(
        ("owner" = String, Path, description = "Repository owner"),
        ("repo" = String, Path, description = "Repository name"),
        CommitQuery
    ),
    responses(
        (status = 200, description = "Authors ordered by commit count desc, author asc", body = AuthorListResponse, example = json!({
            "data": [
                { "ownerName": "acme", "repoName": "widget", "author": "Ada Lovelace", "commitCount": 42 }
            ]
        })),
        (status = 400, description = "Invalid query parameters", body = ApiError),
        (status = 503, description = "Store unavailable", body = ApiError)
    ),
    tag = "commits"
)]
pub async fn top_authors(
    State(state): State<AppState>,
    path: Result<Path<(String, String)>, PathRejection>,
    query: Result<Query<CommitQuery>, QueryRejection>,
) -> Result<Json<AuthorListResponse>, ApiError> {
    let Path((owner, repo)) = path?;
    let Query(params) = query?;
    let filter = params.into_filter(repo_key(owner, repo)?)?;

    let data = with_deadline(state.config.request_timeout(), |_cancel| async move {
        state.query.top_authors(&filter).await
    })
    .await?;

    Ok(Json(AuthorListResponse { data }))
}
